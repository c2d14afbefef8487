// Per-request serialization: two concurrent transitions on the same id
// must never both read the same stage and write divergent next states.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::workflow::RequestId;

/// Map of per-request exclusive locks, created on first use. Distinct
/// requests proceed in parallel; transitions on one id queue up.
#[derive(Debug, Default)]
pub struct RequestLocks {
    inner: Mutex<HashMap<RequestId, Arc<Mutex<()>>>>,
}

impl RequestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: RequestId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_serializes_critical_sections() {
        let locks = Arc::new(RequestLocks::new());
        let id = RequestId::new();
        let in_section = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let in_section = Arc::clone(&in_section);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.acquire(id).await;
                    let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    in_section.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_ids_do_not_block_each_other() {
        let locks = RequestLocks::new();
        let first = locks.acquire(RequestId::new()).await;
        // A second id acquires immediately even while the first is held.
        let second = locks.acquire(RequestId::new()).await;
        drop(first);
        drop(second);
    }
}
