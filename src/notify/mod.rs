// Notification collaborator contract. The core supplies a template key
// and parameters; rendering and channel delivery are entirely external.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(
        &self,
        recipient_id: &str,
        template_key: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<(), NotifyError>;
}

/// Default collaborator: logs the dispatch instead of delivering it.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn dispatch(
        &self,
        recipient_id: &str,
        template_key: &str,
        parameters: BTreeMap<String, String>,
    ) -> Result<(), NotifyError> {
        info!(
            recipient_id = %recipient_id,
            template_key = %template_key,
            parameters = ?parameters,
            "notification dispatched"
        );
        Ok(())
    }
}
