// Audit ledger: append-only transition records for replay and review.

pub mod ledger;

pub use ledger::{
    AuditEntry, AuditError, AuditFilter, AuditLedger, AuditOutcome, AuditSink, InMemorySink,
};
