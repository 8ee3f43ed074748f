use std::time::Duration;

use tracing::{debug, warn};

use assetline_core::{ActorId, AuditEntry, CountAction, EntityId};
use assetline_storage::RemoteStore;

use crate::config::EngineConfig;
use crate::dispatcher::AuditOutcome;

/// Appends inventory log records after a confirmed counter change.
///
/// The counter change has already been persisted by the time this runs, so a
/// failure here never rolls anything back. It is retried a bounded number of
/// times and then reported as a partial failure.
#[derive(Debug, Clone)]
pub struct AuditAppender {
    performed_by: ActorId,
    attempts: u32,
    backoff: Duration,
    timeout: Duration,
}

impl AuditAppender {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            performed_by: config.performed_by.clone(),
            attempts: config.audit_retry_attempts.max(1),
            backoff: config.audit_retry_backoff(),
            timeout: config.commit_timeout(),
        }
    }

    pub fn performed_by(&self) -> &ActorId {
        &self.performed_by
    }

    pub async fn append<R: RemoteStore + ?Sized>(
        &self,
        remote: &R,
        entity_id: &EntityId,
        change_amount: i64,
        resulting_value: u64,
        action: CountAction,
    ) -> AuditOutcome {
        let entry = AuditEntry {
            entity_id: entity_id.clone(),
            change_amount,
            resulting_value,
            action,
            performed_by: self.performed_by.clone(),
        };

        let mut reason = String::new();
        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.timeout, remote.append_audit(&entry)).await {
                Ok(Ok(record)) => {
                    debug!(%entity_id, audit_id = %record.id, attempt, "audit record appended");
                    return AuditOutcome::Recorded(record);
                }
                Ok(Err(e)) => reason = e.to_string(),
                Err(_) => reason = "audit append timed out".to_string(),
            }
            warn!(%entity_id, attempt, max_attempts = self.attempts, error = %reason, "audit append failed");
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        AuditOutcome::Failed {
            attempts: self.attempts,
            reason,
        }
    }
}
