use std::time::Duration;

use futures::future::{Abortable, Aborted};
use tracing::{debug, info, warn};

use assetline_core::{Category, CountAction, CountReceipt, MutationDescriptor, MutationKind};
use assetline_storage::{RemoteStore, StorageError};

use crate::audit::AuditAppender;
use crate::config::EngineConfig;
use crate::dispatcher::{CommitFailure, CommitOutcome, PendingCommit, Resolution};

enum Persisted {
    Category(Category),
    Order,
    Count(CountReceipt),
}

async fn persist<R: RemoteStore + ?Sized>(
    remote: &R,
    descriptor: &MutationDescriptor,
) -> Result<Persisted, StorageError> {
    let id = descriptor.id();
    let entity_id = descriptor.entity_id();
    match descriptor.kind() {
        MutationKind::Recategorize { target, .. } => remote
            .persist_recategorize(id, entity_id, target)
            .await
            .map(Persisted::Category),
        MutationKind::Reorder {
            category,
            target_index,
        } => remote
            .persist_reorder(id, entity_id, category, *target_index)
            .await
            .map(|()| Persisted::Order),
        MutationKind::AdjustCount(change) => remote
            .persist_count_adjust(id, entity_id, *change)
            .await
            .map(Persisted::Count),
    }
}

/// Runs the network side of a commit. Holds no engine state, so any number
/// of commits can be in flight at once and resolve in any order.
#[derive(Debug, Clone)]
pub struct Committer {
    timeout: Duration,
    audit: AuditAppender,
}

impl Committer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            timeout: config.commit_timeout(),
            audit: AuditAppender::new(config),
        }
    }

    /// Persist the mutation and, for counter changes, append the audit record.
    ///
    /// Cancellation and the timeout only cover the persistence call. Once the
    /// store has confirmed a counter change the audit append always runs.
    pub async fn execute<R: RemoteStore + ?Sized>(
        &self,
        remote: &R,
        mut pending: PendingCommit,
    ) -> Resolution {
        let mutation_id = pending.id();
        let Some(registration) = pending.take_registration() else {
            return pending.resolve(CommitOutcome::Failed(CommitFailure::Cancelled { user_initiated: true }));
        };
        let descriptor = pending.descriptor().clone();
        let call = tokio::time::timeout(self.timeout, persist(remote, &descriptor));

        let persisted = match Abortable::new(call, registration).await {
            Err(Aborted) => {
                info!(%mutation_id, "commit aborted");
                return pending.resolve(CommitOutcome::Failed(CommitFailure::Cancelled { user_initiated: true }));
            }
            Ok(Err(_elapsed)) => {
                warn!(%mutation_id, timeout_ms = self.timeout.as_millis() as u64, "commit timed out");
                return pending.resolve(CommitOutcome::Failed(CommitFailure::TimedOut));
            }
            Ok(Ok(Err(e))) => {
                warn!(%mutation_id, error = %e, "commit rejected");
                return pending.resolve(CommitOutcome::Failed(CommitFailure::Rejected(e.to_string())));
            }
            Ok(Ok(Ok(persisted))) => persisted,
        };
        debug!(%mutation_id, kind = descriptor.kind().kind_name(), "commit persisted");

        let outcome = match persisted {
            Persisted::Category(category) => CommitOutcome::Recategorized { category },
            Persisted::Order => CommitOutcome::Reordered,
            Persisted::Count(receipt) => {
                let action = match descriptor.kind() {
                    MutationKind::AdjustCount(change) => change.action(),
                    _ => CountAction::Adjust,
                };
                let audit = self
                    .audit
                    .append(
                        remote,
                        descriptor.entity_id(),
                        receipt.change_amount(),
                        receipt.resulting_value,
                        action,
                    )
                    .await;
                CommitOutcome::CountAdjusted { receipt, audit }
            }
        };
        pending.resolve(outcome)
    }
}
