use async_trait::async_trait;

use assetline_core::{
    AuditEntry, AuditRecord, Category, CountChange, CountReceipt, Entity, EntityId, MutationId,
};

use crate::error::StorageError;

/// The remote relational store, as seen by the mutation engine.
///
/// Every call is keyed by the client's `MutationId` so a store can recognise a
/// re-sent request and answer it without applying the change a second time.
/// Futures are not required to be `Send`: the engine drives all commits from a
/// single thread.
#[async_trait(?Send)]
pub trait RemoteStore {
    async fn load_entities(&self) -> Result<Vec<Entity>, StorageError>;

    /// Persist a status change; returns the category the store actually holds.
    async fn persist_recategorize(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        target: &Category,
    ) -> Result<Category, StorageError>;

    /// Intra-category order is kept client-side only, so the default is an
    /// immediate success.
    async fn persist_reorder(
        &self,
        _mutation_id: MutationId,
        _entity_id: &EntityId,
        _category: &Category,
        _index: usize,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    /// Apply `change` against the store's own current value.
    async fn persist_count_adjust(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        change: CountChange,
    ) -> Result<CountReceipt, StorageError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<AuditRecord, StorageError>;
}
