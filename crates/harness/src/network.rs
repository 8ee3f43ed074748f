use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use assetline_core::{
    AuditEntry, AuditRecord, Category, CountChange, CountReceipt, Entity, EntityId, MutationId,
};
use assetline_storage::{RemoteStore, SqliteStore, StorageError};

/// A scripted failure for the next persistence call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Refuse the call with this reason. Nothing is written.
    Reject(String),
    /// Never answer.
    Hang,
    /// Answer normally after a delay.
    Delay(Duration),
}

/// A remote store backed by SQLite, with scripted network faults in front of it.
///
/// Faults are consumed in order, one per persistence call. Audit appends
/// have their own failure counter since they run after the persistence call.
pub struct ScriptedRemote {
    store: SqliteStore,
    faults: RefCell<VecDeque<Fault>>,
    audit_failures: Cell<u32>,
    persist_calls: Cell<u32>,
}

impl ScriptedRemote {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store,
            faults: RefCell::new(VecDeque::new()),
            audit_failures: Cell::new(0),
            persist_calls: Cell::new(0),
        }
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::new(SqliteStore::open_in_memory()?))
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn reject_next(&self, reason: &str) {
        self.faults.borrow_mut().push_back(Fault::Reject(reason.to_string()));
    }

    pub fn hang_next(&self) {
        self.faults.borrow_mut().push_back(Fault::Hang);
    }

    pub fn delay_next(&self, delay: Duration) {
        self.faults.borrow_mut().push_back(Fault::Delay(delay));
    }

    /// Let the next call through untouched; used to line up later faults.
    pub fn pass_next(&self) {
        self.faults.borrow_mut().push_back(Fault::Delay(Duration::ZERO));
    }

    pub fn fail_audits(&self, times: u32) {
        self.audit_failures.set(times);
    }

    /// Persistence calls that reached the store or a fault.
    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.get()
    }

    async fn gate(&self, mutation_id: MutationId) -> Result<(), StorageError> {
        self.persist_calls.set(self.persist_calls.get() + 1);
        let fault = self.faults.borrow_mut().pop_front();
        match fault {
            None => Ok(()),
            Some(Fault::Reject(reason)) => {
                debug!(%mutation_id, %reason, "scripted rejection");
                Err(StorageError::Rejected(reason))
            }
            Some(Fault::Hang) => {
                debug!(%mutation_id, "scripted hang");
                futures::future::pending::<()>().await;
                Ok(())
            }
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait(?Send)]
impl RemoteStore for ScriptedRemote {
    async fn load_entities(&self) -> Result<Vec<Entity>, StorageError> {
        self.store.list_entities()
    }

    async fn persist_recategorize(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        target: &Category,
    ) -> Result<Category, StorageError> {
        self.gate(mutation_id).await?;
        self.store.recategorize(mutation_id, entity_id, target)
    }

    async fn persist_reorder(
        &self,
        mutation_id: MutationId,
        _entity_id: &EntityId,
        _category: &Category,
        _index: usize,
    ) -> Result<(), StorageError> {
        self.gate(mutation_id).await
    }

    async fn persist_count_adjust(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        change: CountChange,
    ) -> Result<CountReceipt, StorageError> {
        self.gate(mutation_id).await?;
        self.store.adjust_count(mutation_id, entity_id, change)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<AuditRecord, StorageError> {
        let remaining = self.audit_failures.get();
        if remaining > 0 {
            self.audit_failures.set(remaining - 1);
            return Err(StorageError::Rejected("inventory log unavailable".into()));
        }
        self.store.append_audit(entry)
    }
}
