use serde::{Deserialize, Serialize};

use crate::hlc::Hlc;
use crate::ids::{ActorId, AuditId, EntityId};
use crate::mutation::CountAction;

/// What the client asks the store to record after a confirmed counter change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity_id: EntityId,
    pub change_amount: i64,
    pub resulting_value: u64,
    pub action: CountAction,
    pub performed_by: ActorId,
}

/// An append-only inventory log row. `id` and `timestamp` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub entity_id: EntityId,
    pub change_amount: i64,
    pub resulting_value: u64,
    pub action: CountAction,
    pub performed_by: ActorId,
    pub timestamp: Hlc,
}

/// The store's answer to a counter adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReceipt {
    pub previous_value: u64,
    pub resulting_value: u64,
}

impl CountReceipt {
    /// Signed delta actually applied by the store.
    pub fn change_amount(&self) -> i64 {
        self.resulting_value as i64 - self.previous_value as i64
    }
}
