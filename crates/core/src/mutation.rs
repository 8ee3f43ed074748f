use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{Category, EntityId, MutationId};

/// What a counter adjustment does to the stored quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountAction {
    Add,
    Remove,
    Adjust,
}

impl CountAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Adjust => "adjust",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "adjust" => Ok(Self::Adjust),
            _ => Err(CoreError::InvalidData(format!("unknown count action: {s}"))),
        }
    }
}

/// The intended transition of a shared counter. Sent to the store as-is so it
/// can be applied against the store's own current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountChange {
    Add(u64),
    Remove(u64),
    Set(u64),
}

impl CountChange {
    pub fn action(&self) -> CountAction {
        match self {
            Self::Add(_) => CountAction::Add,
            Self::Remove(_) => CountAction::Remove,
            Self::Set(_) => CountAction::Adjust,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            Self::Add(n) | Self::Remove(n) | Self::Set(n) => *n,
        }
    }

    /// Speculative result. `Remove` clamps at zero.
    pub fn apply(&self, current: u64) -> u64 {
        match self {
            Self::Add(n) => current.saturating_add(*n),
            Self::Remove(n) => current.saturating_sub(*n),
            Self::Set(n) => *n,
        }
    }

    /// Authoritative result, `None` when the change would drive the count
    /// below zero (or overflow).
    pub fn checked_apply(&self, current: u64) -> Option<u64> {
        match self {
            Self::Add(n) => current.checked_add(*n),
            Self::Remove(n) => current.checked_sub(*n),
            Self::Set(n) => Some(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Move to another category, appended unless `index` is given.
    Recategorize {
        target: Category,
        index: Option<usize>,
    },
    /// Move within `category`; refused if the entity has left it.
    Reorder {
        category: Category,
        target_index: usize,
    },
    AdjustCount(CountChange),
}

impl MutationKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Recategorize { .. } => "recategorize",
            Self::Reorder { .. } => "reorder",
            Self::AdjustCount(_) => "adjust-count",
        }
    }

    pub fn is_positional(&self) -> bool {
        !matches!(self, Self::AdjustCount(_))
    }
}

/// One user action's intended change. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    id: MutationId,
    entity_id: EntityId,
    kind: MutationKind,
}

impl MutationDescriptor {
    pub fn new(entity_id: EntityId, kind: MutationKind) -> Self {
        Self {
            id: MutationId::new(),
            entity_id,
            kind,
        }
    }

    pub fn recategorize(entity_id: EntityId, target: Category, index: Option<usize>) -> Self {
        Self::new(entity_id, MutationKind::Recategorize { target, index })
    }

    pub fn reorder(entity_id: EntityId, category: Category, target_index: usize) -> Self {
        Self::new(
            entity_id,
            MutationKind::Reorder {
                category,
                target_index,
            },
        )
    }

    pub fn adjust_count(entity_id: EntityId, change: CountChange) -> Self {
        Self::new(entity_id, MutationKind::AdjustCount(change))
    }

    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn kind(&self) -> &MutationKind {
        &self.kind
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
