use serde::{Deserialize, Serialize};

use crate::ids::{Category, EntityId};

/// A record mirrored from the remote store: a work order on the board or a
/// spare part in inventory.
///
/// `count` is only present for counter-style entities (parts). It is unsigned,
/// so a negative stock level cannot be represented at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub category: Category,
    pub count: Option<u64>,
    pub min_threshold: Option<u64>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, category: impl Into<Category>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            category: category.into(),
            count: None,
            min_threshold: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_min_threshold(mut self, threshold: u64) -> Self {
        self.min_threshold = Some(threshold);
        self
    }

    /// True when the part is at or below its reorder threshold.
    pub fn is_low_stock(&self) -> bool {
        match (self.count, self.min_threshold) {
            (Some(count), Some(min)) => count <= min,
            _ => false,
        }
    }
}

/// Partial update for a cached entity. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPatch {
    pub category: Option<Category>,
    pub count: Option<u64>,
}

impl EntityPatch {
    pub fn category(category: impl Into<Category>) -> Self {
        Self {
            category: Some(category.into()),
            count: None,
        }
    }

    pub fn count(count: u64) -> Self {
        Self {
            category: None,
            count: Some(count),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.count.is_none()
    }
}
