pub mod audit;
pub mod entity;
pub mod error;
pub mod hlc;
pub mod ids;
pub mod mutation;

pub use audit::{AuditEntry, AuditRecord, CountReceipt};
pub use entity::{Entity, EntityPatch};
pub use error::CoreError;
pub use hlc::Hlc;
pub use ids::*;
pub use mutation::{CountAction, CountChange, MutationDescriptor, MutationKind};
