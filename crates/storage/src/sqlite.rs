use std::cell::RefCell;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::debug;

use assetline_core::{
    hlc::{Hlc, HlcClock},
    AuditEntry, AuditId, AuditRecord, Category, CountAction, CountChange, CountReceipt, Entity,
    EntityId, MutationId, MutationKind,
};

use crate::error::StorageError;
use crate::traits::RemoteStore;

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn to_u64(value: i64, label: &str) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative {label}: {value}")))
}

fn to_i64(value: u64, label: &str) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::ConstraintViolation(format!("{label} out of range: {value}")))
}

/// Authoritative store backed by SQLite.
///
/// Stands in for the remote relational database: it owns the real counter
/// values, validates transitions against them, stamps audit rows with its own
/// clock and deduplicates re-sent mutations through `mutation_log`.
pub struct SqliteStore {
    conn: Connection,
    clock: RefCell<HlcClock>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            clock: RefCell::new(HlcClock::new()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            clock: RefCell::new(HlcClock::new()),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn tick(&self) -> Result<Hlc, StorageError> {
        Ok(self.clock.borrow_mut().tick()?)
    }

    /// Seed or overwrite an entity. Entities originate outside the engine.
    pub fn insert_entity(&self, entity: &Entity) -> Result<(), StorageError> {
        let count = entity.count.map(|c| to_i64(c, "count")).transpose()?;
        let min = entity
            .min_threshold
            .map(|c| to_i64(c, "min_threshold"))
            .transpose()?;
        let hlc = self.tick()?;
        self.conn.execute(
            "INSERT OR REPLACE INTO entities (entity_id, name, category, count, min_threshold, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entity.id.as_str(),
                entity.name,
                entity.category.as_str(),
                count,
                min,
                &hlc.to_bytes()[..],
            ],
        )?;
        Ok(())
    }

    pub fn get_entity(&self, entity_id: &EntityId) -> Result<Option<Entity>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, name, category, count, min_threshold FROM entities WHERE entity_id = ?1",
        )?;
        let mut rows = stmt.query(rusqlite::params![entity_id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(read_entity(row)?)),
            None => Ok(None),
        }
    }

    /// All entities in insertion order.
    pub fn list_entities(&self) -> Result<Vec<Entity>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, name, category, count, min_threshold FROM entities ORDER BY rowid",
        )?;
        let mut rows = stmt.query([])?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(read_entity(row)?);
        }
        Ok(entities)
    }

    fn require_entity(&self, entity_id: &EntityId) -> Result<Entity, StorageError> {
        self.get_entity(entity_id)?
            .ok_or_else(|| StorageError::NotFound(format!("entity {entity_id}")))
    }

    /// Change an entity's category. Replays of the same mutation id return the
    /// category recorded the first time.
    pub fn recategorize(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        target: &Category,
    ) -> Result<Category, StorageError> {
        let logged: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT result_category FROM mutation_log WHERE mutation_id = ?1",
                rusqlite::params![mutation_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(category) = logged {
            debug!(%mutation_id, %entity_id, "recategorize replayed from mutation log");
            return category
                .map(Category::from)
                .ok_or_else(|| StorageError::Serialization("logged recategorize without category".into()));
        }

        self.require_entity(entity_id)?;
        let hlc = self.tick()?;
        let payload = rmp_serde::to_vec(&MutationKind::Recategorize {
            target: target.clone(),
            index: None,
        })
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE entities SET category = ?1, updated_at = ?2 WHERE entity_id = ?3",
            rusqlite::params![target.as_str(), &hlc.to_bytes()[..], entity_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO mutation_log (mutation_id, entity_id, op_type, payload, result_category, applied_at)
             VALUES (?1, ?2, 'recategorize', ?3, ?4, ?5)",
            rusqlite::params![
                mutation_id.as_bytes().as_slice(),
                entity_id.as_str(),
                payload,
                target.as_str(),
                &hlc.to_bytes()[..],
            ],
        )?;
        tx.commit()?;
        Ok(target.clone())
    }

    /// Apply a counter transition against the stored value inside one
    /// transaction. A transition that would leave the count negative is
    /// rejected and nothing is written.
    pub fn adjust_count(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        change: CountChange,
    ) -> Result<CountReceipt, StorageError> {
        let tx = self.conn.unchecked_transaction()?;

        let logged: Option<(Option<i64>, Option<i64>)> = tx
            .query_row(
                "SELECT previous_value, resulting_value FROM mutation_log WHERE mutation_id = ?1",
                rusqlite::params![mutation_id.as_bytes().as_slice()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((Some(previous), Some(resulting))) = logged {
            debug!(%mutation_id, %entity_id, "count adjustment replayed from mutation log");
            return Ok(CountReceipt {
                previous_value: to_u64(previous, "previous_value")?,
                resulting_value: to_u64(resulting, "resulting_value")?,
            });
        }

        let current: Option<Option<i64>> = tx
            .query_row(
                "SELECT count FROM entities WHERE entity_id = ?1",
                rusqlite::params![entity_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let current = match current {
            None => return Err(StorageError::NotFound(format!("entity {entity_id}"))),
            Some(None) => {
                return Err(StorageError::ConstraintViolation(format!(
                    "entity {entity_id} has no quantity"
                )));
            }
            Some(Some(value)) => to_u64(value, "count")?,
        };

        let resulting = change.checked_apply(current).ok_or_else(|| {
            StorageError::ConstraintViolation(format!(
                "{} {} would leave {entity_id} below zero (current {current})",
                change.action().as_str(),
                change.amount(),
            ))
        })?;

        let hlc = self.tick()?;
        let payload = rmp_serde::to_vec(&MutationKind::AdjustCount(change))
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tx.execute(
            "UPDATE entities SET count = ?1, updated_at = ?2 WHERE entity_id = ?3",
            rusqlite::params![to_i64(resulting, "count")?, &hlc.to_bytes()[..], entity_id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO mutation_log (mutation_id, entity_id, op_type, payload, previous_value, resulting_value, applied_at)
             VALUES (?1, ?2, 'adjust-count', ?3, ?4, ?5, ?6)",
            rusqlite::params![
                mutation_id.as_bytes().as_slice(),
                entity_id.as_str(),
                payload,
                to_i64(current, "previous_value")?,
                to_i64(resulting, "resulting_value")?,
                &hlc.to_bytes()[..],
            ],
        )?;
        tx.commit()?;

        Ok(CountReceipt {
            previous_value: current,
            resulting_value: resulting,
        })
    }

    pub fn append_audit(&self, entry: &AuditEntry) -> Result<AuditRecord, StorageError> {
        self.require_entity(&entry.entity_id)?;
        let record = AuditRecord {
            id: AuditId::new(),
            entity_id: entry.entity_id.clone(),
            change_amount: entry.change_amount,
            resulting_value: entry.resulting_value,
            action: entry.action,
            performed_by: entry.performed_by.clone(),
            timestamp: self.tick()?,
        };
        self.conn.execute(
            "INSERT INTO audit_log (audit_id, entity_id, change_amount, resulting_value, action, performed_by, hlc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.id.as_bytes().as_slice(),
                record.entity_id.as_str(),
                record.change_amount,
                to_i64(record.resulting_value, "resulting_value")?,
                record.action.as_str(),
                record.performed_by.as_str(),
                &record.timestamp.to_bytes()[..],
            ],
        )?;
        Ok(record)
    }

    /// Audit trail for one entity, oldest first.
    pub fn audit_records(&self, entity_id: &EntityId) -> Result<Vec<AuditRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT audit_id, entity_id, change_amount, resulting_value, action, performed_by, hlc
             FROM audit_log WHERE entity_id = ?1 ORDER BY hlc",
        )?;
        let mut rows = stmt.query(rusqlite::params![entity_id.as_str()])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(read_audit(row)?);
        }
        Ok(records)
    }

    pub fn mutation_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM mutation_log", [], |row| row.get(0))?;
        to_u64(count, "mutation count")
    }

    /// Decode the logged mutation kinds for an entity, oldest first.
    pub fn logged_mutations(&self, entity_id: &EntityId) -> Result<Vec<MutationKind>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT payload FROM mutation_log WHERE entity_id = ?1 ORDER BY applied_at, rowid",
        )?;
        let mut rows = stmt.query(rusqlite::params![entity_id.as_str()])?;
        let mut kinds = Vec::new();
        while let Some(row) = rows.next()? {
            let bytes: Vec<u8> = row.get(0)?;
            let kind = rmp_serde::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            kinds.push(kind);
        }
        Ok(kinds)
    }
}

fn read_entity(row: &Row) -> Result<Entity, StorageError> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let category: String = row.get(2)?;
    let count: Option<i64> = row.get(3)?;
    let min_threshold: Option<i64> = row.get(4)?;
    Ok(Entity {
        id: EntityId::from(id),
        name,
        category: Category::from(category),
        count: count.map(|c| to_u64(c, "count")).transpose()?,
        min_threshold: min_threshold.map(|c| to_u64(c, "min_threshold")).transpose()?,
    })
}

fn read_audit(row: &Row) -> Result<AuditRecord, StorageError> {
    let id_bytes: Vec<u8> = row.get(0)?;
    let entity_id: String = row.get(1)?;
    let change_amount: i64 = row.get(2)?;
    let resulting_value: i64 = row.get(3)?;
    let action: String = row.get(4)?;
    let performed_by: String = row.get(5)?;
    let hlc_bytes: Vec<u8> = row.get(6)?;
    Ok(AuditRecord {
        id: AuditId::from_bytes(to_array::<16>(id_bytes, "audit_id")?),
        entity_id: EntityId::from(entity_id),
        change_amount,
        resulting_value: to_u64(resulting_value, "resulting_value")?,
        action: CountAction::parse(&action)?,
        performed_by: performed_by.into(),
        timestamp: Hlc::from_bytes(&to_array::<12>(hlc_bytes, "hlc")?),
    })
}

#[async_trait(?Send)]
impl RemoteStore for SqliteStore {
    async fn load_entities(&self) -> Result<Vec<Entity>, StorageError> {
        self.list_entities()
    }

    async fn persist_recategorize(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        target: &Category,
    ) -> Result<Category, StorageError> {
        self.recategorize(mutation_id, entity_id, target)
    }

    async fn persist_count_adjust(
        &self,
        mutation_id: MutationId,
        entity_id: &EntityId,
        change: CountChange,
    ) -> Result<CountReceipt, StorageError> {
        self.adjust_count(mutation_id, entity_id, change)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<AuditRecord, StorageError> {
        SqliteStore::append_audit(self, entry)
    }
}
