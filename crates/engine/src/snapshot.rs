use std::collections::HashMap;

use tracing::{debug, warn};

use assetline_core::{Category, EntityId, MutationDescriptor, MutationId, MutationKind};

use crate::cache::GroupedView;
use crate::speculate;

/// Where an entity sat, and what it counted, at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub category: Category,
    pub index: usize,
    pub count: Option<u64>,
}

impl Slot {
    fn of(view: &GroupedView, id: &EntityId) -> Option<Self> {
        let (category, index) = view.position(id)?;
        let count = view.get(id).and_then(|e| e.count);
        Some(Self {
            category,
            index,
            count,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotHandle(MutationId);

impl SnapshotHandle {
    pub fn mutation_id(&self) -> MutationId {
        self.0
    }
}

/// What the store confirmed for a mutation, used as the new base for any
/// mutations stacked after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmed {
    Category(Category),
    Order,
    Count(u64),
}

struct SnapshotRecord {
    seq: u64,
    entity_id: EntityId,
    kind: MutationKind,
    before: Slot,
    landing: Option<Slot>,
}

/// Arena of pre-mutation snapshots keyed by mutation id.
///
/// Restores are scoped to the one entity a mutation touched. When several
/// in-flight mutations are stacked on the same entity, a restore undoes only
/// its own contribution:
/// - position changes are absolute, so the visible slot is the landing slot of
///   the last surviving one (or the base snapshot when none survive);
/// - count changes are deltas, so the visible count is the base count folded
///   through the surviving changes in order.
#[derive(Default)]
pub struct SnapshotManager {
    records: HashMap<MutationId, SnapshotRecord>,
    chains: HashMap<EntityId, Vec<MutationId>>,
    next_seq: u64,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_live(&self, handle: SnapshotHandle) -> bool {
        self.records.contains_key(&handle.0)
    }

    pub fn pending_for(&self, entity_id: &EntityId) -> usize {
        self.chains.get(entity_id).map_or(0, Vec::len)
    }

    /// Capture the entity's slot before `descriptor` is applied. `None` when
    /// the entity is not in the view.
    pub fn take(&mut self, view: &GroupedView, descriptor: &MutationDescriptor) -> Option<SnapshotHandle> {
        let before = Slot::of(view, descriptor.entity_id())?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(
            descriptor.id(),
            SnapshotRecord {
                seq,
                entity_id: descriptor.entity_id().clone(),
                kind: descriptor.kind().clone(),
                before,
                landing: None,
            },
        );
        self.chains
            .entry(descriptor.entity_id().clone())
            .or_default()
            .push(descriptor.id());
        Some(SnapshotHandle(descriptor.id()))
    }

    /// Record where the speculative update put the entity.
    pub fn record_landing(&mut self, handle: SnapshotHandle, view: &GroupedView) {
        if let Some(record) = self.records.get_mut(&handle.0) {
            record.landing = Slot::of(view, &record.entity_id);
        }
    }

    /// Drop a snapshot without touching any view.
    pub fn discard(&mut self, handle: SnapshotHandle) {
        self.detach(handle.0);
    }

    /// Remove the record from the arena and its entity chain, returning it with
    /// the ids of the mutations stacked after it.
    fn detach(&mut self, id: MutationId) -> Option<(SnapshotRecord, Vec<MutationId>)> {
        let record = self.records.remove(&id)?;
        let mut later = Vec::new();
        if let Some(chain) = self.chains.get_mut(&record.entity_id) {
            if let Some(pos) = chain.iter().position(|m| *m == id) {
                chain.remove(pos);
                later = chain[pos..].to_vec();
            }
            if chain.is_empty() {
                self.chains.remove(&record.entity_id);
            }
        }
        Some((record, later))
    }

    fn next_positional(&self, later: &[MutationId]) -> Option<MutationId> {
        later
            .iter()
            .copied()
            .find(|m| self.records.get(m).is_some_and(|r| r.kind.is_positional()))
    }

    /// Re-base the count snapshots of `later` onto `base` and return the
    /// count they fold to.
    fn refold_counts(&mut self, later: &[MutationId], base: u64) -> u64 {
        let mut value = base;
        for id in later {
            if let Some(record) = self.records.get_mut(id)
                && let MutationKind::AdjustCount(change) = record.kind
            {
                record.before.count = Some(value);
                value = change.apply(value);
            }
        }
        value
    }

    /// Undo a failed mutation's effect on `view`.
    pub fn restore(&mut self, handle: SnapshotHandle, view: &GroupedView) -> GroupedView {
        let Some((record, later)) = self.detach(handle.0) else {
            warn!(mutation_id = %handle.0, "restore of unknown snapshot ignored");
            return view.clone();
        };
        if view.get(&record.entity_id).is_none() {
            warn!(mutation_id = %handle.0, entity_id = %record.entity_id, "entity left the cache before rollback");
            return view.clone();
        }

        match record.kind {
            MutationKind::AdjustCount(_) => {
                let Some(base) = record.before.count else {
                    return view.clone();
                };
                let value = self.refold_counts(&later, base);
                debug!(mutation_id = %handle.0, entity_id = %record.entity_id, count = value, "count restored");
                speculate::set_count(view, &record.entity_id, value)
            }
            _ => match self.next_positional(&later) {
                Some(successor) => {
                    // The successor now builds directly on our starting point.
                    if let Some(next) = self.records.get_mut(&successor) {
                        next.before.category = record.before.category.clone();
                        next.before.index = record.before.index;
                    }
                    debug!(mutation_id = %handle.0, %successor, "position rollback deferred to successor");
                    view.clone()
                }
                None => {
                    debug!(
                        mutation_id = %handle.0,
                        entity_id = %record.entity_id,
                        category = %record.before.category,
                        index = record.before.index,
                        "position restored"
                    );
                    speculate::place(
                        view,
                        &record.entity_id,
                        &record.before.category,
                        record.before.index,
                    )
                }
            },
        }
    }

    /// Retire a confirmed mutation, folding the store's answer into `view` and
    /// into the snapshots of anything stacked after it.
    pub fn reconcile(&mut self, handle: SnapshotHandle, view: &GroupedView, confirmed: &Confirmed) -> GroupedView {
        let Some((record, later)) = self.detach(handle.0) else {
            warn!(mutation_id = %handle.0, "reconcile of unknown snapshot ignored");
            return view.clone();
        };
        if view.get(&record.entity_id).is_none() {
            return view.clone();
        }
        let landing = record.landing.clone().unwrap_or_else(|| record.before.clone());

        match confirmed {
            Confirmed::Count(value) => {
                let folded = self.refold_counts(&later, *value);
                speculate::set_count(view, &record.entity_id, folded)
            }
            Confirmed::Category(category) => {
                let base_index = if landing.category == *category {
                    landing.index
                } else {
                    view.lane(category).len()
                };
                match self.next_positional(&later) {
                    Some(successor) => {
                        if let Some(next) = self.records.get_mut(&successor) {
                            next.before.category = category.clone();
                            next.before.index = base_index;
                        }
                        view.clone()
                    }
                    None => speculate::recategorize(view, &record.entity_id, category, None),
                }
            }
            Confirmed::Order => {
                if let Some(successor) = self.next_positional(&later)
                    && let Some(next) = self.records.get_mut(&successor)
                {
                    next.before.category = landing.category;
                    next.before.index = landing.index;
                }
                view.clone()
            }
        }
    }

    /// Re-apply every live speculation, oldest first, on top of freshly loaded
    /// server data. Snapshots are re-taken from the fresh view as they go.
    ///
    /// Mutations for which `settled` holds are not re-applied: their effect is
    /// already in `fresh`, or will never be.
    pub fn replay(&mut self, fresh: GroupedView, settled: impl Fn(MutationId) -> bool) -> GroupedView {
        let mut order: Vec<(u64, MutationId)> =
            self.records.iter().map(|(id, r)| (r.seq, *id)).collect();
        order.sort_unstable();

        let mut view = fresh;
        for (_, id) in order {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            let Some(before) = Slot::of(&view, &record.entity_id) else {
                warn!(mutation_id = %id, entity_id = %record.entity_id, "pending mutation lost its entity on reload");
                continue;
            };
            record.before = before;
            if settled(id) {
                record.landing = Some(record.before.clone());
                continue;
            }
            view = speculate::apply(&view, &record.entity_id, &record.kind);
            record.landing = Slot::of(&view, &record.entity_id);
        }
        view
    }
}
