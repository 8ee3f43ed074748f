use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use futures::future::{AbortHandle, AbortRegistration};
use tracing::{debug, info, warn};

use assetline_core::{
    AuditRecord, Category, CountReceipt, Entity, EntityId, MutationDescriptor, MutationId,
    MutationKind,
};

use crate::cache::{EntityCache, GroupedView};
use crate::error::EngineError;
use crate::notify::Notification;
use crate::snapshot::{Confirmed, SnapshotHandle, SnapshotManager};
use crate::speculate;

/// Lifecycle of one mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Idle,
    Speculating,
    Committing,
    Reconciled,
    RolledBack,
}

impl CommitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Reconciled | Self::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Speculating => "speculating",
            Self::Committing => "committing",
            Self::Reconciled => "reconciled",
            Self::RolledBack => "rolled-back",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitFailure {
    Rejected(String),
    TimedOut,
    /// `user_initiated` is set when the owning view went away, which is not a
    /// fault worth telling the user about.
    Cancelled { user_initiated: bool },
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => f.write_str(reason),
            Self::TimedOut => f.write_str("the server did not respond in time"),
            Self::Cancelled { .. } => f.write_str("the request was cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Recorded(AuditRecord),
    Failed { attempts: u32, reason: String },
}

/// What came back from the store for one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Recategorized { category: Category },
    Reordered,
    CountAdjusted {
        receipt: CountReceipt,
        audit: AuditOutcome,
    },
    Failed(CommitFailure),
}

/// Ids of commits dropped before they produced a [`Resolution`].
type Abandoned = Rc<RefCell<Vec<MutationId>>>;

/// A speculated mutation handed out for its persistence call.
///
/// Dropping it without resolving it counts as a user cancellation: the
/// dispatcher rolls the mutation back the next time it settles or submits
/// anything.
#[derive(Debug)]
pub struct PendingCommit {
    descriptor: MutationDescriptor,
    registration: Option<AbortRegistration>,
    abandoned: Abandoned,
    resolved: bool,
}

impl PendingCommit {
    pub fn id(&self) -> MutationId {
        self.descriptor.id()
    }

    pub fn descriptor(&self) -> &MutationDescriptor {
        &self.descriptor
    }

    /// The abort registration for the persistence call. Only the first call
    /// gets it.
    pub fn take_registration(&mut self) -> Option<AbortRegistration> {
        self.registration.take()
    }

    /// Close out the commit with what the store said.
    pub fn resolve(mut self, outcome: CommitOutcome) -> Resolution {
        self.resolved = true;
        Resolution {
            mutation_id: self.id(),
            outcome,
        }
    }
}

impl Drop for PendingCommit {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mutation_id = self.id();
        debug!(%mutation_id, "pending commit dropped unresolved");
        if let Ok(mut abandoned) = self.abandoned.try_borrow_mut() {
            abandoned.push(mutation_id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mutation_id: MutationId,
    pub outcome: CommitOutcome,
}

/// A mutation reaching a terminal state, with the toasts it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub mutation_id: MutationId,
    pub entity_id: EntityId,
    pub state: CommitState,
    pub outcome: CommitOutcome,
    pub notifications: Vec<Notification>,
}

struct CommitRecord {
    descriptor: MutationDescriptor,
    state: CommitState,
    handle: SnapshotHandle,
    parked: Option<CommitOutcome>,
    abort: Option<AbortHandle>,
}

/// Drives each mutation through `Speculating → Committing → {Reconciled |
/// RolledBack}`.
///
/// Outcomes for one entity are applied in the order the mutations were
/// speculated. An outcome that arrives ahead of an earlier mutation on the
/// same entity is parked until that mutation settles.
pub struct CommitDispatcher {
    records: HashMap<MutationId, CommitRecord>,
    queues: HashMap<EntityId, VecDeque<MutationId>>,
    snapshots: SnapshotManager,
    abandoned: Abandoned,
    low_stock_warnings: bool,
}

impl CommitDispatcher {
    pub fn new(low_stock_warnings: bool) -> Self {
        Self {
            records: HashMap::new(),
            queues: HashMap::new(),
            snapshots: SnapshotManager::new(),
            abandoned: Abandoned::default(),
            low_stock_warnings,
        }
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn state(&self, id: MutationId) -> Option<CommitState> {
        self.records.get(&id).map(|r| r.state)
    }

    /// Mutations not yet in a terminal state.
    pub fn in_flight(&self) -> usize {
        self.records.values().filter(|r| !r.state.is_terminal()).count()
    }

    /// Forget mutations that reached a terminal state.
    pub fn prune(&mut self) {
        self.records.retain(|_, r| !r.state.is_terminal());
    }

    /// Validate, snapshot and speculatively apply `descriptor`.
    pub fn begin(
        &mut self,
        cache: &mut EntityCache,
        descriptor: MutationDescriptor,
    ) -> Result<MutationId, EngineError> {
        let id = descriptor.id();
        if self.records.contains_key(&id) {
            return Err(EngineError::Validation(format!("mutation {id} was already submitted")));
        }
        validate(cache, &descriptor)?;

        let view = cache.view().clone();
        let handle = self
            .snapshots
            .take(&view, &descriptor)
            .ok_or_else(|| EngineError::EntityNotFound(descriptor.entity_id().to_string()))?;
        let next = speculate::apply(&view, descriptor.entity_id(), descriptor.kind());
        self.snapshots.record_landing(handle, &next);
        cache.set_view(next);

        debug!(
            mutation_id = %id,
            entity_id = %descriptor.entity_id(),
            kind = descriptor.kind().kind_name(),
            "speculative update applied"
        );
        self.queues
            .entry(descriptor.entity_id().clone())
            .or_default()
            .push_back(id);
        self.records.insert(
            id,
            CommitRecord {
                descriptor,
                state: CommitState::Speculating,
                handle,
                parked: None,
                abort: None,
            },
        );
        Ok(id)
    }

    /// Hand out the mutation for its persistence call.
    pub fn dispatch(&mut self, id: MutationId) -> Result<PendingCommit, EngineError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownMutation(id.to_string()))?;
        if record.state != CommitState::Speculating {
            return Err(EngineError::Validation(format!(
                "mutation {id} cannot be dispatched while {}",
                record.state.as_str()
            )));
        }
        let (abort, registration) = AbortHandle::new_pair();
        record.abort = Some(abort);
        record.state = CommitState::Committing;
        debug!(mutation_id = %id, "commit dispatched");
        Ok(PendingCommit {
            descriptor: record.descriptor.clone(),
            registration: Some(registration),
            abandoned: Rc::clone(&self.abandoned),
            resolved: false,
        })
    }

    /// Abort an in-flight persistence call. The call still has to be settled.
    pub fn cancel(&mut self, id: MutationId) -> bool {
        match self.records.get(&id).and_then(|r| r.abort.as_ref()) {
            Some(abort) => {
                abort.abort();
                true
            }
            None => false,
        }
    }

    /// Record a persistence outcome and settle everything it unblocks.
    pub fn settle(
        &mut self,
        cache: &mut EntityCache,
        resolution: Resolution,
    ) -> Result<Vec<Settlement>, EngineError> {
        let Resolution {
            mutation_id,
            outcome,
        } = resolution;
        if !self.records.contains_key(&mutation_id) {
            return Err(EngineError::UnknownMutation(mutation_id.to_string()));
        }
        let mut settled = self.reap(cache);
        let Some(record) = self.records.get_mut(&mutation_id) else {
            return Ok(settled);
        };
        if record.state.is_terminal() {
            debug!(%mutation_id, state = record.state.as_str(), "late outcome ignored");
            return Ok(settled);
        }
        record.parked = Some(outcome);
        let entity_id = record.descriptor.entity_id().clone();

        let drained = self.drain(cache, &entity_id);
        if !drained.iter().any(|s| s.mutation_id == mutation_id) {
            debug!(%mutation_id, %entity_id, "outcome parked behind an earlier mutation");
        }
        settled.extend(drained);
        Ok(settled)
    }

    /// Roll back every commit that was dropped without being resolved, and
    /// settle whatever was queued behind it.
    pub fn reap(&mut self, cache: &mut EntityCache) -> Vec<Settlement> {
        let ids = std::mem::take(&mut *self.abandoned.borrow_mut());
        let mut entities: Vec<EntityId> = Vec::new();
        for id in ids {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if record.state.is_terminal() || record.parked.is_some() {
                continue;
            }
            info!(mutation_id = %id, "abandoned commit treated as cancelled");
            record.abort = None;
            record.parked = Some(CommitOutcome::Failed(CommitFailure::Cancelled {
                user_initiated: true,
            }));
            entities.push(record.descriptor.entity_id().clone());
        }
        entities.sort();
        entities.dedup();

        let mut settled = Vec::new();
        for entity_id in entities {
            settled.extend(self.drain(cache, &entity_id));
        }
        settled
    }

    /// Treat every unsettled mutation as cancelled by the user. Outcomes that
    /// already arrived are kept, since the store has applied them.
    pub fn cancel_all(&mut self, cache: &mut EntityCache) -> Vec<Settlement> {
        self.abandoned.borrow_mut().clear();
        let mut entities: Vec<EntityId> = Vec::new();
        for record in self.records.values_mut() {
            if record.state.is_terminal() {
                continue;
            }
            if let Some(abort) = record.abort.take() {
                abort.abort();
            }
            if record.parked.is_none() {
                record.parked = Some(CommitOutcome::Failed(CommitFailure::Cancelled {
                    user_initiated: true,
                }));
            }
            entities.push(record.descriptor.entity_id().clone());
        }
        entities.sort();
        entities.dedup();

        let mut settled = Vec::new();
        for entity_id in entities {
            settled.extend(self.drain(cache, &entity_id));
        }
        settled
    }

    /// Rebuild the cache from freshly loaded entities, keeping every pending
    /// speculation visible on top of them.
    pub fn refresh(&mut self, cache: &mut EntityCache, entities: Vec<Entity>) {
        let fresh = GroupedView::from_entities(cache.columns(), entities);
        // A parked outcome is final: the store already holds it or never will.
        let records = &self.records;
        let view = self
            .snapshots
            .replay(fresh, |id| records.get(&id).is_some_and(|r| r.parked.is_some()));
        cache.set_view(view);
    }

    fn drain(&mut self, cache: &mut EntityCache, entity_id: &EntityId) -> Vec<Settlement> {
        let mut settled = Vec::new();
        loop {
            let Some(queue) = self.queues.get_mut(entity_id) else {
                break;
            };
            let Some(&head) = queue.front() else {
                self.queues.remove(entity_id);
                break;
            };
            if !self.records.get(&head).is_some_and(|r| r.parked.is_some()) {
                break;
            }
            queue.pop_front();
            if let Some(settlement) = self.finish(cache, head) {
                settled.push(settlement);
            }
        }
        settled
    }

    fn finish(&mut self, cache: &mut EntityCache, id: MutationId) -> Option<Settlement> {
        let record = self.records.get_mut(&id)?;
        let outcome = record.parked.take()?;
        record.abort = None;
        let handle = record.handle;
        let descriptor = record.descriptor.clone();
        let entity_id = descriptor.entity_id().clone();

        let (state, notifications) = match &outcome {
            CommitOutcome::Failed(failure) => {
                let view = self.snapshots.restore(handle, cache.view());
                cache.set_view(view);
                match failure {
                    CommitFailure::Cancelled {
                        user_initiated: true,
                    } => info!(mutation_id = %id, %entity_id, "commit cancelled, rolled back"),
                    _ => warn!(mutation_id = %id, %entity_id, %failure, "commit failed, rolled back"),
                }
                let notifications = failure_notice(cache, &descriptor, failure)
                    .into_iter()
                    .collect();
                (CommitState::RolledBack, notifications)
            }
            success => {
                let confirmed = match success {
                    CommitOutcome::Recategorized { category } => Confirmed::Category(category.clone()),
                    CommitOutcome::CountAdjusted { receipt, .. } => Confirmed::Count(receipt.resulting_value),
                    _ => Confirmed::Order,
                };
                let view = self.snapshots.reconcile(handle, cache.view(), &confirmed);
                cache.set_view(view);
                debug!(mutation_id = %id, %entity_id, "commit reconciled");
                (
                    CommitState::Reconciled,
                    success_notices(cache, &descriptor, success, self.low_stock_warnings),
                )
            }
        };

        if let Some(record) = self.records.get_mut(&id) {
            record.state = state;
        }
        Some(Settlement {
            mutation_id: id,
            entity_id,
            state,
            outcome,
            notifications,
        })
    }
}

fn validate(cache: &EntityCache, descriptor: &MutationDescriptor) -> Result<(), EngineError> {
    let id = descriptor.entity_id();
    let entity = cache
        .get(id)
        .ok_or_else(|| EngineError::EntityNotFound(id.to_string()))?;

    match descriptor.kind() {
        MutationKind::Recategorize { .. } => Ok(()),
        MutationKind::Reorder { category, .. } => {
            if entity.category != *category {
                return Err(EngineError::Validation(format!(
                    "{id} is in {}, not {category}",
                    entity.category
                )));
            }
            Ok(())
        }
        MutationKind::AdjustCount(change) => {
            let current = entity
                .count
                .ok_or_else(|| EngineError::Validation(format!("{id} has no quantity")))?;
            if change.checked_apply(current).is_none() {
                return Err(EngineError::Validation(format!(
                    "cannot {} {} from {id}: only {current} on hand",
                    change.action().as_str(),
                    change.amount()
                )));
            }
            Ok(())
        }
    }
}

fn label(cache: &EntityCache, id: &EntityId) -> String {
    match cache.get(id) {
        Some(entity) if !entity.name.is_empty() => entity.name.clone(),
        _ => id.to_string(),
    }
}

fn failure_notice(
    cache: &EntityCache,
    descriptor: &MutationDescriptor,
    failure: &CommitFailure,
) -> Option<Notification> {
    if matches!(failure, CommitFailure::Cancelled { user_initiated: true }) {
        return None;
    }
    let name = label(cache, descriptor.entity_id());
    let message = match descriptor.kind() {
        MutationKind::Recategorize { target, .. } => {
            format!("Could not move {name} to {target}: {failure}")
        }
        MutationKind::Reorder { .. } => format!("Could not reorder {name}: {failure}"),
        MutationKind::AdjustCount(_) => {
            format!("Could not update quantity for {name}: {failure}")
        }
    };
    Some(Notification::error(message))
}

fn success_notices(
    cache: &EntityCache,
    descriptor: &MutationDescriptor,
    outcome: &CommitOutcome,
    low_stock_warnings: bool,
) -> Vec<Notification> {
    let name = label(cache, descriptor.entity_id());
    let mut notices = Vec::new();
    match outcome {
        CommitOutcome::Recategorized { category } => {
            notices.push(Notification::success(format!("{name} moved to {category}")));
        }
        CommitOutcome::Reordered => {
            notices.push(Notification::success(format!("{name} reordered")));
        }
        CommitOutcome::CountAdjusted { receipt, audit } => {
            notices.push(Notification::success(format!(
                "{name} quantity updated to {}",
                receipt.resulting_value
            )));
            if let AuditOutcome::Failed { attempts, reason } = audit {
                notices.push(Notification::warning(format!(
                    "Quantity for {name} was saved, but the inventory log entry failed after {attempts} attempt(s): {reason}"
                )));
            }
            if low_stock_warnings
                && let Some(min) = cache.get(descriptor.entity_id()).and_then(|e| e.min_threshold)
                && receipt.resulting_value <= min
            {
                notices.push(Notification::warning(format!(
                    "{name} is at or below its minimum stock ({} on hand, minimum {min})",
                    receipt.resulting_value
                )));
            }
        }
        CommitOutcome::Failed(_) => {}
    }
    notices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationKind;
    use assetline_core::{ActorId, AuditId, CountAction, CountChange, Hlc};
    use proptest::prelude::*;

    fn board() -> EntityCache {
        let mut cache = EntityCache::with_columns(vec![
            "Open".into(),
            "In Progress".into(),
            "Completed".into(),
        ]);
        cache.replace_all(vec![
            Entity::new("wo-1", "Open").with_name("Replace belt"),
            Entity::new("wo-2", "Open"),
            Entity::new("p-1", "Parts").with_name("Air filter").with_count(5).with_min_threshold(2),
        ]);
        cache
    }

    fn start(
        dispatcher: &mut CommitDispatcher,
        cache: &mut EntityCache,
        descriptor: MutationDescriptor,
    ) -> PendingCommit {
        let id = dispatcher.begin(cache, descriptor).unwrap();
        dispatcher.dispatch(id).unwrap()
    }

    fn resolve(id: MutationId, outcome: CommitOutcome) -> Resolution {
        Resolution {
            mutation_id: id,
            outcome,
        }
    }

    fn rejected() -> CommitOutcome {
        CommitOutcome::Failed(CommitFailure::Rejected("server said no".into()))
    }

    #[test]
    fn states_progress_to_reconciled() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let id = dispatcher
            .begin(&mut cache, MutationDescriptor::recategorize("wo-1".into(), "In Progress".into(), None))
            .unwrap();
        assert_eq!(dispatcher.state(id), Some(CommitState::Speculating));
        let pending = dispatcher.dispatch(id).unwrap();
        assert_eq!(dispatcher.state(id), Some(CommitState::Committing));

        let settled = dispatcher
            .settle(&mut cache, pending.resolve(CommitOutcome::Recategorized { category: "In Progress".into() }))
            .unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].state, CommitState::Reconciled);
        assert_eq!(settled[0].notifications[0].message, "Replace belt moved to In Progress");
        assert_eq!(dispatcher.snapshots().live_count(), 0);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn terminal_states_ignore_late_outcomes() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let pending = start(&mut dispatcher, &mut cache, MutationDescriptor::recategorize("wo-1".into(), "Completed".into(), None));
        let id = pending.id();
        dispatcher.settle(&mut cache, pending.resolve(rejected())).unwrap();
        let late = dispatcher
            .settle(&mut cache, resolve(id, CommitOutcome::Recategorized { category: "Completed".into() }))
            .unwrap();
        assert!(late.is_empty());
        assert_eq!(dispatcher.state(id), Some(CommitState::RolledBack));
        assert_eq!(cache.get(&"wo-1".into()).unwrap().category.as_str(), "Open");
    }

    #[test]
    fn dispatch_twice_is_refused() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let pending = start(&mut dispatcher, &mut cache, MutationDescriptor::reorder("wo-2".into(), "Open".into(), 0));
        assert!(matches!(dispatcher.dispatch(pending.id()), Err(EngineError::Validation(_))));
    }

    #[test]
    fn resubmitting_a_descriptor_is_refused() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let desc = MutationDescriptor::adjust_count("p-1".into(), CountChange::Add(1));
        dispatcher.begin(&mut cache, desc.clone()).unwrap();
        assert!(matches!(dispatcher.begin(&mut cache, desc), Err(EngineError::Validation(_))));
        assert_eq!(cache.get(&"p-1".into()).unwrap().count, Some(6));
    }

    #[test]
    fn negative_count_is_rejected_before_speculation() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let version = cache.version();
        let err = dispatcher
            .begin(&mut cache, MutationDescriptor::adjust_count("p-1".into(), CountChange::Remove(6)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(cache.version(), version);
        assert_eq!(dispatcher.snapshots().live_count(), 0);
    }

    #[test]
    fn reorder_of_entity_outside_category_is_rejected() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let err = dispatcher
            .begin(&mut cache, MutationDescriptor::reorder("wo-1".into(), "Completed".into(), 0))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn out_of_order_outcome_is_parked() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(false);
        let first = start(&mut dispatcher, &mut cache, MutationDescriptor::adjust_count("p-1".into(), CountChange::Remove(2)));
        let second = start(&mut dispatcher, &mut cache, MutationDescriptor::adjust_count("p-1".into(), CountChange::Add(4)));
        let second_id = second.id();
        assert_eq!(cache.get(&"p-1".into()).unwrap().count, Some(7));

        let receipt = |previous, resulting| CountReceipt {
            previous_value: previous,
            resulting_value: resulting,
        };
        let recorded = |value| AuditOutcome::Recorded(AuditRecord {
            id: AuditId::new(),
            entity_id: "p-1".into(),
            change_amount: 0,
            resulting_value: value,
            action: CountAction::Add,
            performed_by: ActorId::from("tech"),
            timestamp: Hlc::new(1, 0),
        });

        let parked = dispatcher
            .settle(&mut cache, second.resolve(CommitOutcome::CountAdjusted { receipt: receipt(5, 9), audit: recorded(9) }))
            .unwrap();
        assert!(parked.is_empty());
        assert_eq!(dispatcher.state(second_id), Some(CommitState::Committing));

        let settled = dispatcher
            .settle(&mut cache, first.resolve(CommitOutcome::Failed(CommitFailure::TimedOut)))
            .unwrap();
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].state, CommitState::RolledBack);
        assert_eq!(settled[1].state, CommitState::Reconciled);
        assert_eq!(settled[0].notifications[0].kind, NotificationKind::Error);
        assert_eq!(cache.get(&"p-1".into()).unwrap().count, Some(9));
    }

    #[test]
    fn cancel_all_rolls_back_silently() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let pending = start(&mut dispatcher, &mut cache, MutationDescriptor::recategorize("wo-2".into(), "Completed".into(), None));
        assert!(dispatcher.cancel(pending.id()));

        let settled = dispatcher.cancel_all(&mut cache);
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].state, CommitState::RolledBack);
        assert!(settled[0].notifications.is_empty());
        assert_eq!(cache.view().position(&"wo-2".into()), Some(("Open".into(), 1)));
    }

    #[test]
    fn low_stock_warning_follows_reconciled_value() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let pending = start(&mut dispatcher, &mut cache, MutationDescriptor::adjust_count("p-1".into(), CountChange::Remove(3)));
        let settled = dispatcher
            .settle(
                &mut cache,
                pending.resolve(CommitOutcome::CountAdjusted {
                    receipt: CountReceipt { previous_value: 5, resulting_value: 2 },
                    audit: AuditOutcome::Failed { attempts: 3, reason: "log offline".into() },
                }),
            )
            .unwrap();
        let kinds: Vec<_> = settled[0].notifications.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![NotificationKind::Success, NotificationKind::Warning, NotificationKind::Warning]
        );
        assert_eq!(settled[0].state, CommitState::Reconciled);
    }

    #[test]
    fn dropped_commit_is_rolled_back_and_unblocks_its_successor() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(false);
        let dropped = start(&mut dispatcher, &mut cache, MutationDescriptor::adjust_count("p-1".into(), CountChange::Add(1)));
        let dropped_id = dropped.id();
        let next = start(&mut dispatcher, &mut cache, MutationDescriptor::adjust_count("p-1".into(), CountChange::Add(1)));
        drop(dropped);

        let settled = dispatcher
            .settle(
                &mut cache,
                next.resolve(CommitOutcome::CountAdjusted {
                    receipt: CountReceipt { previous_value: 5, resulting_value: 6 },
                    audit: AuditOutcome::Failed { attempts: 1, reason: "not recorded".into() },
                }),
            )
            .unwrap();
        let states: Vec<_> = settled.iter().map(|s| (s.mutation_id, s.state)).collect();
        assert_eq!(states[0], (dropped_id, CommitState::RolledBack));
        assert_eq!(states[1].1, CommitState::Reconciled);
        assert!(settled[0].notifications.is_empty());
        assert_eq!(cache.get(&"p-1".into()).unwrap().count, Some(6));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[test]
    fn reap_without_drops_settles_nothing() {
        let mut cache = board();
        let mut dispatcher = CommitDispatcher::new(true);
        let pending = start(&mut dispatcher, &mut cache, MutationDescriptor::recategorize("wo-1".into(), "Completed".into(), None));
        assert!(dispatcher.reap(&mut cache).is_empty());
        assert_eq!(dispatcher.state(pending.id()), Some(CommitState::Committing));
    }

    fn change_strategy() -> impl Strategy<Value = CountChange> {
        prop_oneof![
            (0..6u64).prop_map(CountChange::Add),
            (0..6u64).prop_map(CountChange::Remove),
            (0..12u64).prop_map(CountChange::Set),
        ]
    }

    proptest! {
        /// Whatever order the answers come back in, once everything has
        /// settled the cache shows what the store holds.
        #[test]
        fn settled_count_matches_store(
            ops in proptest::collection::vec((change_strategy(), any::<bool>()), 1..12),
            seed in any::<u64>(),
        ) {
            let mut cache = board();
            let mut dispatcher = CommitDispatcher::new(false);
            let id: EntityId = "p-1".into();
            let mut server = 5u64;
            let mut resolutions = Vec::new();

            for (change, succeeds) in ops {
                let Ok(mutation_id) = dispatcher.begin(&mut cache, MutationDescriptor::adjust_count(id.clone(), change)) else {
                    continue;
                };
                let pending = dispatcher.dispatch(mutation_id).unwrap();
                let outcome = match change.checked_apply(server) {
                    Some(next) if succeeds => {
                        let receipt = CountReceipt { previous_value: server, resulting_value: next };
                        server = next;
                        CommitOutcome::CountAdjusted {
                            receipt,
                            audit: AuditOutcome::Failed { attempts: 1, reason: "not recorded".into() },
                        }
                    }
                    _ => rejected(),
                };
                resolutions.push(pending.resolve(outcome));
            }

            // deterministic shuffle
            let mut state = seed | 1;
            for i in (1..resolutions.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                resolutions.swap(i, (state % (i as u64 + 1)) as usize);
            }

            for resolution in resolutions {
                dispatcher.settle(&mut cache, resolution).unwrap();
            }
            prop_assert_eq!(cache.get(&id).and_then(|e| e.count), Some(server));
            prop_assert_eq!(dispatcher.in_flight(), 0);
            prop_assert_eq!(dispatcher.snapshots().live_count(), 0);
        }
    }
}
