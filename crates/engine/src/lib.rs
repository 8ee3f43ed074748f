pub mod audit;
pub mod cache;
pub mod commit;
pub mod config;
pub mod dispatcher;
pub mod drag;
pub mod error;
pub mod notify;
pub mod snapshot;
pub mod speculate;

pub use audit::AuditAppender;
pub use cache::{EntityCache, GroupedView, Lane};
pub use commit::Committer;
pub use config::EngineConfig;
pub use dispatcher::{
    AuditOutcome, CommitDispatcher, CommitFailure, CommitOutcome, CommitState, PendingCommit,
    Resolution, Settlement,
};
pub use drag::{DragController, DragPhase, DragSession, DropTarget};
pub use error::EngineError;
pub use notify::{Notification, NotificationKind, Notifier, TracingNotifier};
pub use snapshot::{Confirmed, SnapshotHandle, SnapshotManager, Slot};

use tracing::{debug, info, warn};

use assetline_core::{Category, CountChange, Entity, EntityId, MutationDescriptor, MutationId};
use assetline_storage::RemoteStore;

/// Owns the cache and drives every mutation against it.
///
/// The engine itself never awaits the network while borrowed. A mutation is
/// started with one of the synchronous entry points, which apply the change to
/// the cache and hand back a [`PendingCommit`]. The caller runs that through a
/// [`Committer`] and feeds the [`Resolution`] back through [`Engine::settle`].
/// [`Engine::run`] does both for the single-commit case.
pub struct Engine {
    config: EngineConfig,
    cache: EntityCache,
    dispatcher: CommitDispatcher,
    drag: DragController,
    committer: Committer,
    notifier: Box<dyn Notifier>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        columns: Vec<Category>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            cache: EntityCache::with_columns(columns),
            dispatcher: CommitDispatcher::new(config.low_stock_warnings),
            drag: DragController::new(),
            committer: Committer::new(&config),
            notifier,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn drag_phase(&self) -> &DragPhase {
        self.drag.phase()
    }

    pub fn state(&self, id: MutationId) -> Option<CommitState> {
        self.dispatcher.state(id)
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub fn live_snapshots(&self) -> usize {
        self.dispatcher.snapshots().live_count()
    }

    /// Replace the cached entities with a fresh load. Mutations still in
    /// flight stay applied on top.
    pub fn refresh(&mut self, entities: Vec<Entity>) {
        self.drag.lift_preview(&mut self.cache);
        self.reap();
        self.dispatcher.refresh(&mut self.cache, entities);
        self.drag.reanchor(&mut self.cache);
        debug!(entities = self.cache.view().len(), version = self.cache.version(), "cache loaded");
    }

    pub async fn load_from<R: RemoteStore + ?Sized>(&mut self, remote: &R) -> Result<(), EngineError> {
        let entities = remote.load_entities().await?;
        self.refresh(entities);
        Ok(())
    }

    pub fn begin_drag(&mut self, entity_id: &EntityId) -> Result<(), EngineError> {
        self.drag.begin(&self.cache, entity_id)
    }

    pub fn drag_over(&mut self, category: &Category) -> Result<(), EngineError> {
        self.drag.drag_over(&mut self.cache, category)
    }

    /// Release the dragged card. Returns the commit to run, or `None` when
    /// the drop changed nothing or was outside any target.
    pub fn drop_on(&mut self, target: Option<DropTarget>) -> Result<Option<PendingCommit>, EngineError> {
        match self.drag.drop(&mut self.cache, target)? {
            Some(descriptor) => self.submit(descriptor).map(Some),
            None => Ok(None),
        }
    }

    pub fn cancel_drag(&mut self) -> Result<(), EngineError> {
        self.drag.cancel(&mut self.cache)
    }

    /// Move an entity to the end of `target`, as the status picker does.
    pub fn recategorize(&mut self, entity_id: &EntityId, target: Category) -> Result<PendingCommit, EngineError> {
        self.submit(MutationDescriptor::recategorize(entity_id.clone(), target, None))
    }

    pub fn reorder(&mut self, entity_id: &EntityId, target_index: usize) -> Result<PendingCommit, EngineError> {
        let (category, _) = self
            .cache
            .view()
            .position(entity_id)
            .ok_or_else(|| EngineError::EntityNotFound(entity_id.to_string()))?;
        self.submit(MutationDescriptor::reorder(entity_id.clone(), category, target_index))
    }

    pub fn adjust_count(&mut self, entity_id: &EntityId, change: CountChange) -> Result<PendingCommit, EngineError> {
        self.submit(MutationDescriptor::adjust_count(entity_id.clone(), change))
    }

    /// Speculatively apply `descriptor` and hand it out for persistence.
    pub fn submit(&mut self, descriptor: MutationDescriptor) -> Result<PendingCommit, EngineError> {
        self.drag.lift_preview(&mut self.cache);
        self.reap();
        let begun = self.dispatcher.begin(&mut self.cache, descriptor);
        self.drag.reanchor(&mut self.cache);
        self.dispatcher.dispatch(begun?)
    }

    /// A handle for running commits without borrowing the engine.
    pub fn committer(&self) -> Committer {
        self.committer.clone()
    }

    pub fn settle(&mut self, resolution: Resolution) -> Result<Vec<Settlement>, EngineError> {
        self.drag.lift_preview(&mut self.cache);
        let settled = self.dispatcher.settle(&mut self.cache, resolution);
        self.drag.reanchor(&mut self.cache);
        let settled = settled?;
        self.announce(&settled);
        Ok(settled)
    }

    /// Commit one pending mutation and settle it.
    pub async fn run<R: RemoteStore + ?Sized>(
        &mut self,
        remote: &R,
        pending: PendingCommit,
    ) -> Result<Vec<Settlement>, EngineError> {
        let committer = self.committer.clone();
        let resolution = committer.execute(remote, pending).await;
        self.settle(resolution)
    }

    /// Abort the persistence call for `id`. Its outcome still needs settling.
    pub fn cancel(&mut self, id: MutationId) -> bool {
        self.dispatcher.cancel(id)
    }

    /// The owning view is going away: drop any drag and roll back everything
    /// still unsettled.
    pub fn teardown(&mut self) -> Vec<Settlement> {
        if self.drag.is_active()
            && let Err(e) = self.drag.cancel(&mut self.cache)
        {
            warn!(error = %e, "drag could not be cancelled on teardown");
        }
        let settled = self.dispatcher.cancel_all(&mut self.cache);
        info!(settled = settled.len(), "engine torn down");
        self.announce(&settled);
        settled
    }

    /// Forget mutations that already settled. Outcomes arriving for them
    /// afterwards are reported as unknown.
    pub fn prune_settled(&mut self) {
        self.dispatcher.prune();
    }

    /// Roll back commits whose [`PendingCommit`] was dropped unrun.
    fn reap(&mut self) {
        let settled = self.dispatcher.reap(&mut self.cache);
        self.announce(&settled);
    }

    fn announce(&self, settled: &[Settlement]) {
        for notification in settled.iter().flat_map(|s| &s.notifications) {
            self.notifier.notify(notification.kind, &notification.message);
        }
    }
}
