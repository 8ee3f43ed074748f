use std::cell::RefCell;
use std::rc::Rc;

use assetline_core::{Category, Entity, EntityId};
use assetline_engine::{
    Engine, EngineConfig, EngineError, Notification, NotificationKind, Notifier, PendingCommit,
    Settlement,
};
use tracing_subscriber::EnvFilter;

use crate::network::ScriptedRemote;

/// Collects notifications so tests can assert on them.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    log: Rc<RefCell<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.log.borrow().clone()
    }

    pub fn take(&self) -> Vec<Notification> {
        self.log.borrow_mut().drain(..).collect()
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotificationKind, message: &str) {
        self.log.borrow_mut().push(Notification {
            kind,
            message: message.to_string(),
        });
    }
}

/// Install a test log subscriber once. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One client session: an engine, the remote it commits to, and the toasts
/// it raised.
pub struct TestClient {
    pub engine: Engine,
    pub remote: ScriptedRemote,
    pub notifier: RecordingNotifier,
}

impl TestClient {
    pub fn new(columns: &[&str], config: EngineConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_remote(columns, config, ScriptedRemote::in_memory()?)
    }

    pub fn with_remote(
        columns: &[&str],
        config: EngineConfig,
        remote: ScriptedRemote,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let notifier = RecordingNotifier::default();
        let engine = Engine::new(
            config,
            columns.iter().map(|c| Category::from(*c)).collect(),
            Box::new(notifier.clone()),
        )?;
        Ok(Self {
            engine,
            remote,
            notifier,
        })
    }

    /// A work-order board with the usual three columns.
    pub fn board() -> Result<Self, Box<dyn std::error::Error>> {
        Self::new(&["Open", "In Progress", "Completed"], EngineConfig::default())
    }

    /// Store `entities` remotely and load them into the cache.
    pub fn seed(&mut self, entities: Vec<Entity>) -> Result<(), Box<dyn std::error::Error>> {
        for entity in &entities {
            self.remote.store().insert_entity(entity)?;
        }
        self.engine.refresh(self.remote.store().list_entities()?);
        Ok(())
    }

    /// Commit `pending` against the scripted remote and settle it.
    pub async fn commit(&mut self, pending: PendingCommit) -> Result<Vec<Settlement>, EngineError> {
        self.engine.run(&self.remote, pending).await
    }

    pub fn ids_in(&self, category: &str) -> Vec<String> {
        self.engine
            .cache()
            .by_category(&category.into())
            .iter()
            .map(|e| e.id.to_string())
            .collect()
    }

    pub fn position(&self, id: &str) -> Option<(String, usize)> {
        self.engine
            .cache()
            .view()
            .position(&EntityId::from(id))
            .map(|(category, index)| (category.to_string(), index))
    }

    pub fn count(&self, id: &str) -> Option<u64> {
        self.engine.cache().get(&id.into()).and_then(|e| e.count)
    }

    pub fn stored_count(&self, id: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
        Ok(self
            .remote
            .store()
            .get_entity(&id.into())?
            .and_then(|e| e.count))
    }
}
