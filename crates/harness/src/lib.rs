mod network;
mod peer;

pub use network::{Fault, ScriptedRemote};
pub use peer::{init_tracing, RecordingNotifier, TestClient};
