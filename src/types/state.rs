//! Acquisition thread lifecycle state

use serde::{Deserialize, Serialize};

/// Lifecycle of a stream session's acquisition thread.
///
/// `Starting` and `Stopping` are only observable while `start`/`stop` run;
/// both calls leave the session in `Running` or `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ThreadState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ThreadState::Stopped => "stopped",
            ThreadState::Starting => "starting",
            ThreadState::Running => "running",
            ThreadState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}
