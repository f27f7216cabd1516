use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a supervised app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Not known yet: before the first start and right after every start.
    #[default]
    Unknown,
    Running,
    /// Polling detected a failure: crash, hang, stale output or an unhealthy watchdog.
    Error,
    /// Stopped by the supervisor, termination confirmed.
    Stopped,
    /// The app exited on its own.
    Ended,
}

impl RunStatus {
    /// Terminal states stay until the next start.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Error | RunStatus::Stopped | RunStatus::Ended)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Unknown => "UNKNOWN",
            RunStatus::Running => "RUNNING",
            RunStatus::Error => "ERROR",
            RunStatus::Stopped => "STOPPED",
            RunStatus::Ended => "ENDED",
        };
        f.write_str(name)
    }
}
