//! Component and project status machines (spec §3, §4.1).

use std::sync::Arc;

use crate::error::HubError;

/// A component's (or project's) runtime status. The `Error` variant carries
/// the last observed failure so the health monitor can build a structured
/// list of component errors without re-querying each component.
#[derive(Clone, Debug)]
pub enum Status {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error(Arc<HubError>),
}

impl Status {
    pub fn is_running(&self) -> bool {
        matches!(self, Status::Running)
    }

    pub fn is_terminal_stopped(&self) -> bool {
        matches!(self, Status::Stopped)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Error(_) => "error",
        }
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.label() == other.label()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
