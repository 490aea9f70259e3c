//! Instance status as reported to the host.

use serde::Serialize;

/// Status of a cloud instance.
///
/// `ScheduledToStart` also covers "starting": it is kept until the platform
/// gives a first positive signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Unknown,
    ScheduledToStart,
    Running,
    ScheduledToStop,
    Stopping,
    Stopped,
    ScheduledToRestart,
    Restarting,
    Error,
    ErrorCannotStop,
}

impl InstanceStatus {
    /// Stable statuses, not caused by an operation in flight.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ScheduledToStart => "scheduled_to_start",
            Self::Running => "running",
            Self::ScheduledToStop => "scheduled_to_stop",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ScheduledToRestart => "scheduled_to_restart",
            Self::Restarting => "restarting",
            Self::Error => "error",
            Self::ErrorCannotStop => "error_cannot_stop",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
