//! Execution status shared by workflow instances and step executions.

use serde::{Deserialize, Serialize};

/// Execution status of a workflow instance or a single step execution.
///
/// The discriminant order matters: every terminal status compares greater
/// than `Running`, which is how the driver counts settled children.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Status {
    #[default]
    Unknown,
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl Status {
    /// True once no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Status {
    /// Parse a status name; unrecognized values map to `Unknown`.
    #[must_use]
    pub fn from_name(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Completed" => Self::Completed,
            "Failed" => Self::Failed,
            "Skipped" => Self::Skipped,
            _ => Self::Unknown,
        }
    }
}
