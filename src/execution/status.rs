//! Execution status values and the transitions allowed between them.

use crate::migration::MigrationDirection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown execution status: {0}")]
pub struct UnknownStatus(pub String);

/// Status of an execution record.
///
/// Unknown values are rejected when a record is deserialized, so every
/// status seen by the engine is one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Reversing,
    Reversed,
    ReversalFailed,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 7] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Reversing,
        Self::Reversed,
        Self::ReversalFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Reversing => "reversing",
            Self::Reversed => "reversed",
            Self::ReversalFailed => "reversal_failed",
        }
    }

    /// Terminal records are never revised.
    pub fn is_terminal(self) -> bool {
        match self {
            Self::Completed | Self::Failed | Self::Reversed | Self::ReversalFailed => true,
            Self::Pending | Self::Running | Self::Reversing => false,
        }
    }

    /// Whether a batch is (or was, before a crash) being driven.
    pub fn is_active(self) -> bool {
        match self {
            Self::Running | Self::Reversing => true,
            Self::Pending
            | Self::Completed
            | Self::Failed
            | Self::Reversed
            | Self::ReversalFailed => false,
        }
    }

    /// Whether a record of the given direction may move from `self` to `next`.
    pub fn can_transition(self, next: ExecutionStatus, direction: MigrationDirection) -> bool {
        use ExecutionStatus::*;

        match direction {
            MigrationDirection::Forward => matches!(
                (self, next),
                (Pending, Running) | (Running, Running) | (Running, Completed) | (Running, Failed)
            ),
            MigrationDirection::Reverse => matches!(
                (self, next),
                (Pending, Reversing)
                    | (Reversing, Reversing)
                    | (Reversing, Reversed)
                    | (Reversing, ReversalFailed)
            ),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl MigrationDirection {
    /// Status while batches are being driven.
    pub fn active_status(self) -> ExecutionStatus {
        match self {
            Self::Forward => ExecutionStatus::Running,
            Self::Reverse => ExecutionStatus::Reversing,
        }
    }

    pub fn success_status(self) -> ExecutionStatus {
        match self {
            Self::Forward => ExecutionStatus::Completed,
            Self::Reverse => ExecutionStatus::Reversed,
        }
    }

    pub fn failure_status(self) -> ExecutionStatus {
        match self {
            Self::Forward => ExecutionStatus::Failed,
            Self::Reverse => ExecutionStatus::ReversalFailed,
        }
    }
}
