//! Error type returned by every engine entry point.

use crate::execution::{ExecutionId, ExecutionRecord, TransitionError};
use crate::guard::GuardError;
use crate::migration::{BatchError, MigrationDirection};
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A migration broke its contract. Carries the record when the violation
    /// was detected mid-run.
    #[error("Migration {migration_id} violated its contract: {reason}")]
    ContractViolation {
        migration_id: String,
        reason: String,
        record: Option<Box<ExecutionRecord>>,
    },

    #[error("Migration {0} does not support reversal")]
    UnsupportedOperation(String),

    #[error("Migration identity registered twice: {0}")]
    DuplicateIdentity(String),

    #[error("Unknown migration: {0}")]
    UnknownMigration(String),

    #[error("Nothing to reverse for migration {0}")]
    NothingToReverse(String),

    #[error("Migration {0} is already running")]
    AlreadyRunning(String),

    /// A run in the opposite direction was interrupted and must be resumed first.
    #[error("Migration {migration_id} has an interrupted {direction} execution {execution_id}; resume it first")]
    Interrupted {
        migration_id: String,
        execution_id: ExecutionId,
        direction: MigrationDirection,
    },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Batch failed for migration {} (execution {}): {source}", .record.migration_id, .record.id)]
    BatchExecution {
        record: Box<ExecutionRecord>,
        source: BatchError,
    },

    #[error("Execution {} of migration {} was cancelled", .record.id, .record.migration_id)]
    Cancelled { record: Box<ExecutionRecord> },

    #[error("Store error: {0}")]
    StoreError(StoreError),

    #[error("Concurrency guard error: {0}")]
    GuardError(#[from] GuardError),
}

impl EngineError {
    /// The execution record left behind by a failed run, if one was created.
    pub fn record(&self) -> Option<&ExecutionRecord> {
        match self {
            Self::ContractViolation { record, .. } => record.as_deref(),
            Self::BatchExecution { record, .. } | Self::Cancelled { record } => Some(&**record),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Transition(e) => Self::InvalidTransition(e),
            other => Self::StoreError(other),
        }
    }
}
