//! Execution records and their state machine.
//!
//! Every attempt to run or reverse a migration is tracked by its own
//! [`ExecutionRecord`]. Records move through [`ExecutionStatus`] values and
//! are never revised once terminal; a reversal is a new record pointing at
//! the forward record it undoes.

mod record;
mod status;

pub use record::{
    ExecutionId, ExecutionPatch, ExecutionRecord, FailureCause, FailureKind, NewExecution,
    TransitionError,
};
pub use status::{ExecutionStatus, UnknownStatus};
