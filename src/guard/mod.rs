//! Mutual exclusion per migration identity.
//!
//! A [`ConcurrencyGuard`] admits at most one run (forward or reverse) of a
//! migration at a time. The engine holds a [`GuardLease`] for the whole run;
//! dropping the lease releases the guard, which covers early returns, errors
//! and a caller dropping the run future.

mod local;
mod lock_file;

pub use local::LocalGuard;
pub use lock_file::LockFileGuard;

use crate::error::EngineError;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Lease for migration {0} is no longer held")]
    LeaseLost(String),
}

/// Per-identity mutual exclusion.
///
/// Both operations are synchronous so a lease can be released from `Drop`.
pub trait ConcurrencyGuard: Send + Sync {
    /// Try to take the guard. Returns `false` if it is already held.
    fn try_acquire(&self, migration_id: &str) -> Result<bool, GuardError>;

    fn release(&self, migration_id: &str) -> Result<(), GuardError>;

    /// Mark a held guard as still in use.
    ///
    /// Guards that expire abandoned holders must not expire one that keeps
    /// refreshing. Fails with `LeaseLost` once the guard is no longer ours.
    fn refresh(&self, _migration_id: &str) -> Result<(), GuardError> {
        Ok(())
    }
}

/// Held guard for one migration identity. Released on drop.
pub struct GuardLease {
    guard: Arc<dyn ConcurrencyGuard>,
    migration_id: String,
}

impl GuardLease {
    /// Acquire the guard or fail with `AlreadyRunning`. Never retries.
    pub fn acquire(
        guard: Arc<dyn ConcurrencyGuard>,
        migration_id: &str,
    ) -> Result<Self, EngineError> {
        if !guard.try_acquire(migration_id)? {
            return Err(EngineError::AlreadyRunning(migration_id.to_string()));
        }

        Ok(Self {
            guard,
            migration_id: migration_id.to_string(),
        })
    }

    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub fn refresh(&self) -> Result<(), GuardError> {
        self.guard.refresh(&self.migration_id)
    }
}

impl Drop for GuardLease {
    fn drop(&mut self) {
        if let Err(e) = self.guard.release(&self.migration_id) {
            warn!(migration = %self.migration_id, error = %e, "Failed to release concurrency guard");
        }
    }
}

impl std::fmt::Debug for GuardLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardLease")
            .field("migration_id", &self.migration_id)
            .finish()
    }
}
