//! Persistence for execution records.
//!
//! The engine only talks to the [`ExecutionStore`] trait. Two backends ship
//! with the crate: [`InMemoryExecutionStore`] for tests and embedded use, and
//! [`JsonFileExecutionStore`] which keeps the history in a JSON file written
//! atomically.

mod file;
mod memory;

pub use file::JsonFileExecutionStore;
pub use memory::InMemoryExecutionStore;

use crate::execution::{
    ExecutionId, ExecutionPatch, ExecutionRecord, ExecutionStatus, NewExecution, TransitionError,
};
use crate::migration::MigrationDirection;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Execution record not found: {0}")]
    NotFound(ExecutionId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Storage boundary for execution records.
///
/// Implementations must apply patches through [`ExecutionRecord::apply`] so
/// the state machine holds regardless of backend.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a new `pending` record and return its id.
    async fn create(&self, new: NewExecution) -> Result<ExecutionId, StoreError>;

    /// Apply a patch and return the updated record.
    async fn update(
        &self,
        id: ExecutionId,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, StoreError>;

    async fn get(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError>;

    /// Most recently created record of a migration with the given status.
    async fn find_latest(
        &self,
        migration_id: &str,
        status: ExecutionStatus,
    ) -> Result<Option<ExecutionRecord>, StoreError>;

    /// All records of a migration, oldest first.
    async fn list(&self, migration_id: &str) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Most recent non-terminal record of a migration in the given direction.
pub async fn find_interrupted(
    store: &dyn ExecutionStore,
    migration_id: &str,
    direction: MigrationDirection,
) -> Result<Option<ExecutionRecord>, StoreError> {
    Ok(store
        .list(migration_id)
        .await?
        .into_iter()
        .rev()
        .find(|r| r.direction == direction && !r.is_terminal()))
}

/// Append a new record to an ordered history.
fn insert_record(records: &mut Vec<ExecutionRecord>, new: NewExecution) -> ExecutionId {
    let id = ExecutionId::generate();
    records.push(new.into_record(id, Utc::now()));
    id
}

/// Patch a record in place within an ordered history.
fn patch_record(
    records: &mut [ExecutionRecord],
    id: ExecutionId,
    patch: &ExecutionPatch,
) -> Result<ExecutionRecord, StoreError> {
    let record = records
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or(StoreError::NotFound(id))?;
    record.apply(patch, Utc::now())?;
    Ok(record.clone())
}

fn latest_with_status(
    records: &[ExecutionRecord],
    migration_id: &str,
    status: ExecutionStatus,
) -> Option<ExecutionRecord> {
    records
        .iter()
        .rev()
        .find(|r| r.migration_id == migration_id && r.status == status)
        .cloned()
}

fn records_of(records: &[ExecutionRecord], migration_id: &str) -> Vec<ExecutionRecord> {
    records
        .iter()
        .filter(|r| r.migration_id == migration_id)
        .cloned()
        .collect()
}
