//! In-process execution store, for tests and single-run hosts.

use super::{insert_record, latest_with_status, patch_record, records_of, ExecutionStore, StoreError};
use crate::execution::{
    ExecutionId, ExecutionPatch, ExecutionRecord, ExecutionStatus, NewExecution,
};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Execution store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<Vec<ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first.
    pub async fn snapshot(&self) -> Vec<ExecutionRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, new: NewExecution) -> Result<ExecutionId, StoreError> {
        let mut records = self.records.write().await;
        Ok(insert_record(&mut records, new))
    }

    async fn update(
        &self,
        id: ExecutionId,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, StoreError> {
        let mut records = self.records.write().await;
        patch_record(&mut records, id, &patch)
    }

    async fn get(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_latest(
        &self,
        migration_id: &str,
        status: ExecutionStatus,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(latest_with_status(&self.records.read().await, migration_id, status))
    }

    async fn list(&self, migration_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(records_of(&self.records.read().await, migration_id))
    }
}
