//! Execution store persisted as a single JSON document.

use super::{insert_record, latest_with_status, patch_record, records_of, ExecutionStore, StoreError};
use crate::execution::{
    ExecutionId, ExecutionPatch, ExecutionRecord, ExecutionStatus, NewExecution,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const SCHEMA_VERSION: u32 = 1;

/// On-disk layout of the execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionLog {
    /// Schema version for future migrations
    schema_version: u32,

    /// When the log was last modified
    updated_at: DateTime<Utc>,

    /// Records in creation order
    records: Vec<ExecutionRecord>,
}

impl ExecutionLog {
    fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            records: Vec::new(),
        }
    }
}

/// Execution store backed by a single JSON file.
///
/// Every mutation is a locked read-modify-write cycle followed by an atomic
/// temp-file rename, so readers never observe a half-written file. The lock is
/// per instance: one process should own a given file.
#[derive(Debug)]
pub struct JsonFileExecutionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileExecutionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_log(&self) -> Result<ExecutionLog, StoreError> {
        if !self.path.exists() {
            return Ok(ExecutionLog::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let log: ExecutionLog = serde_json::from_str(&content)?;
        Ok(log)
    }

    /// Write the log without acquiring the lock (caller must hold it)
    async fn write_log_unlocked(&self, log: &mut ExecutionLog) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        log.updated_at = Utc::now();

        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(log)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for JsonFileExecutionStore {
    async fn create(&self, new: NewExecution) -> Result<ExecutionId, StoreError> {
        let _guard = self.lock.lock().await;

        let mut log = self.read_log().await?;
        let id = insert_record(&mut log.records, new);
        self.write_log_unlocked(&mut log).await?;

        Ok(id)
    }

    async fn update(
        &self,
        id: ExecutionId,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, StoreError> {
        let _guard = self.lock.lock().await;

        let mut log = self.read_log().await?;
        let record = patch_record(&mut log.records, id, &patch)?;
        self.write_log_unlocked(&mut log).await?;

        Ok(record)
    }

    async fn get(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError> {
        self.read_log()
            .await?
            .records
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    async fn find_latest(
        &self,
        migration_id: &str,
        status: ExecutionStatus,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        let log = self.read_log().await?;
        Ok(latest_with_status(&log.records, migration_id, status))
    }

    async fn list(&self, migration_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        let log = self.read_log().await?;
        Ok(records_of(&log.records, migration_id))
    }
}
