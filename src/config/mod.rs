use crate::engine::MigrationEngine;
use crate::guard::{ConcurrencyGuard, LocalGuard, LockFileGuard};
use crate::migration::{BatchRunner, MigrationRegistry, DEFAULT_BATCH_SIZE};
use crate::store::{ExecutionStore, InMemoryExecutionStore, JsonFileExecutionStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Where execution records are persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoreConfig {
    /// Process memory; history is lost on exit
    #[default]
    Memory,
    /// A JSON file rewritten atomically on every update
    JsonFile { path: PathBuf },
}

/// How concurrent runs of the same migration are excluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GuardConfig {
    /// Exclusion within this process only
    #[default]
    Local,
    /// Lock files in a directory shared by every process running migrations
    LockFile {
        dir: PathBuf,
        /// Locks older than this are considered abandoned. Unset: never.
        #[serde(
            rename = "staleAfterSecs",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        stale_after_secs: Option<u64>,
    },
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Batch size for migrations that give no hint of their own.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub guard: GuardConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            store: StoreConfig::default(),
            guard: GuardConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn build_store(&self) -> Arc<dyn ExecutionStore> {
        match &self.store {
            StoreConfig::Memory => Arc::new(InMemoryExecutionStore::new()),
            StoreConfig::JsonFile { path } => Arc::new(JsonFileExecutionStore::new(path)),
        }
    }

    pub fn build_guard(&self) -> Arc<dyn ConcurrencyGuard> {
        match &self.guard {
            GuardConfig::Local => Arc::new(LocalGuard::new()),
            GuardConfig::LockFile {
                dir,
                stale_after_secs,
            } => {
                let mut guard = LockFileGuard::new(dir);
                if let Some(secs) = stale_after_secs {
                    match stale_after(*secs) {
                        Some(window) => guard = guard.with_stale_after(window),
                        None => warn!(
                            stale_after_secs = *secs,
                            "Lock staleness window is out of range, locks will never be taken over"
                        ),
                    }
                }
                Arc::new(guard)
            }
        }
    }

    /// Wire an engine from this configuration.
    pub fn build_engine(&self, registry: Arc<MigrationRegistry>) -> MigrationEngine {
        let runner = BatchRunner::new(self.build_store(), self.build_guard())
            .with_default_batch_size(self.default_batch_size);
        MigrationEngine::with_runner(registry, runner)
    }
}

/// Read the configuration file
pub async fn read_config(path: &Path) -> Result<Option<EngineConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).await?;
    let config: EngineConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}

/// Write the configuration file
pub async fn write_config(path: &Path, config: &EngineConfig) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content).await?;
    Ok(())
}

/// `None` when the window does not fit in a `chrono::Duration`.
fn stale_after(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}
