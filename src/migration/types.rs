//! Types for the migration contract.

use crate::execution::ExecutionId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error raised by a migration while estimating or processing a batch.
#[derive(Error, Debug)]
pub enum BatchError {
    /// The migration does not provide the named operation.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl BatchError {
    /// Build a batch error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wrap any error raised by migration code.
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }
}

impl From<anyhow::Error> for BatchError {
    fn from(error: anyhow::Error) -> Self {
        Self::Other(error.into())
    }
}

impl From<std::io::Error> for BatchError {
    fn from(error: std::io::Error) -> Self {
        Self::Other(Box::new(error))
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(error: serde_json::Error) -> Self {
        Self::Other(Box::new(error))
    }
}

/// Direction a migration is driven in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    /// Applying the migration.
    Forward,
    /// Undoing a previously completed forward run.
    Reverse,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => write!(f, "forward"),
            Self::Reverse => write!(f, "reverse"),
        }
    }
}

/// Whether a migration can be undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversibility {
    Reversible,
    /// The migration has no reverse step; reversal requests are rejected.
    ForwardOnly,
}

/// Opaque resumption token.
///
/// Only the migration that produced a cursor interprets it. The engine stores
/// and hands it back unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Encode a structured position as a cursor.
    pub fn encode<T: Serialize>(position: &T) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::to_string(position)?))
    }

    /// Decode a cursor previously produced by [`Cursor::encode`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Work units completed by this batch.
    pub processed_count: u64,
    /// Where the next batch starts. `None` keeps the previously persisted cursor.
    pub next_cursor: Option<Cursor>,
    /// Whether the migration has no more work in this direction.
    pub done: bool,
    /// Total work units, when the migration only discovers it while running.
    pub total: Option<u64>,
}

impl BatchResult {
    /// A batch after which more work remains.
    pub fn next(processed_count: u64, next_cursor: Cursor) -> Self {
        Self {
            processed_count,
            next_cursor: Some(next_cursor),
            done: false,
            total: None,
        }
    }

    /// The final batch.
    pub fn finished(processed_count: u64) -> Self {
        Self {
            processed_count,
            next_cursor: None,
            done: true,
            total: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.next_cursor = Some(cursor);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

/// Information handed to every contract call.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    pub migration_id: String,
    pub execution_id: ExecutionId,
    pub direction: MigrationDirection,
    /// Effective batch size: the migration's hint or the engine default.
    pub batch_size: usize,
}

/// Trait implemented by every migration.
///
/// A migration is a named unit of batched work. The engine calls
/// `run_batch` (or `reverse_batch`) repeatedly, persisting the returned
/// cursor after every call. After a crash the last persisted cursor is handed
/// back, so a batch may run more than once and must be safe to repeat.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Stable, unique name. Changing it orphans the execution history.
    fn identity(&self) -> &str;

    /// Human-readable description of what this migration does.
    fn description(&self) -> &str {
        ""
    }

    /// Preferred number of items per batch.
    fn batch_size(&self) -> Option<usize> {
        None
    }

    fn reversibility(&self) -> Reversibility {
        Reversibility::Reversible
    }

    /// Best-effort count of work units.
    async fn estimate_total(&self, _ctx: &MigrationContext) -> Result<Option<u64>, BatchError> {
        Ok(None)
    }

    /// Perform one bounded unit of forward work starting at `cursor`.
    async fn run_batch(
        &self,
        ctx: &MigrationContext,
        cursor: Option<&Cursor>,
    ) -> Result<BatchResult, BatchError>;

    /// Undo one bounded unit of a previous forward run.
    async fn reverse_batch(
        &self,
        _ctx: &MigrationContext,
        _cursor: Option<&Cursor>,
    ) -> Result<BatchResult, BatchError> {
        Err(BatchError::NotImplemented("reverse_batch"))
    }

    /// Starting cursor for a reversal, given the final cursor of the forward
    /// run being undone. `None` starts the reverse traversal from scratch.
    fn reverse_start(&self, _forward_cursor: Option<&Cursor>) -> Option<Cursor> {
        None
    }
}
