//! Execution records, the patches applied to them and their identifiers.

use super::status::ExecutionStatus;
use crate::migration::{Cursor, MigrationDirection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Store-assigned identifier of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Rejected mutation of an execution record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid transition for execution {execution_id}: {reason}")]
pub struct TransitionError {
    pub execution_id: ExecutionId,
    pub reason: String,
}

/// Why an execution ended in `failed` or `reversal_failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BatchError,
    Cancelled,
    ContractViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureCause {
    pub fn batch_error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::BatchError,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "cancelled between batches".to_string(),
        }
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ContractViolation,
            message: message.into(),
        }
    }
}

/// Durable state of one attempt to run or reverse a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub migration_id: String,
    pub direction: MigrationDirection,
    /// Forward record undone by this reverse record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses: Option<ExecutionId>,
    pub status: ExecutionStatus,
    pub items_total: Option<u64>,
    pub items_processed: u64,
    /// Last persisted resumption token.
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a patch, enforcing the state machine and the progress counters.
    ///
    /// The record is left untouched when the patch is rejected.
    pub fn apply(&mut self, patch: &ExecutionPatch, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.reject(format!("record is already {}", self.status)));
        }

        if let Some(next) = patch.status {
            if !self.status.can_transition(next, self.direction) {
                return Err(self.reject(format!(
                    "{} -> {} is not allowed for a {} execution",
                    self.status, next, self.direction
                )));
            }
        }

        let processed = patch.items_processed.unwrap_or(self.items_processed);
        if processed < self.items_processed {
            return Err(self.reject(format!(
                "items_processed would decrease from {} to {}",
                self.items_processed, processed
            )));
        }

        let total = patch.items_total.or(self.items_total);
        if let Some(total) = total {
            if processed > total {
                return Err(self.reject(format!(
                    "items_processed {} exceeds items_total {}",
                    processed, total
                )));
            }
        }

        if let Some(next) = patch.status {
            if next.is_active() && self.start_date.is_none() {
                self.start_date = Some(now);
            }
            if next.is_terminal() {
                self.end_date = Some(now);
            }
            self.status = next;
        }
        self.items_processed = processed;
        self.items_total = total;
        if let Some(cursor) = &patch.cursor {
            self.cursor = Some(cursor.clone());
        }
        if let Some(failure) = &patch.failure {
            self.failure = Some(failure.clone());
        }
        self.updated_at = now;

        Ok(())
    }

    fn reject(&self, reason: String) -> TransitionError {
        TransitionError {
            execution_id: self.id,
            reason,
        }
    }
}

/// Fields of a record that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub migration_id: String,
    pub direction: MigrationDirection,
    pub reverses: Option<ExecutionId>,
    pub items_total: Option<u64>,
    pub cursor: Option<Cursor>,
}

impl NewExecution {
    pub fn forward(migration_id: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            direction: MigrationDirection::Forward,
            reverses: None,
            items_total: None,
            cursor: None,
        }
    }

    /// A reversal of the given forward record.
    pub fn reverse(migration_id: impl Into<String>, target: ExecutionId) -> Self {
        Self {
            migration_id: migration_id.into(),
            direction: MigrationDirection::Reverse,
            reverses: Some(target),
            items_total: None,
            cursor: None,
        }
    }

    pub fn with_total(mut self, total: Option<u64>) -> Self {
        self.items_total = total;
        self
    }

    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Materialize the record with a store-assigned id.
    pub fn into_record(self, id: ExecutionId, now: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord {
            id,
            migration_id: self.migration_id,
            direction: self.direction,
            reverses: self.reverses,
            status: ExecutionStatus::Pending,
            items_total: self.items_total,
            items_processed: 0,
            cursor: self.cursor,
            failure: None,
            start_date: None,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of an execution record. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    pub items_total: Option<u64>,
    pub items_processed: Option<u64>,
    pub cursor: Option<Cursor>,
    pub failure: Option<FailureCause>,
}

impl ExecutionPatch {
    pub fn transition(status: ExecutionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_failure(mut self, failure: FailureCause) -> Self {
        self.failure = Some(failure);
        self
    }
}
