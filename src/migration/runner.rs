//! Batch runner for driving migrations to a terminal state.

use super::cancel::CancellationSignal;
use super::types::{BatchError, BatchResult, Migration, MigrationContext, MigrationDirection};
use crate::error::EngineError;
use crate::execution::{
    ExecutionPatch, ExecutionRecord, ExecutionStatus, FailureCause, NewExecution,
    TransitionError,
};
use crate::guard::{ConcurrencyGuard, GuardLease};
use crate::store::{find_interrupted, ExecutionStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Batch size used when a migration gives no hint.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Where a forward run starts from.
enum ForwardStart {
    Drive(ExecutionRecord),
    AlreadyCompleted(ExecutionRecord),
}

/// Runner for executing migrations batch by batch.
///
/// Progress is persisted after every batch and before the next one is
/// dispatched, so a crash loses at most the batch that was in flight.
pub struct BatchRunner {
    store: Arc<dyn ExecutionStore>,
    guard: Arc<dyn ConcurrencyGuard>,
    default_batch_size: usize,
}

impl BatchRunner {
    /// Create a new runner over the given store and guard.
    pub fn new(store: Arc<dyn ExecutionStore>, guard: Arc<dyn ConcurrencyGuard>) -> Self {
        Self {
            store,
            guard,
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn default_batch_size(&self) -> usize {
        self.default_batch_size
    }

    /// Take the concurrency guard for a migration or fail with `AlreadyRunning`.
    pub fn lease(&self, migration_id: &str) -> Result<GuardLease, EngineError> {
        GuardLease::acquire(Arc::clone(&self.guard), migration_id)
    }

    /// Drive a migration to a terminal state.
    ///
    /// With `resume_from`, that record is continued from its last persisted
    /// cursor. Without it, a forward run resumes an interrupted forward
    /// record if there is one, returns the latest completed record if it has
    /// not been reversed, and otherwise starts a new record. A reverse run
    /// without `resume_from` can only resume an interrupted reversal; new
    /// reversals go through the reversal coordinator, which picks the target.
    pub async fn execute(
        &self,
        migration: Arc<dyn Migration>,
        direction: MigrationDirection,
        resume_from: Option<ExecutionRecord>,
        cancel: &CancellationSignal,
    ) -> Result<ExecutionRecord, EngineError> {
        let lease = self.lease(migration.identity())?;
        self.execute_leased(&lease, migration.as_ref(), direction, resume_from, cancel)
            .await
    }

    /// Same as [`BatchRunner::execute`] for a caller already holding the lease.
    pub(crate) async fn execute_leased(
        &self,
        lease: &GuardLease,
        migration: &dyn Migration,
        direction: MigrationDirection,
        resume_from: Option<ExecutionRecord>,
        cancel: &CancellationSignal,
    ) -> Result<ExecutionRecord, EngineError> {
        debug_assert_eq!(lease.migration_id(), migration.identity());

        let record = match resume_from {
            Some(record) => self.reuse(migration, direction, record).await?,
            None => match direction {
                MigrationDirection::Forward => match self.forward_start(migration).await? {
                    ForwardStart::Drive(record) => record,
                    ForwardStart::AlreadyCompleted(record) => return Ok(record),
                },
                MigrationDirection::Reverse => {
                    find_interrupted(self.store.as_ref(), migration.identity(), direction)
                        .await?
                        .ok_or_else(|| {
                            EngineError::NothingToReverse(migration.identity().to_string())
                        })?
                }
            },
        };

        self.drive(lease, migration, record, cancel).await
    }

    /// Reload a caller-supplied record and check that it can be continued.
    async fn reuse(
        &self,
        migration: &dyn Migration,
        direction: MigrationDirection,
        record: ExecutionRecord,
    ) -> Result<ExecutionRecord, EngineError> {
        let current = self.store.get(record.id).await?;

        if current.migration_id != migration.identity()
            || current.direction != direction
            || current.is_terminal()
        {
            return Err(TransitionError {
                execution_id: current.id,
                reason: format!(
                    "cannot continue {} {} execution of {} as a {} run of {}",
                    current.status,
                    current.direction,
                    current.migration_id,
                    direction,
                    migration.identity()
                ),
            }
            .into());
        }

        Ok(current)
    }

    async fn forward_start(&self, migration: &dyn Migration) -> Result<ForwardStart, EngineError> {
        let migration_id = migration.identity();
        let store = self.store.as_ref();

        if let Some(reversal) =
            find_interrupted(store, migration_id, MigrationDirection::Reverse).await?
        {
            return Err(EngineError::Interrupted {
                migration_id: migration_id.to_string(),
                execution_id: reversal.id,
                direction: reversal.direction,
            });
        }

        if let Some(interrupted) =
            find_interrupted(store, migration_id, MigrationDirection::Forward).await?
        {
            return Ok(ForwardStart::Drive(interrupted));
        }

        if let Some(completed) = store
            .find_latest(migration_id, ExecutionStatus::Completed)
            .await?
        {
            // Reversals always target the latest completion, so only the
            // latest reversal can have undone it
            let reversed = store
                .find_latest(migration_id, ExecutionStatus::Reversed)
                .await?
                .is_some_and(|r| r.reverses == Some(completed.id));
            if !reversed {
                info!(
                    migration = %migration_id,
                    execution = %completed.id,
                    "Migration already completed, nothing to run"
                );
                return Ok(ForwardStart::AlreadyCompleted(completed));
            }
        }

        let execution_id = store.create(NewExecution::forward(migration_id)).await?;
        Ok(ForwardStart::Drive(store.get(execution_id).await?))
    }

    /// Loop over batches until the record reaches a terminal state.
    ///
    /// The lease is refreshed after every batch, before anything is written,
    /// so a lock-file guard does not expire a run that is still progressing.
    async fn drive(
        &self,
        lease: &GuardLease,
        migration: &dyn Migration,
        mut record: ExecutionRecord,
        cancel: &CancellationSignal,
    ) -> Result<ExecutionRecord, EngineError> {
        let direction = record.direction;
        let ctx = MigrationContext {
            migration_id: record.migration_id.clone(),
            execution_id: record.id,
            direction,
            batch_size: migration
                .batch_size()
                .filter(|size| *size > 0)
                .unwrap_or(self.default_batch_size),
        };

        if record.status == ExecutionStatus::Pending {
            let mut patch = ExecutionPatch::transition(direction.active_status());
            if record.items_total.is_none() {
                match migration.estimate_total(&ctx).await {
                    Ok(total) => patch.items_total = total,
                    Err(e) => warn!(
                        migration = %ctx.migration_id,
                        error = %e,
                        "Could not estimate total, continuing without it"
                    ),
                }
            }
            record = self.store.update(record.id, patch).await?;

            info!(
                migration = %ctx.migration_id,
                execution = %record.id,
                direction = %direction,
                total = ?record.items_total,
                "Starting migration"
            );
        } else {
            info!(
                migration = %ctx.migration_id,
                execution = %record.id,
                direction = %direction,
                processed = record.items_processed,
                "Resuming migration from last persisted cursor"
            );
        }

        lease.refresh()?;
        loop {
            if cancel.is_cancelled() {
                warn!(
                    migration = %ctx.migration_id,
                    execution = %record.id,
                    processed = record.items_processed,
                    "Migration cancelled"
                );
                let record = self.finish_failed(&record, FailureCause::cancelled()).await?;
                return Err(EngineError::Cancelled {
                    record: Box::new(record),
                });
            }

            let step = match direction {
                MigrationDirection::Forward => {
                    migration.run_batch(&ctx, record.cursor.as_ref()).await
                }
                MigrationDirection::Reverse => {
                    migration.reverse_batch(&ctx, record.cursor.as_ref()).await
                }
            };

            // Once the lease is lost the record belongs to the new owner
            lease.refresh()?;

            let batch = match step {
                Ok(batch) => batch,
                Err(BatchError::NotImplemented(operation)) => {
                    let reason = format!("{} is not implemented", operation);
                    error!(migration = %ctx.migration_id, execution = %record.id, %reason, "Contract violation");
                    let record = self
                        .finish_failed(&record, FailureCause::contract_violation(&reason))
                        .await?;
                    return Err(EngineError::ContractViolation {
                        migration_id: record.migration_id.clone(),
                        reason,
                        record: Some(Box::new(record)),
                    });
                }
                Err(source) => {
                    error!(
                        migration = %ctx.migration_id,
                        execution = %record.id,
                        error = %source,
                        "Batch failed"
                    );
                    let record = self
                        .finish_failed(&record, FailureCause::batch_error(source.to_string()))
                        .await?;
                    return Err(EngineError::BatchExecution {
                        record: Box::new(record),
                        source,
                    });
                }
            };

            let patch = progress_patch(&record, &batch);
            record = self.store.update(record.id, patch).await?;

            debug!(
                migration = %ctx.migration_id,
                execution = %record.id,
                batch = batch.processed_count,
                processed = record.items_processed,
                total = ?record.items_total,
                "Batch persisted"
            );

            if batch.done {
                info!(
                    migration = %ctx.migration_id,
                    execution = %record.id,
                    status = %record.status,
                    processed = record.items_processed,
                    "Migration finished"
                );
                return Ok(record);
            }
        }
    }

    async fn finish_failed(
        &self,
        record: &ExecutionRecord,
        cause: FailureCause,
    ) -> Result<ExecutionRecord, EngineError> {
        let message = cause.message.clone();
        let patch =
            ExecutionPatch::transition(record.direction.failure_status()).with_failure(cause);

        match self.store.update(record.id, patch).await {
            Ok(record) => Ok(record),
            Err(e) => {
                error!(
                    migration = %record.migration_id,
                    execution = %record.id,
                    cause = %message,
                    error = %e,
                    "Could not persist failure, record stays resumable"
                );
                Err(e.into())
            }
        }
    }
}

/// Counters and cursor to persist after a successful batch.
fn progress_patch(record: &ExecutionRecord, batch: &BatchResult) -> ExecutionPatch {
    let direction = record.direction;
    let processed = record.items_processed.saturating_add(batch.processed_count);

    // A total is written once; later batch hints are ignored
    let mut total = record.items_total.or(batch.total);
    if let Some(known) = total {
        if processed > known {
            warn!(
                migration = %record.migration_id,
                execution = %record.id,
                total = known,
                processed,
                "Processed more items than the known total, raising it"
            );
            total = Some(processed);
        }
    } else if batch.done {
        total = Some(processed);
    }

    ExecutionPatch {
        status: Some(if batch.done {
            direction.success_status()
        } else {
            direction.active_status()
        }),
        items_total: total,
        items_processed: Some(processed),
        cursor: batch.next_cursor.clone(),
        failure: None,
    }
}
