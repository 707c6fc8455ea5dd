//! Reversal coordinator: picks the forward execution to undo and drives it.

use super::cancel::CancellationSignal;
use super::registry::MigrationRegistry;
use super::runner::BatchRunner;
use super::types::{MigrationDirection, Reversibility};
use crate::error::EngineError;
use crate::execution::{ExecutionRecord, ExecutionStatus, NewExecution};
use crate::store::{find_interrupted, ExecutionStore};
use std::sync::Arc;
use tracing::info;

pub struct ReversalCoordinator {
    registry: Arc<MigrationRegistry>,
    runner: Arc<BatchRunner>,
}

impl ReversalCoordinator {
    pub fn new(registry: Arc<MigrationRegistry>, runner: Arc<BatchRunner>) -> Self {
        Self { registry, runner }
    }

    /// Undo the latest completed, not yet reversed, forward run of a migration.
    ///
    /// An interrupted reversal is resumed instead of starting a new one.
    /// Forward-only migrations are rejected before the guard is taken.
    pub async fn reverse(
        &self,
        migration_id: &str,
        cancel: &CancellationSignal,
    ) -> Result<ExecutionRecord, EngineError> {
        let migration = self.registry.get(migration_id)?;

        if migration.reversibility() == Reversibility::ForwardOnly {
            return Err(EngineError::UnsupportedOperation(migration_id.to_string()));
        }

        let lease = self.runner.lease(migration_id)?;
        let store = self.runner.store().as_ref();

        if let Some(forward) =
            find_interrupted(store, migration_id, MigrationDirection::Forward).await?
        {
            return Err(EngineError::Interrupted {
                migration_id: migration_id.to_string(),
                execution_id: forward.id,
                direction: forward.direction,
            });
        }

        let record = match find_interrupted(store, migration_id, MigrationDirection::Reverse).await? {
            Some(record) => record,
            None => {
                let target = store
                    .find_latest(migration_id, ExecutionStatus::Completed)
                    .await?
                    .ok_or_else(|| EngineError::NothingToReverse(migration_id.to_string()))?;

                // Every reversal targets the latest completion at the time,
                // so the latest reversal is the only one that can match
                let already_reversed = store
                    .find_latest(migration_id, ExecutionStatus::Reversed)
                    .await?
                    .is_some_and(|r| r.reverses == Some(target.id));
                if already_reversed {
                    return Err(EngineError::NothingToReverse(migration_id.to_string()));
                }

                info!(
                    migration = %migration_id,
                    target = %target.id,
                    "Reversing completed execution"
                );

                let new = NewExecution::reverse(migration_id, target.id)
                    .with_total(Some(target.items_processed))
                    .with_cursor(migration.reverse_start(target.cursor.as_ref()));
                let execution_id = store.create(new).await?;
                store.get(execution_id).await?
            }
        };

        self.runner
            .execute_leased(
                &lease,
                migration.as_ref(),
                MigrationDirection::Reverse,
                Some(record),
                cancel,
            )
            .await
    }
}
