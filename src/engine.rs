//! Host-facing entry points.

use crate::error::EngineError;
use crate::execution::ExecutionRecord;
use crate::guard::ConcurrencyGuard;
use crate::migration::{
    BatchRunner, CancellationSignal, MigrationDirection, MigrationRegistry, ReversalCoordinator,
};
use crate::store::ExecutionStore;
use std::sync::Arc;

/// Runs and reverses registered migrations.
///
/// All collaborators are passed in explicitly; the engine keeps no global
/// state. It is cheap to share behind an `Arc` across tasks.
pub struct MigrationEngine {
    registry: Arc<MigrationRegistry>,
    runner: Arc<BatchRunner>,
    coordinator: ReversalCoordinator,
}

impl MigrationEngine {
    pub fn new(
        registry: Arc<MigrationRegistry>,
        store: Arc<dyn ExecutionStore>,
        guard: Arc<dyn ConcurrencyGuard>,
    ) -> Self {
        Self::with_runner(registry, BatchRunner::new(store, guard))
    }

    pub fn with_runner(registry: Arc<MigrationRegistry>, runner: BatchRunner) -> Self {
        let runner = Arc::new(runner);
        let coordinator = ReversalCoordinator::new(Arc::clone(&registry), Arc::clone(&runner));
        Self {
            registry,
            runner,
            coordinator,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        self.runner.store()
    }

    /// Run a migration forward, resuming an interrupted run if there is one.
    pub async fn run(&self, migration_id: &str) -> Result<ExecutionRecord, EngineError> {
        self.run_with_cancel(migration_id, &CancellationSignal::never())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        migration_id: &str,
        cancel: &CancellationSignal,
    ) -> Result<ExecutionRecord, EngineError> {
        let migration = self.registry.get(migration_id)?;
        self.runner
            .execute(migration, MigrationDirection::Forward, None, cancel)
            .await
    }

    /// Undo the latest completed run of a migration.
    pub async fn reverse(&self, migration_id: &str) -> Result<ExecutionRecord, EngineError> {
        self.reverse_with_cancel(migration_id, &CancellationSignal::never())
            .await
    }

    pub async fn reverse_with_cancel(
        &self,
        migration_id: &str,
        cancel: &CancellationSignal,
    ) -> Result<ExecutionRecord, EngineError> {
        self.coordinator.reverse(migration_id, cancel).await
    }

    /// Every execution record of a migration, oldest first.
    pub async fn history(&self, migration_id: &str) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.store().list(migration_id).await?)
    }

    /// The most recently created execution record of a migration.
    pub async fn status(
        &self,
        migration_id: &str,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        Ok(self.store().list(migration_id).await?.pop())
    }
}
