#![allow(dead_code)]

use async_trait::async_trait;
use migration_engine::{
    BatchError, BatchResult, ConcurrencyGuard, Cursor, ExecutionId, ExecutionPatch,
    ExecutionRecord, ExecutionStatus, ExecutionStore, InMemoryExecutionStore, LocalGuard,
    Migration, MigrationContext, MigrationEngine, MigrationRegistry, NewExecution,
    Reversibility, StoreError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Pauses a batch until the test lets it continue.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Test migration that processes a fixed list of batch sizes.
///
/// The forward cursor is the index of the next batch; the final forward
/// cursor is the number of batches, which the reverse step counts down from.
pub struct ScriptedMigration {
    id: String,
    batches: Vec<u64>,
    estimate: Option<u64>,
    fail_at: Option<usize>,
    reverse_fail_at: Option<usize>,
    reversibility: Reversibility,
    gate: Mutex<Option<(usize, Arc<Gate>)>>,
    observer: Option<Arc<dyn ExecutionStore>>,
    delay: Option<Duration>,
    pub forward_calls: Mutex<Vec<usize>>,
    pub reverse_calls: AtomicUsize,
    /// Record state seen at the start of each forward batch
    pub snapshots: Mutex<Vec<ExecutionRecord>>,
}

impl ScriptedMigration {
    pub fn new(id: &str, batches: Vec<u64>) -> Self {
        Self {
            id: id.to_string(),
            batches,
            estimate: None,
            fail_at: None,
            reverse_fail_at: None,
            reversibility: Reversibility::Reversible,
            gate: Mutex::new(None),
            observer: None,
            delay: None,
            forward_calls: Mutex::new(Vec::new()),
            reverse_calls: AtomicUsize::new(0),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn with_estimate(mut self, total: u64) -> Self {
        self.estimate = Some(total);
        self
    }

    pub fn failing_at(mut self, batch: usize) -> Self {
        self.fail_at = Some(batch);
        self
    }

    pub fn reverse_failing_at(mut self, batch: usize) -> Self {
        self.reverse_fail_at = Some(batch);
        self
    }

    pub fn forward_only(mut self) -> Self {
        self.reversibility = Reversibility::ForwardOnly;
        self
    }

    /// Block the forward batch at `index` once, until `gate.release` fires.
    pub fn gated_at(self, index: usize, gate: Arc<Gate>) -> Self {
        *self.gate.lock().unwrap() = Some((index, gate));
        self
    }

    pub fn observing(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.observer = Some(store);
        self
    }

    /// Make every forward batch take at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn total(&self) -> u64 {
        self.batches.iter().sum()
    }

    pub fn forward_calls(&self) -> Vec<usize> {
        self.forward_calls.lock().unwrap().clone()
    }

    fn take_gate(&self, index: usize) -> Option<Arc<Gate>> {
        let mut gate = self.gate.lock().unwrap();
        let hit = matches!(gate.as_ref(), Some((at, _)) if *at == index);
        if hit {
            gate.take().map(|(_, g)| g)
        } else {
            None
        }
    }
}

#[async_trait]
impl Migration for ScriptedMigration {
    fn identity(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "Scripted test migration"
    }

    fn batch_size(&self) -> Option<usize> {
        Some(4)
    }

    fn reversibility(&self) -> Reversibility {
        self.reversibility
    }

    async fn estimate_total(&self, _ctx: &MigrationContext) -> Result<Option<u64>, BatchError> {
        Ok(self.estimate)
    }

    async fn run_batch(
        &self,
        ctx: &MigrationContext,
        cursor: Option<&Cursor>,
    ) -> Result<BatchResult, BatchError> {
        let index: usize = match cursor {
            Some(cursor) => cursor.decode()?,
            None => 0,
        };
        self.forward_calls.lock().unwrap().push(index);

        if let Some(store) = &self.observer {
            let record = store.get(ctx.execution_id).await.map_err(BatchError::other)?;
            self.snapshots.lock().unwrap().push(record);
        }

        if let Some(gate) = self.take_gate(index) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_at == Some(index) {
            return Err(BatchError::msg(format!("batch {} hit a malformed row", index)));
        }

        let next = Cursor::encode(&(index + 1))?;
        if index + 1 >= self.batches.len() {
            Ok(BatchResult::finished(self.batches[index]).with_cursor(next))
        } else {
            Ok(BatchResult::next(self.batches[index], next))
        }
    }

    async fn reverse_batch(
        &self,
        _ctx: &MigrationContext,
        cursor: Option<&Cursor>,
    ) -> Result<BatchResult, BatchError> {
        let remaining: usize = match cursor {
            Some(cursor) => cursor.decode()?,
            None => self.batches.len(),
        };
        let call = self.reverse_calls.fetch_add(1, Ordering::SeqCst);

        if self.reverse_fail_at == Some(call) {
            return Err(anyhow::anyhow!("undo of batch {} failed", remaining - 1).into());
        }

        let index = remaining - 1;
        if index == 0 {
            Ok(BatchResult::finished(self.batches[index]))
        } else {
            Ok(BatchResult::next(self.batches[index], Cursor::encode(&index)?))
        }
    }

    fn reverse_start(&self, forward_cursor: Option<&Cursor>) -> Option<Cursor> {
        forward_cursor.cloned()
    }
}

/// Store that fails its `nth` call to `update` (1-based) and passes
/// everything else through.
pub struct FailingStore {
    inner: Arc<InMemoryExecutionStore>,
    fail_update: usize,
    updates: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryExecutionStore>, fail_update: usize) -> Self {
        Self {
            inner,
            fail_update,
            updates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExecutionStore for FailingStore {
    async fn create(&self, new: NewExecution) -> Result<ExecutionId, StoreError> {
        self.inner.create(new).await
    }

    async fn update(
        &self,
        id: ExecutionId,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, StoreError> {
        let call = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_update {
            return Err(StoreError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.update(id, patch).await
    }

    async fn get(&self, id: ExecutionId) -> Result<ExecutionRecord, StoreError> {
        self.inner.get(id).await
    }

    async fn find_latest(
        &self,
        migration_id: &str,
        status: ExecutionStatus,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        self.inner.find_latest(migration_id, status).await
    }

    async fn list(&self, migration_id: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        self.inner.list(migration_id).await
    }
}

/// Engine over an in-memory store and a local guard.
pub fn engine_with(
    migrations: Vec<Arc<ScriptedMigration>>,
) -> (MigrationEngine, Arc<InMemoryExecutionStore>) {
    let store = Arc::new(InMemoryExecutionStore::new());
    let engine = engine_over(migrations, store.clone());
    (engine, store)
}

pub fn engine_over(
    migrations: Vec<Arc<ScriptedMigration>>,
    store: Arc<dyn ExecutionStore>,
) -> MigrationEngine {
    engine_guarded(migrations, store, Arc::new(LocalGuard::new()))
}

pub fn engine_guarded(
    migrations: Vec<Arc<ScriptedMigration>>,
    store: Arc<dyn ExecutionStore>,
    guard: Arc<dyn ConcurrencyGuard>,
) -> MigrationEngine {
    let mut registry = MigrationRegistry::new();
    for migration in migrations {
        registry
            .register(migration)
            .expect("Should register migration");
    }
    MigrationEngine::new(Arc::new(registry), store, guard)
}
