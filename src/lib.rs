pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod guard;
pub mod migration;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{read_config, write_config, ConfigError, EngineConfig, GuardConfig, StoreConfig};
pub use engine::MigrationEngine;
pub use error::EngineError;
pub use execution::{
    ExecutionId, ExecutionPatch, ExecutionRecord, ExecutionStatus, FailureCause, FailureKind,
    NewExecution,
};
pub use guard::{ConcurrencyGuard, GuardError, GuardLease, LocalGuard, LockFileGuard};
pub use migration::{
    cancellation, BatchError, BatchResult, BatchRunner, CancellationHandle, CancellationSignal,
    Cursor, Migration, MigrationContext, MigrationDirection, MigrationRegistry,
    ReversalCoordinator, Reversibility,
};
pub use store::{ExecutionStore, InMemoryExecutionStore, JsonFileExecutionStore, StoreError};
pub use utils::init_tracing;
