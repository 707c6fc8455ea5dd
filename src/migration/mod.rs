//! Migration contract, registry, batch runner and reversal coordinator.
//!
//! # Overview
//!
//! - Each migration implements the `Migration` trait with `run_batch()` and,
//!   when reversible, `reverse_batch()`
//! - Migrations are registered by identity in a `MigrationRegistry`
//! - The `BatchRunner` drives one migration batch by batch, persisting the
//!   cursor and counters of its execution record after every batch
//! - The `ReversalCoordinator` finds the completed run to undo and drives
//!   the reverse step through the runner
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = MigrationRegistry::new();
//! registry.register(Arc::new(BackfillEmails::new(pool)))?;
//! let engine = MigrationEngine::new(Arc::new(registry), store, guard);
//! let record = engine.run("backfill-emails").await?;
//! ```

mod cancel;
mod registry;
mod reversal;
mod runner;
mod types;

pub use cancel::{cancellation, CancellationHandle, CancellationSignal};
pub use registry::MigrationRegistry;
pub use reversal::ReversalCoordinator;
pub use runner::{BatchRunner, DEFAULT_BATCH_SIZE};
pub use types::{
    BatchError, BatchResult, Cursor, Migration, MigrationContext, MigrationDirection,
    Reversibility,
};
