//! In-process guard.

use super::{ConcurrencyGuard, GuardError};
use std::collections::HashSet;
use std::sync::Mutex;

/// Guard for hosts that run every batch inside one process.
#[derive(Debug, Default)]
pub struct LocalGuard {
    held: Mutex<HashSet<String>>,
}

impl LocalGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, migration_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(migration_id)
    }
}

impl ConcurrencyGuard for LocalGuard {
    fn try_acquire(&self, migration_id: &str) -> Result<bool, GuardError> {
        let mut held = self
            .held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(held.insert(migration_id.to_string()))
    }

    fn release(&self, migration_id: &str) -> Result<(), GuardError> {
        self.held
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(migration_id);
        Ok(())
    }
}
