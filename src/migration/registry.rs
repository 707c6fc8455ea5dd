//! Migration registry for resolving migration identities.

use super::types::Migration;
use crate::error::EngineError;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of all available migrations.
///
/// Populated once at startup by the host. Holds no execution state.
pub struct MigrationRegistry {
    migrations: HashMap<String, Arc<dyn Migration>>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            migrations: HashMap::new(),
        }
    }

    /// Register a migration under its identity.
    pub fn register(&mut self, migration: Arc<dyn Migration>) -> Result<(), EngineError> {
        let identity = migration.identity().to_string();

        if identity.trim().is_empty() {
            return Err(EngineError::ContractViolation {
                migration_id: identity,
                reason: "migration identity must not be empty".to_string(),
                record: None,
            });
        }

        if self.migrations.contains_key(&identity) {
            return Err(EngineError::DuplicateIdentity(identity));
        }

        self.migrations.insert(identity, migration);
        Ok(())
    }

    /// Resolve a migration by identity.
    pub fn get(&self, migration_id: &str) -> Result<Arc<dyn Migration>, EngineError> {
        self.migrations
            .get(migration_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownMigration(migration_id.to_string()))
    }

    pub fn contains(&self, migration_id: &str) -> bool {
        self.migrations.contains_key(migration_id)
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.migrations.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("migrations", &self.identities())
            .finish()
    }
}
