//! In-process record of which plugin owns which schema and how far its
//! migration got.
//!
//! The registry is not persisted. After a restart every plugin starts out
//! `Pending` again and is re-migrated, which is harmless because every
//! generated statement is idempotent.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where a plugin's migration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A plugin's entry in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSchemaRegistration {
    pub plugin_name: String,
    pub schema_name: String,
    pub status: MigrationStatus,
    /// Message of the most recent failure, cleared on success
    pub last_error: Option<String>,
    /// Number of migration attempts started
    pub attempts: u32,
}

/// Result of [`SchemaRegistry::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the migration and must finish it.
    Acquired,
    AlreadyCompleted,
    AlreadyInProgress,
}

/// Plugin name → registration, in registration order.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schema_prefix: Option<String>,
    entries: Mutex<IndexMap<String, PluginSchemaRegistration>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose schema names start with `prefix`.
    pub fn with_schema_prefix(prefix: impl Into<String>) -> Self {
        Self {
            schema_prefix: Some(prefix.into()),
            entries: Mutex::default(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        match &config.schema_prefix {
            Some(prefix) => Self::with_schema_prefix(prefix.clone()),
            None => Self::new(),
        }
    }

    // Mutations never span more than one entry, so a poisoned map is still usable
    fn lock(&self) -> MutexGuard<'_, IndexMap<String, PluginSchemaRegistration>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The schema a plugin's tables live in. Pure, does not register.
    pub fn schema_name_for(&self, plugin: &str) -> String {
        let base = schemata_sql::schema_name(plugin);
        match &self.schema_prefix {
            Some(prefix) => schemata_sql::fit_identifier(format!("{}{}", prefix, base)),
            None => base,
        }
    }

    /// Register a plugin, or return its existing registration.
    ///
    /// Fails when a different plugin already owns the derived schema name.
    pub fn register(&self, plugin: &str) -> Result<PluginSchemaRegistration> {
        let schema_name = self.schema_name_for(plugin);
        let mut entries = self.lock();
        Self::register_locked(&mut entries, plugin, schema_name).map(|r| r.clone())
    }

    fn register_locked<'a>(
        entries: &'a mut IndexMap<String, PluginSchemaRegistration>,
        plugin: &str,
        schema_name: String,
    ) -> Result<&'a mut PluginSchemaRegistration> {
        if !entries.contains_key(plugin) {
            if let Some(owner) = entries.values().find(|r| r.schema_name == schema_name) {
                return Err(Error::SchemaCollision {
                    plugin: plugin.to_string(),
                    existing: owner.plugin_name.clone(),
                    schema: schema_name,
                });
            }
        }

        Ok(entries.entry(plugin.to_string()).or_insert_with(|| {
            tracing::debug!(plugin, schema = %schema_name, "registered plugin schema");
            PluginSchemaRegistration {
                plugin_name: plugin.to_string(),
                schema_name,
                status: MigrationStatus::Pending,
                last_error: None,
                attempts: 0,
            }
        }))
    }

    pub fn get(&self, plugin: &str) -> Option<PluginSchemaRegistration> {
        self.lock().get(plugin).cloned()
    }

    pub fn status(&self, plugin: &str) -> Option<MigrationStatus> {
        self.lock().get(plugin).map(|r| r.status)
    }

    /// Try to take ownership of a plugin's migration.
    ///
    /// Registers the plugin if needed. `Pending` and `Failed` plugins move to
    /// `InProgress` and the caller gets [`Claim::Acquired`]; the check and the
    /// transition happen under one lock.
    pub fn claim(&self, plugin: &str) -> Result<Claim> {
        let schema_name = self.schema_name_for(plugin);
        let mut entries = self.lock();
        let entry = Self::register_locked(&mut entries, plugin, schema_name)?;

        let claim = match entry.status {
            MigrationStatus::Completed => Claim::AlreadyCompleted,
            MigrationStatus::InProgress => Claim::AlreadyInProgress,
            MigrationStatus::Pending | MigrationStatus::Failed => {
                entry.status = MigrationStatus::InProgress;
                Claim::Acquired
            }
        };
        Ok(claim)
    }

    /// Record the start of a migration attempt.
    pub(crate) fn begin_attempt(&self, plugin: &str) {
        if let Some(entry) = self.lock().get_mut(plugin) {
            entry.status = MigrationStatus::InProgress;
            entry.attempts += 1;
        }
    }

    pub(crate) fn mark_completed(&self, plugin: &str) {
        if let Some(entry) = self.lock().get_mut(plugin) {
            entry.status = MigrationStatus::Completed;
            entry.last_error = None;
        }
    }

    pub(crate) fn mark_failed(&self, plugin: &str, error: impl Into<String>) {
        if let Some(entry) = self.lock().get_mut(plugin) {
            entry.status = MigrationStatus::Failed;
            entry.last_error = Some(error.into());
        }
    }

    /// Put a plugin back to `Pending` so it will be migrated again.
    ///
    /// Returns `false` for unknown plugins.
    pub fn reset(&self, plugin: &str) -> bool {
        match self.lock().get_mut(plugin) {
            Some(entry) => {
                entry.status = MigrationStatus::Pending;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every registration, in registration order.
    pub fn registrations(&self) -> Vec<PluginSchemaRegistration> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
