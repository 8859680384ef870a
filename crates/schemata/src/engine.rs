//! The [`Migrator`]: introspect, resolve, generate, run.

use crate::config::EngineConfig;
use crate::ddl::{self, MigrationPlan};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::introspect::{Exports, Introspector};
use crate::registry::{Claim, SchemaRegistry};
use crate::resolve::resolve;
use crate::runner::{MigrationResult, MigrationRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A plugin as handed over by the plugin loader.
#[derive(Debug)]
pub struct Plugin {
    pub name: String,
    pub exports: Exports,
}

impl Plugin {
    pub fn new(name: impl Into<String>, exports: Exports) -> Self {
        Self {
            name: name.into(),
            exports,
        }
    }
}

/// What [`Migrator::migrate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated(MigrationResult),
    /// Another caller already migrated the plugin, or is doing so right now.
    Skipped(Claim),
}

/// One plugin's result from [`Migrator::migrate_all`].
#[derive(Debug)]
pub struct PluginOutcome {
    pub plugin: String,
    pub result: Result<MigrationOutcome>,
}

/// Migrates plugins into their own schemas.
#[derive(Debug)]
pub struct Migrator {
    registry: Arc<SchemaRegistry>,
    config: EngineConfig,
}

impl Migrator {
    pub fn new(registry: Arc<SchemaRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute the statements that would migrate `plugin`, without any I/O.
    pub fn plan(&self, plugin: &Plugin) -> Result<MigrationPlan> {
        let schema = self.registry.schema_name_for(&plugin.name);

        let tables = Introspector::new(self.config.type_limits())
            .with_own_schema(schema.clone())
            .introspect(&plugin.exports)
            .map_err(|source| Error::Schema {
                plugin: plugin.name.clone(),
                source,
            })?;

        let ordered = resolve(tables).map_err(|source| Error::Resolve {
            plugin: plugin.name.clone(),
            source,
        })?;

        for table in &ordered {
            for external in table.external_references() {
                tracing::debug!(
                    plugin = %plugin.name,
                    table = table.name(),
                    references = %external,
                    "foreign key into another schema; that schema must be migrated first"
                );
            }
        }

        Ok(MigrationPlan {
            plugin: plugin.name.clone(),
            statements: ddl::generate(&schema, &ordered),
            schema,
        })
    }

    /// Migrate one plugin through `executor`.
    ///
    /// Skips plugins that are already completed or being migrated elsewhere.
    pub async fn migrate<E>(&self, executor: &mut E, plugin: &Plugin) -> Result<MigrationOutcome>
    where
        E: Executor + ?Sized,
    {
        match self.registry.claim(&plugin.name)? {
            Claim::Acquired => {}
            skipped => {
                tracing::debug!(plugin = %plugin.name, claim = ?skipped, "skipping plugin migration");
                return Ok(MigrationOutcome::Skipped(skipped));
            }
        }

        let plan = match self.plan(plugin) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::error!(plugin = %plugin.name, error = %err, "could not plan plugin migration");
                self.registry.mark_failed(&plugin.name, err.to_string());
                return Err(err);
            }
        };

        let result = MigrationRunner::new(&self.registry)
            .run(executor, &plugin.name, &plan.statements)
            .await?;
        Ok(MigrationOutcome::Migrated(result))
    }

    /// Migrate many plugins concurrently, each on its own pooled connection.
    ///
    /// At most `max_concurrent_migrations` run at once. Outcomes come back in
    /// the order of `plugins`; a failing or panicking plugin only affects its
    /// own outcome.
    pub async fn migrate_all(
        self: Arc<Self>,
        pool: deadpool_postgres::Pool,
        plugins: Vec<Plugin>,
    ) -> Vec<PluginOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_migrations));
        let mut tasks = JoinSet::new();
        let mut spawned = HashMap::new();
        let mut outcomes: Vec<Option<PluginOutcome>> = Vec::with_capacity(plugins.len());

        for (index, plugin) in plugins.into_iter().enumerate() {
            outcomes.push(None);
            let migrator = Arc::clone(&self);
            let pool = pool.clone();
            let semaphore = Arc::clone(&semaphore);
            let name = plugin.name.clone();

            let handle = tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::TaskFailed {
                        plugin: plugin.name.clone(),
                        reason: e.to_string(),
                    })?;
                let mut conn = pool.get().await.map_err(|e| Error::Connection {
                    plugin: plugin.name.clone(),
                    reason: e.to_string(),
                })?;
                migrator.migrate(&mut conn, &plugin).await
            });
            spawned.insert(handle.id(), (index, name));
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    let id = e.id();
                    let reason = e.to_string();
                    let plugin = spawned.get(&id).map(|(_, name)| name.clone()).unwrap_or_default();
                    tracing::error!(plugin = %plugin, error = %reason, "migration task did not finish");
                    (id, Err(Error::TaskFailed { plugin, reason }))
                }
            };
            if let Some((index, plugin)) = spawned.remove(&id) {
                outcomes[index] = Some(PluginOutcome { plugin, result });
            }
        }

        outcomes.into_iter().flatten().collect()
    }
}
