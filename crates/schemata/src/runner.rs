//! Applying a plugin's statements to the database.

use crate::ddl::{Statement, StatementKind};
use crate::error::{Error, Result};
use crate::executor::{Executor, SqlError, Transaction, execute_traced};
use crate::registry::SchemaRegistry;
use std::time::{Duration, Instant};

const SAVEPOINT: &str = "SAVEPOINT schemata_statement";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT schemata_statement";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT schemata_statement";

/// Summary of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    pub plugin: String,
    pub schema: String,
    /// Statements that created something
    pub applied: usize,
    /// Statements whose object was already there
    pub already_present: usize,
    pub elapsed: Duration,
}

enum StatementOutcome {
    Applied,
    AlreadyPresent,
}

#[derive(Default)]
struct Counts {
    applied: usize,
    already_present: usize,
}

/// Marks the plugin failed if a migration is abandoned mid-flight, e.g.
/// because its future was dropped.
struct AttemptGuard<'a> {
    registry: &'a SchemaRegistry,
    plugin: &'a str,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(plugin = self.plugin, "migration abandoned before completion");
            self.registry
                .mark_failed(self.plugin, "migration abandoned before completion");
        }
    }
}

/// Runs statement lists against an [`Executor`], one transaction per plugin.
///
/// Within the transaction every statement gets its own savepoint. Postgres
/// aborts the whole transaction on any error, so "already exists" can only be
/// absorbed by rolling back to the savepoint and carrying on. Only the code
/// matching the statement's own object is absorbed (see
/// [`StatementKind::already_exists_code`]).
pub struct MigrationRunner<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> MigrationRunner<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Apply `statements` for `plugin` atomically.
    ///
    /// The plugin's schema is created first even when `statements` is empty or
    /// does not start with it. On success the plugin is marked `Completed`;
    /// on any error nothing is committed and the plugin is marked `Failed`.
    pub async fn run<E>(
        &self,
        executor: &mut E,
        plugin: &str,
        statements: &[Statement],
    ) -> Result<MigrationResult>
    where
        E: Executor + ?Sized,
    {
        let schema = self.registry.register(plugin)?.schema_name;
        self.registry.begin_attempt(plugin);
        let mut guard = AttemptGuard {
            registry: self.registry,
            plugin,
            armed: true,
        };

        let started = Instant::now();
        tracing::info!(
            plugin,
            schema = %schema,
            statements = statements.len(),
            "migrating plugin schema"
        );

        let outcome = apply(executor, plugin, &schema, statements).await;
        guard.armed = false;

        match outcome {
            Ok(counts) => {
                self.registry.mark_completed(plugin);
                let result = MigrationResult {
                    plugin: plugin.to_string(),
                    schema,
                    applied: counts.applied,
                    already_present: counts.already_present,
                    elapsed: started.elapsed(),
                };
                tracing::info!(
                    plugin,
                    applied = result.applied,
                    already_present = result.already_present,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "plugin schema migrated"
                );
                Ok(result)
            }
            Err(err) => {
                tracing::error!(plugin, error = %err, "plugin schema migration failed");
                self.registry.mark_failed(plugin, err.to_string());
                Err(err)
            }
        }
    }
}

async fn apply<E>(
    executor: &mut E,
    plugin: &str,
    schema: &str,
    statements: &[Statement],
) -> Result<Counts>
where
    E: Executor + ?Sized,
{
    let failed = |table: Option<&String>, statement: &str, cause: SqlError| Error::MigrationFailed {
        plugin: plugin.to_string(),
        table: table.cloned(),
        statement: statement.to_string(),
        cause,
    };

    let mut tx = executor
        .begin()
        .await
        .map_err(|cause| failed(None, "BEGIN", cause))?;

    let ensure_schema = match statements.first() {
        Some(first) if first.kind == StatementKind::CreateSchema => None,
        _ => Some(Statement::create_schema(schema)),
    };

    let mut counts = Counts::default();
    for statement in ensure_schema.iter().chain(statements) {
        match run_statement(tx.as_mut(), statement).await {
            Ok(StatementOutcome::Applied) => counts.applied += 1,
            Ok(StatementOutcome::AlreadyPresent) => counts.already_present += 1,
            Err(cause) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(plugin, error = %e, "rollback failed");
                }
                return Err(failed(statement.table.as_ref(), &statement.sql, cause));
            }
        }
    }

    tx.commit()
        .await
        .map_err(|cause| failed(None, "COMMIT", cause))?;

    Ok(counts)
}

async fn run_statement(
    tx: &mut (dyn Transaction<'_> + '_),
    statement: &Statement,
) -> std::result::Result<StatementOutcome, SqlError> {
    tx.execute(SAVEPOINT).await?;

    match execute_traced(tx, &statement.sql).await {
        Ok(_) => {
            tx.execute(RELEASE_SAVEPOINT).await?;
            Ok(StatementOutcome::Applied)
        }
        Err(err)
            if statement
                .kind
                .already_exists_code()
                .is_some_and(|code| err.has_code(code)) =>
        {
            tracing::warn!(
                table = statement.table.as_deref().unwrap_or(""),
                kind = ?statement.kind,
                error = %err,
                "object already exists, skipping"
            );
            tx.execute(ROLLBACK_TO_SAVEPOINT).await?;
            tx.execute(RELEASE_SAVEPOINT).await?;
            Ok(StatementOutcome::AlreadyPresent)
        }
        Err(err) => Err(err),
    }
}
