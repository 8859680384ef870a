use crate::config::ConfigError;
use crate::executor::SqlError;
use crate::resolve::ResolveError;
use schemata_db_schema::SchemaError;
use thiserror::Error;

/// Errors surfaced by the migration engine.
///
/// Every variant is scoped to a single plugin; one plugin's error never
/// describes another plugin's tables.
#[derive(Debug, Error)]
pub enum Error {
    #[error("plugin '{plugin}' has an invalid table definition: {source}")]
    Schema {
        plugin: String,
        #[source]
        source: SchemaError,
    },

    #[error("plugin '{plugin}' has unresolvable table dependencies: {source}")]
    Resolve {
        plugin: String,
        #[source]
        source: ResolveError,
    },

    #[error("migration of plugin '{plugin}' failed{} at `{statement}`: {cause}", table_context(.table))]
    MigrationFailed {
        plugin: String,
        /// Table the failing statement belongs to, if any
        table: Option<String>,
        statement: String,
        #[source]
        cause: SqlError,
    },

    #[error("plugins '{existing}' and '{plugin}' both map to schema '{schema}'")]
    SchemaCollision {
        plugin: String,
        existing: String,
        schema: String,
    },

    #[error("could not get a connection for plugin '{plugin}': {reason}")]
    Connection { plugin: String, reason: String },

    #[error("migration task for plugin '{plugin}' did not finish: {reason}")]
    TaskFailed { plugin: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// The plugin this error belongs to, when there is one.
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Error::Schema { plugin, .. }
            | Error::Resolve { plugin, .. }
            | Error::MigrationFailed { plugin, .. }
            | Error::SchemaCollision { plugin, .. }
            | Error::Connection { plugin, .. }
            | Error::TaskFailed { plugin, .. } => Some(plugin),
            Error::Config(_) => None,
        }
    }
}

fn table_context(table: &Option<String>) -> String {
    match table {
        Some(table) => format!(" on table '{}'", table),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
