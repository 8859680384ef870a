//! Per-plugin Postgres schema migrations.
//!
//! Plugins contribute declarative table definitions. schemata reads them
//! ([`introspect`]), orders them so referenced tables come first
//! ([`resolve`]), renders idempotent DDL ([`ddl`]) and applies it inside one
//! transaction per plugin ([`MigrationRunner`]). Each plugin gets its own
//! schema, so plugins cannot step on each other's tables, and running the
//! same migration again is a no-op.
//!
//! # Naming Convention
//!
//! **Schema names are derived from plugin names.** `@acme/plugin-knowledge`
//! migrates into `acme_plugin_knowledge`. Two plugins that would derive the
//! same schema are rejected rather than sharing it.
//!
//! # Usage
//!
//! ```no_run
//! use schemata::{ColumnDef, EngineConfig, Exports, Migrator, Plugin, SchemaRegistry, TableDef};
//! use std::sync::Arc;
//!
//! # async fn run(client: &mut tokio_postgres::Client) -> schemata::Result<()> {
//! let room = TableDef::new("room")
//!     .column(ColumnDef::new("id", "uuid").primary_key().default("gen_random_uuid()"))
//!     .column(ColumnDef::new("name", "text").not_null());
//!
//! let plugin = Plugin::new(
//!     "@acme/plugin-rooms",
//!     Exports::new().with("room", room).with("VERSION", "1.2.0"),
//! );
//!
//! let config = EngineConfig::default();
//! let migrator = Migrator::new(Arc::new(SchemaRegistry::from_config(&config)), config);
//! migrator.migrate(client, &plugin).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ddl;
mod engine;
mod error;
pub mod executor;
pub mod introspect;
pub mod registry;
pub mod resolve;
mod runner;

pub use config::{ConfigError, EngineConfig};
pub use ddl::{MigrationPlan, Statement, StatementKind};
pub use engine::{MigrationOutcome, Migrator, Plugin, PluginOutcome};
pub use error::{Error, Result};
pub use executor::{Executor, SqlError, Transaction};
pub use introspect::{
    CheckDef, ColumnDef, ConstraintDef, Export, Exports, ForeignKeyDef, IndexDef, Introspector,
    Opaque, TableDef, TableDefinition, introspect,
};
pub use registry::{Claim, MigrationStatus, PluginSchemaRegistration, SchemaRegistry};
pub use resolve::{Relation, RelationKind, ResolveError, resolve};
pub use runner::{MigrationResult, MigrationRunner};

// Re-export the data model
pub use schemata_db_schema::{
    ColumnDescriptor, ConstraintDescriptor, ExternalReference, ForeignKeyDescriptor, IndexColumn,
    IndexDescriptor, NullsOrder, OnDelete, SchemaError, SemanticType, SortOrder, TableDescriptor,
    TypeLimits, map_type,
};
