//! Table descriptors and column types for schemata.
//!
//! This crate holds the normalized, engine-facing view of a plugin's tables.
//! Descriptors are rebuilt from the plugin's definitions on every migration
//! run and are never mutated afterwards; the engine crate produces them
//! (introspection), orders them (resolution) and renders them to DDL.

use indexmap::IndexSet;
use std::fmt;

mod types;
pub use types::{DEFAULT_MAX_VECTOR_DIMENSION, SemanticType, TypeLimits, map_type};

/// Errors raised while turning a plugin's table definitions into descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unsupported column type '{ty}'")]
    UnsupportedType { ty: String },

    #[error("vector dimension {dimension} is out of range (expected 1..={max})")]
    InvalidVectorDimension { dimension: u32, max: u32 },

    #[error("table '{table}' declares no columns")]
    EmptyTable { table: String },

    #[error("table '{table}' declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{table}' is declared by both '{first}' and '{second}'")]
    DuplicateTable {
        table: String,
        first: String,
        second: String,
    },

    #[error("table '{table}' declares index '{index}' more than once")]
    DuplicateIndex { table: String, index: String },

    #[error("{context} in table '{table}' references unknown column '{column}'")]
    UnknownColumn {
        table: String,
        column: String,
        context: String,
    },

    #[error(
        "foreign key '{constraint}' on table '{table}' maps {local} column(s) to {target} column(s)"
    )]
    ForeignKeyArity {
        table: String,
        constraint: String,
        local: usize,
        target: usize,
    },

    #[error("{context} in table '{table}' lists no columns")]
    EmptyColumnList { table: String, context: String },

    #[error("foreign key '{constraint}' on table '{table}' has unknown ON DELETE action '{action}'")]
    InvalidOnDelete {
        table: String,
        constraint: String,
        action: String,
    },

    #[error("{kind} name '{name}' in table '{table}' is longer than {max} bytes")]
    IdentifierTooLong {
        table: String,
        /// "table", "column", "index" or "constraint"
        kind: &'static str,
        name: String,
        max: usize,
    },

    #[error("column '{column}' in table '{table}': {source}")]
    Column {
        table: String,
        column: String,
        #[source]
        source: Box<SchemaError>,
    },
}

/// A normalized column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Declared semantic type
    pub semantic_type: SemanticType,
    /// Postgres type syntax produced by [`map_type`]
    pub native_type: String,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Default value expression (if any)
    pub default: Option<String>,
    /// Whether this column is (part of) the primary key
    pub primary_key: bool,
    /// Whether this column carries a single-column unique constraint
    pub unique: bool,
}

/// Sort order for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// SQL suffix, empty for the default ascending order.
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "",
            SortOrder::Desc => " DESC",
        }
    }
}

/// Nulls ordering for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullsOrder {
    #[default]
    Default,
    First,
    Last,
}

impl NullsOrder {
    pub fn to_sql(&self) -> &'static str {
        match self {
            NullsOrder::Default => "",
            NullsOrder::First => " NULLS FIRST",
            NullsOrder::Last => " NULLS LAST",
        }
    }
}

/// One column of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub name: String,
    /// Operator class, e.g. `vector_cosine_ops` or `gin_trgm_ops`
    pub opclass: Option<String>,
    pub order: SortOrder,
    pub nulls: NullsOrder,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opclass: None,
            order: SortOrder::Asc,
            nulls: NullsOrder::Default,
        }
    }

    /// Parse a column spec such as `created_at DESC NULLS LAST` or
    /// `embedding vector_cosine_ops`.
    ///
    /// The first word is the column name (optionally double-quoted). Sort and
    /// nulls keywords are recognized anywhere after it; any other word is
    /// taken as the operator class.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();

        let (name, rest) = match spec.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (quoted[..end].to_string(), &quoted[end + 1..]),
                None => (quoted.to_string(), ""),
            },
            None => match spec.split_once(char::is_whitespace) {
                Some((name, rest)) => (name.to_string(), rest),
                None => (spec.to_string(), ""),
            },
        };

        let mut col = IndexColumn::new(name);
        let mut words = rest.split_whitespace().peekable();
        while let Some(word) = words.next() {
            match word.to_ascii_uppercase().as_str() {
                "ASC" => col.order = SortOrder::Asc,
                "DESC" => col.order = SortOrder::Desc,
                "NULLS" => {
                    col.nulls = match words.next().map(|w| w.to_ascii_uppercase()).as_deref() {
                        Some("FIRST") => NullsOrder::First,
                        Some("LAST") => NullsOrder::Last,
                        _ => NullsOrder::Default,
                    }
                }
                _ => col.opclass = Some(word.to_string()),
            }
        }
        col
    }

    /// SQL fragment: quoted name, operator class, order, nulls.
    pub fn to_sql(&self) -> String {
        let opclass = self
            .opclass
            .as_ref()
            .map(|o| format!(" {}", o))
            .unwrap_or_default();
        format!(
            "{}{}{}{}",
            schemata_sql::quote_ident(&self.name),
            opclass,
            self.order.to_sql(),
            self.nulls.to_sql()
        )
    }
}

/// A normalized index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    /// Access method (`btree`, `hnsw`, `gin`, ...); Postgres' default when `None`
    pub method: Option<String>,
    /// Predicate for partial indexes
    pub where_clause: Option<String>,
}

/// `ON DELETE` behaviour of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl OnDelete {
    /// Parse the SQL spelling (`cascade`, `set null`, ...), case-insensitively.
    pub fn parse(action: &str) -> Option<Self> {
        let normalized = action
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        match normalized.as_str() {
            "no action" => Some(OnDelete::NoAction),
            "restrict" => Some(OnDelete::Restrict),
            "cascade" => Some(OnDelete::Cascade),
            "set null" => Some(OnDelete::SetNull),
            "set default" => Some(OnDelete::SetDefault),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            OnDelete::NoAction => "NO ACTION",
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    /// Column(s) in this table
    pub columns: Vec<String>,
    /// Schema of the referenced table when it lives outside the plugin's own schema
    pub target_schema: Option<String>,
    /// Referenced table
    pub target_table: String,
    /// Referenced column(s)
    pub target_columns: Vec<String>,
    pub on_delete: OnDelete,
}

impl ForeignKeyDescriptor {
    /// Whether the reference points into another plugin's schema.
    pub fn is_external(&self) -> bool {
        self.target_schema.is_some()
    }
}

/// A table-level constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintDescriptor {
    Unique { name: String, columns: Vec<String> },
    Check { name: String, expr: String },
    ForeignKey(ForeignKeyDescriptor),
}

impl ConstraintDescriptor {
    pub fn name(&self) -> &str {
        match self {
            ConstraintDescriptor::Unique { name, .. } => name,
            ConstraintDescriptor::Check { name, .. } => name,
            ConstraintDescriptor::ForeignKey(fk) => &fk.name,
        }
    }
}

/// A reference to a table in another plugin's schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalReference {
    pub schema: String,
    pub table: String,
}

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// A normalized table.
///
/// Dependencies are derived from the foreign keys at construction time, which
/// is why the fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<ColumnDescriptor>,
    constraints: Vec<ConstraintDescriptor>,
    indexes: Vec<IndexDescriptor>,
    dependencies: IndexSet<String>,
    external_references: IndexSet<ExternalReference>,
}

impl TableDescriptor {
    pub fn new(
        name: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
        constraints: Vec<ConstraintDescriptor>,
        indexes: Vec<IndexDescriptor>,
    ) -> Self {
        let mut dependencies = IndexSet::new();
        let mut external_references = IndexSet::new();

        for constraint in &constraints {
            let ConstraintDescriptor::ForeignKey(fk) = constraint else {
                continue;
            };
            match &fk.target_schema {
                Some(schema) => {
                    external_references.insert(ExternalReference {
                        schema: schema.clone(),
                        table: fk.target_table.clone(),
                    });
                }
                None => {
                    dependencies.insert(fk.target_table.clone());
                }
            }
        }

        Self {
            name: name.into(),
            columns,
            constraints,
            indexes,
            dependencies,
            external_references,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn constraints(&self) -> &[ConstraintDescriptor] {
        &self.constraints
    }

    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    /// Tables in the same plugin this table references, in declaration order.
    /// Includes the table itself when it references itself.
    pub fn dependencies(&self) -> &IndexSet<String> {
        &self.dependencies
    }

    /// Tables in other schemas this table references.
    pub fn external_references(&self) -> &IndexSet<ExternalReference> {
        &self.external_references
    }

    /// Whether one of this table's foreign keys points back at itself.
    pub fn is_self_referencing(&self) -> bool {
        self.dependencies.contains(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKeyDescriptor> {
        self.constraints.iter().filter_map(|c| match c {
            ConstraintDescriptor::ForeignKey(fk) => Some(fk),
            _ => None,
        })
    }
}
