//! Turning a plugin's exports into table descriptors.
//!
//! A plugin hands over a bag of named exports. Some are table definitions,
//! most are not (constants, helper functions, configuration values). The
//! [`Export`] trait is the capability check: only values whose
//! [`Export::as_table`] returns a definition are introspected, everything else
//! is skipped without complaint.
//!
//! Definitions can be built in code:
//!
//! ```
//! use schemata::{ColumnDef, ForeignKeyDef, IndexDef, TableDef};
//!
//! let memory = TableDef::new("memory")
//!     .column(ColumnDef::new("id", "uuid").primary_key().default("gen_random_uuid()"))
//!     .column(ColumnDef::new("room_id", "uuid").not_null())
//!     .column(ColumnDef::new("embedding", "vector(384)"))
//!     .foreign_key(ForeignKeyDef::new(["room_id"], "room", ["id"]).on_delete("cascade"))
//!     .index(IndexDef::new(["embedding vector_cosine_ops"]).method("hnsw"));
//! # let _ = memory;
//! ```
//!
//! or shipped as TOML and loaded with [`TableDef::from_toml_str`] /
//! [`Exports::from_toml_str`].

use indexmap::{IndexMap, IndexSet};
use schemata_db_schema::{
    ColumnDescriptor, ConstraintDescriptor, ForeignKeyDescriptor, IndexColumn, IndexDescriptor,
    OnDelete, SchemaError, SemanticType, TableDescriptor, TypeLimits, map_type,
};
use serde::Deserialize;
use std::sync::Arc;

/// A value a plugin exports.
pub trait Export: Send + Sync {
    /// The table definition behind this export, if it is one.
    fn as_table(&self) -> Option<&dyn TableDefinition> {
        None
    }
}

/// The shape the introspector reads a table from.
pub trait TableDefinition: Send + Sync {
    /// Declared table name. This, not the export key, names the table.
    fn table_name(&self) -> &str;

    fn columns(&self) -> &[ColumnDef];

    fn constraints(&self) -> &[ConstraintDef] {
        &[]
    }

    fn indexes(&self) -> &[IndexDef] {
        &[]
    }
}

macro_rules! plain_exports {
    ($($ty:ty),* $(,)?) => {
        $(impl Export for $ty {})*
    };
}

plain_exports!(
    &'static str,
    String,
    bool,
    i32,
    i64,
    u32,
    u64,
    f64,
    fn(),
    toml::Value,
);

impl<T: Export + ?Sized> Export for Arc<T> {
    fn as_table(&self) -> Option<&dyn TableDefinition> {
        (**self).as_table()
    }
}

impl<T: Export + ?Sized> Export for Box<T> {
    fn as_table(&self) -> Option<&dyn TableDefinition> {
        (**self).as_table()
    }
}

/// Exports any value that is not a table, such as a closure or a helper
/// object.
///
/// ```
/// use schemata::{Exports, Opaque};
///
/// let exports = Exports::new()
///     .with("onReady", Opaque(|| println!("ready")))
///     .with("double", Opaque(|n: u64| n * 2));
/// assert_eq!(exports.len(), 2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Opaque<T>(pub T);

impl<T: Send + Sync> Export for Opaque<T> {}

/// A plugin's exports, in the order the plugin declared them.
#[derive(Default)]
pub struct Exports {
    entries: IndexMap<String, Box<dyn Export>>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an export, replacing any previous export under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Export + 'static) {
        self.entries.insert(name.into(), Box::new(value));
    }

    /// Builder-style [`Exports::insert`].
    ///
    /// Function items must be cast to a pointer (`helper as fn()`); closures
    /// and other values go through [`Opaque`].
    pub fn with(mut self, name: impl Into<String>, value: impl Export + 'static) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Export> {
        self.entries.get(name).map(|e| e.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Export)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load exports from a TOML document.
    ///
    /// Each top-level key becomes one export. Tables carrying both `name` and
    /// `columns` keys are read as [`TableDef`]s; any other value is kept as a
    /// plain export and will be skipped by introspection.
    ///
    /// ```
    /// use schemata::{Export, Exports};
    ///
    /// let exports = Exports::from_toml_str(r#"
    ///     version = 3
    ///
    ///     [room]
    ///     name = "room"
    ///     columns = [{ name = "id", type = "uuid", primary_key = true }]
    /// "#).unwrap();
    ///
    /// assert_eq!(exports.len(), 2);
    /// assert!(exports.get("room").unwrap().as_table().is_some());
    /// assert!(exports.get("version").unwrap().as_table().is_none());
    /// ```
    pub fn from_toml_str(doc: &str) -> Result<Self, toml::de::Error> {
        let root: toml::Table = doc.parse()?;
        let mut exports = Exports::new();
        for (key, value) in root {
            let looks_like_table = value
                .as_table()
                .is_some_and(|t| t.contains_key("name") && t.contains_key("columns"));
            if looks_like_table {
                let def: TableDef = value.try_into()?;
                exports.insert(key, def);
            } else {
                exports.insert(key, value);
            }
        }
        Ok(exports)
    }
}

impl std::fmt::Debug for Exports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

fn default_true() -> bool {
    true
}

/// Declarative column definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type name, e.g. `uuid` or `vector(384)`
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
}

impl ColumnDef {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as (part of) the primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Default value, as a SQL expression.
    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }
}

/// Declarative foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeyDef {
    #[serde(default)]
    pub name: Option<String>,
    pub columns: Vec<String>,
    /// Schema of the referenced table, for references into another plugin
    #[serde(default)]
    pub target_schema: Option<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    /// SQL spelling of the action (`cascade`, `set null`, ...)
    #[serde(default)]
    pub on_delete: Option<String>,
}

impl ForeignKeyDef {
    pub fn new<C, T>(
        columns: impl IntoIterator<Item = C>,
        target_table: impl Into<String>,
        target_columns: impl IntoIterator<Item = T>,
    ) -> Self
    where
        C: Into<String>,
        T: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            target_schema: None,
            target_table: target_table.into(),
            target_columns: target_columns.into_iter().map(Into::into).collect(),
            on_delete: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reference a table in another schema.
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.target_schema = Some(schema.into());
        self
    }

    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }
}

/// Declarative CHECK constraint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckDef {
    #[serde(default)]
    pub name: Option<String>,
    pub expr: String,
}

impl CheckDef {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            name: None,
            expr: expr.into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Declarative table-level constraint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ConstraintDef {
    Unique {
        #[serde(default)]
        name: Option<String>,
        columns: Vec<String>,
    },
    Check(CheckDef),
    ForeignKey(ForeignKeyDef),
}

/// Declarative index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexDef {
    #[serde(default)]
    pub name: Option<String>,
    /// Column specs, e.g. `created_at DESC` or `embedding vector_cosine_ops`
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
}

impl IndexDef {
    pub fn new<C: Into<String>>(columns: impl IntoIterator<Item = C>) -> Self {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            method: None,
            where_clause: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Access method, e.g. `hnsw` or `gin`.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Make this a partial index.
    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.where_clause = Some(predicate.into());
        self
    }
}

/// Declarative table definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKeyDef) -> Self {
        self.constraints.push(ConstraintDef::ForeignKey(fk));
        self
    }

    /// Composite UNIQUE constraint over `columns`.
    pub fn unique<C: Into<String>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.constraints.push(ConstraintDef::Unique {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn check(mut self, check: CheckDef) -> Self {
        self.constraints.push(ConstraintDef::Check(check));
        self
    }

    pub fn index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Read a single table definition from TOML.
    pub fn from_toml_str(doc: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(doc)
    }
}

impl TableDefinition for TableDef {
    fn table_name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn constraints(&self) -> &[ConstraintDef] {
        &self.constraints
    }

    fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }
}

impl Export for TableDef {
    fn as_table(&self) -> Option<&dyn TableDefinition> {
        Some(self)
    }
}

/// Reads table definitions into descriptors.
#[derive(Debug, Clone, Default)]
pub struct Introspector {
    limits: TypeLimits,
    own_schema: Option<String>,
}

impl Introspector {
    pub fn new(limits: TypeLimits) -> Self {
        Self {
            limits,
            own_schema: None,
        }
    }

    /// Treat foreign keys that explicitly name `schema` as references inside
    /// the plugin rather than external ones.
    pub fn with_own_schema(mut self, schema: impl Into<String>) -> Self {
        self.own_schema = Some(schema.into());
        self
    }

    /// Describe every table among `exports`, in export order.
    pub fn introspect(&self, exports: &Exports) -> Result<Vec<TableDescriptor>, SchemaError> {
        let mut tables = Vec::new();
        // table name -> (export key, definition address)
        let mut seen: IndexMap<String, (&str, *const ())> = IndexMap::new();

        for (key, export) in exports.iter() {
            let Some(def) = export.as_table() else {
                tracing::trace!(export = key, "skipping non-table export");
                continue;
            };

            let addr = std::ptr::from_ref(def).cast::<()>();
            if let Some((first, first_addr)) = seen.get(def.table_name()) {
                if *first_addr == addr {
                    // the same definition exported under a second name
                    continue;
                }
                return Err(SchemaError::DuplicateTable {
                    table: def.table_name().to_string(),
                    first: first.to_string(),
                    second: key.to_string(),
                });
            }
            seen.insert(def.table_name().to_string(), (key, addr));

            tables.push(self.describe(def)?);
        }

        Ok(tables)
    }

    /// Describe a single table definition.
    pub fn describe(&self, def: &dyn TableDefinition) -> Result<TableDescriptor, SchemaError> {
        let table = def.table_name();
        require_fit(table, "table", table)?;
        if def.columns().is_empty() {
            return Err(SchemaError::EmptyTable {
                table: table.to_string(),
            });
        }

        let mut names = IndexSet::new();
        let mut columns = Vec::with_capacity(def.columns().len());
        for col in def.columns() {
            require_fit(table, "column", &col.name)?;
            if !names.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: table.to_string(),
                    column: col.name.clone(),
                });
            }
            columns.push(self.describe_column(table, col)?);
        }

        let known = |column: &str, context: &str| -> Result<(), SchemaError> {
            if names.contains(column) {
                Ok(())
            } else {
                Err(SchemaError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                    context: context.to_string(),
                })
            }
        };

        let mut constraints = Vec::with_capacity(def.constraints().len());
        for constraint in def.constraints() {
            let descriptor = match constraint {
                ConstraintDef::Unique { name, columns } => {
                    require_columns(table, columns, "unique constraint")?;
                    for c in columns {
                        known(c, "unique constraint")?;
                    }
                    let name = name
                        .clone()
                        .unwrap_or_else(|| schemata_sql::unique_constraint_name(table, columns));
                    require_fit(table, "constraint", &name)?;
                    ConstraintDescriptor::Unique {
                        name,
                        columns: columns.clone(),
                    }
                }
                ConstraintDef::Check(check) => {
                    let name = check
                        .name
                        .clone()
                        .unwrap_or_else(|| schemata_sql::check_constraint_name(table, &check.expr));
                    require_fit(table, "constraint", &name)?;
                    ConstraintDescriptor::Check {
                        name,
                        expr: check.expr.clone(),
                    }
                }
                ConstraintDef::ForeignKey(fk) => {
                    require_columns(table, &fk.columns, "foreign key")?;
                    for c in &fk.columns {
                        known(c, "foreign key")?;
                    }
                    ConstraintDescriptor::ForeignKey(self.describe_foreign_key(table, fk)?)
                }
            };
            constraints.push(descriptor);
        }

        let mut index_names = IndexSet::new();
        let mut indexes = Vec::with_capacity(def.indexes().len());
        for idx in def.indexes() {
            require_columns(table, &idx.columns, "index")?;
            let index_columns: Vec<IndexColumn> =
                idx.columns.iter().map(|c| IndexColumn::parse(c)).collect();
            for c in &index_columns {
                known(&c.name, "index")?;
            }

            let name = idx.name.clone().unwrap_or_else(|| {
                let column_names: Vec<&str> =
                    index_columns.iter().map(|c| c.name.as_str()).collect();
                schemata_sql::index_name(table, &column_names)
            });
            require_fit(table, "index", &name)?;
            if !index_names.insert(name.clone()) {
                return Err(SchemaError::DuplicateIndex {
                    table: table.to_string(),
                    index: name,
                });
            }

            indexes.push(IndexDescriptor {
                name,
                columns: index_columns,
                unique: idx.unique,
                method: idx.method.clone(),
                where_clause: idx.where_clause.clone(),
            });
        }

        Ok(TableDescriptor::new(table, columns, constraints, indexes))
    }

    fn describe_column(&self, table: &str, col: &ColumnDef) -> Result<ColumnDescriptor, SchemaError> {
        let in_column = |source: SchemaError| SchemaError::Column {
            table: table.to_string(),
            column: col.name.clone(),
            source: Box::new(source),
        };

        let semantic_type = SemanticType::parse(&col.ty).map_err(in_column)?;
        let native_type = map_type(&semantic_type, &self.limits).map_err(in_column)?;

        Ok(ColumnDescriptor {
            name: col.name.clone(),
            semantic_type,
            native_type,
            nullable: col.nullable && !col.primary_key,
            default: col.default.clone(),
            primary_key: col.primary_key,
            unique: col.unique,
        })
    }

    fn describe_foreign_key(
        &self,
        table: &str,
        fk: &ForeignKeyDef,
    ) -> Result<ForeignKeyDescriptor, SchemaError> {
        let name = fk
            .name
            .clone()
            .unwrap_or_else(|| schemata_sql::foreign_key_name(table, &fk.columns));
        require_fit(table, "constraint", &name)?;

        if fk.columns.len() != fk.target_columns.len() {
            return Err(SchemaError::ForeignKeyArity {
                table: table.to_string(),
                constraint: name,
                local: fk.columns.len(),
                target: fk.target_columns.len(),
            });
        }

        let on_delete = match &fk.on_delete {
            None => OnDelete::default(),
            Some(action) => {
                OnDelete::parse(action).ok_or_else(|| SchemaError::InvalidOnDelete {
                    table: table.to_string(),
                    constraint: name.clone(),
                    action: action.clone(),
                })?
            }
        };

        let target_schema = fk
            .target_schema
            .clone()
            .filter(|schema| Some(schema) != self.own_schema.as_ref());

        Ok(ForeignKeyDescriptor {
            name,
            columns: fk.columns.clone(),
            target_schema,
            target_table: fk.target_table.clone(),
            target_columns: fk.target_columns.clone(),
            on_delete,
        })
    }
}

fn require_columns(table: &str, columns: &[String], context: &str) -> Result<(), SchemaError> {
    if columns.is_empty() {
        return Err(SchemaError::EmptyColumnList {
            table: table.to_string(),
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Postgres silently truncates longer identifiers, which can fold two
/// distinct names into one.
fn require_fit(table: &str, kind: &'static str, name: &str) -> Result<(), SchemaError> {
    if name.len() > schemata_sql::PG_IDENT_MAX {
        return Err(SchemaError::IdentifierTooLong {
            table: table.to_string(),
            kind,
            name: name.to_string(),
            max: schemata_sql::PG_IDENT_MAX,
        });
    }
    Ok(())
}

/// Describe every table among `exports` with the given type limits.
pub fn introspect(exports: &Exports, limits: &TypeLimits) -> Result<Vec<TableDescriptor>, SchemaError> {
    Introspector::new(*limits).introspect(exports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> TableDef {
        TableDef::new("room")
            .column(ColumnDef::new("id", "uuid").primary_key())
            .column(ColumnDef::new("name", "text").not_null())
    }

    #[test]
    fn test_table_name_comes_from_definition_not_export_key() {
        let exports = Exports::new().with("roomsTable", room());
        let tables = introspect(&exports, &TypeLimits::default()).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name(), "room");
    }

    #[test]
    fn test_primary_key_implies_not_null() {
        let def = TableDef::new("t").column(ColumnDef {
            primary_key: true,
            ..ColumnDef::new("id", "bigint")
        });
        let table = Introspector::default().describe(&def).unwrap();
        assert!(!table.columns()[0].nullable);
        assert_eq!(table.primary_key_columns(), vec!["id"]);
    }

    #[test]
    fn test_same_definition_exported_twice_is_not_a_duplicate() {
        let shared = Arc::new(room());
        let exports = Exports::new()
            .with("room", Arc::clone(&shared))
            .with("roomTable", shared);
        let tables = introspect(&exports, &TypeLimits::default()).unwrap();
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn test_distinct_definitions_with_same_name_are_rejected() {
        let exports = Exports::new().with("a", room()).with("b", room());
        assert_eq!(
            introspect(&exports, &TypeLimits::default()),
            Err(SchemaError::DuplicateTable {
                table: "room".to_string(),
                first: "a".to_string(),
                second: "b".to_string(),
            })
        );
    }

    #[test]
    fn test_unsupported_type_names_the_column() {
        let def = TableDef::new("t").column(ColumnDef::new("shape", "geometry"));
        let err = Introspector::default().describe(&def).unwrap_err();
        let SchemaError::Column { table, column, source } = err else {
            panic!("expected a column error, got {err:?}");
        };
        assert_eq!((table.as_str(), column.as_str()), ("t", "shape"));
        assert_eq!(
            *source,
            SchemaError::UnsupportedType {
                ty: "geometry".to_string()
            }
        );
    }

    #[test]
    fn test_vector_dimension_limit_is_configurable() {
        let def = TableDef::new("t").column(ColumnDef::new("embedding", "vector(3072)"));
        let strict = Introspector::new(TypeLimits {
            max_vector_dimension: 2000,
        });
        assert!(matches!(
            strict.describe(&def),
            Err(SchemaError::Column { .. })
        ));
        assert!(Introspector::default().describe(&def).is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let empty = TableDef::new("empty");
        assert!(matches!(
            Introspector::default().describe(&empty),
            Err(SchemaError::EmptyTable { .. })
        ));

        let dup = room().column(ColumnDef::new("name", "text"));
        assert!(matches!(
            Introspector::default().describe(&dup),
            Err(SchemaError::DuplicateColumn { .. })
        ));

        let bad_index = room().index(IndexDef::new(["missing"]));
        assert!(matches!(
            Introspector::default().describe(&bad_index),
            Err(SchemaError::UnknownColumn { .. })
        ));

        let dup_index = room()
            .index(IndexDef::new(["name"]))
            .index(IndexDef::new(["name DESC"]));
        assert!(matches!(
            Introspector::default().describe(&dup_index),
            Err(SchemaError::DuplicateIndex { .. })
        ));

        let arity = room().foreign_key(ForeignKeyDef::new(["id", "name"], "other", ["id"]));
        assert!(matches!(
            Introspector::default().describe(&arity),
            Err(SchemaError::ForeignKeyArity {
                local: 2,
                target: 1,
                ..
            })
        ));

        let action = room().foreign_key(ForeignKeyDef::new(["id"], "other", ["id"]).on_delete("explode"));
        assert!(matches!(
            Introspector::default().describe(&action),
            Err(SchemaError::InvalidOnDelete { .. })
        ));
    }

    #[test]
    fn test_identifiers_longer_than_postgres_allows_are_rejected() {
        let long = "x".repeat(schemata_sql::PG_IDENT_MAX + 1);

        let table = TableDef::new(long.clone()).column(ColumnDef::new("id", "uuid"));
        assert_eq!(
            Introspector::default().describe(&table),
            Err(SchemaError::IdentifierTooLong {
                table: long.clone(),
                kind: "table",
                name: long.clone(),
                max: schemata_sql::PG_IDENT_MAX,
            })
        );

        let column = room().column(ColumnDef::new(long.clone(), "text"));
        assert!(matches!(
            Introspector::default().describe(&column),
            Err(SchemaError::IdentifierTooLong { kind: "column", .. })
        ));

        let index = room().index(IndexDef::new(["name"]).named(long.clone()));
        assert!(matches!(
            Introspector::default().describe(&index),
            Err(SchemaError::IdentifierTooLong { kind: "index", .. })
        ));

        // Generated names are shortened instead
        let exact = "t".repeat(schemata_sql::PG_IDENT_MAX);
        let def = TableDef::new(exact)
            .column(ColumnDef::new("id", "uuid").primary_key())
            .index(IndexDef::new(["id"]));
        let described = Introspector::default().describe(&def).unwrap();
        assert_eq!(described.indexes()[0].name.len(), schemata_sql::PG_IDENT_MAX);
    }

    #[test]
    fn test_own_schema_references_stay_internal() {
        let def = TableDef::new("participant")
            .column(ColumnDef::new("room_id", "uuid"))
            .column(ColumnDef::new("agent_id", "uuid"))
            .foreign_key(ForeignKeyDef::new(["room_id"], "room", ["id"]).in_schema("plugin_sql"))
            .foreign_key(ForeignKeyDef::new(["agent_id"], "agent", ["id"]).in_schema("core"));

        let table = Introspector::default()
            .with_own_schema("plugin_sql")
            .describe(&def)
            .unwrap();

        let deps: Vec<&String> = table.dependencies().iter().collect();
        assert_eq!(deps, vec!["room"]);
        assert_eq!(table.external_references().len(), 1);
        assert_eq!(table.external_references()[0].schema, "core");
    }

    #[test]
    fn test_auto_generated_names() {
        let def = room()
            .unique(["name", "id"])
            .check(CheckDef::new("length(name) > 0"))
            .index(IndexDef::new(["name"]));
        let table = Introspector::default().describe(&def).unwrap();

        assert_eq!(table.constraints()[0].name(), "uq_room_name_id");
        assert!(table.constraints()[1].name().starts_with("ck_room_"));
        assert_eq!(table.indexes()[0].name, "idx_room_name");
    }
}
