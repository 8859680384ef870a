//! Ordering a plugin's tables so every table is created after the tables it
//! references.
//!
//! Foreign keys are always added in a second pass (see [`crate::ddl`]), so the
//! ordering here is about readability and about catching definitions that can
//! never be satisfied: cycles between distinct tables and references to tables
//! the plugin does not define.

use indexmap::IndexMap;
use schemata_db_schema::{ConstraintDescriptor, SemanticType, TableDescriptor};
use std::collections::{BTreeSet, HashMap};

/// Something that occupies a name in a schema's relation namespace.
///
/// Tables, indexes and the indexes behind unique and primary key constraints
/// all share that namespace in Postgres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    Table,
    Index,
    UniqueConstraint,
    /// Named by Postgres: `{table}_pkey`
    PrimaryKey,
    /// Named by Postgres: `{table}_{column}_key`
    UniqueColumn,
}

/// A relation name and the table that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub kind: RelationKind,
    pub table: String,
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RelationKind::Table => write!(f, "table '{}'", self.table),
            RelationKind::Index => write!(f, "an index on '{}'", self.table),
            RelationKind::UniqueConstraint => write!(f, "a unique constraint on '{}'", self.table),
            RelationKind::PrimaryKey => write!(f, "the primary key of '{}'", self.table),
            RelationKind::UniqueColumn => write!(f, "a unique column of '{}'", self.table),
        }
    }
}

/// Errors raised while ordering and cross-checking a plugin's tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Two or more distinct tables reference each other in a loop.
    CircularDependency {
        /// One concrete loop, first table repeated at the end.
        cycle: Vec<String>,
    },
    /// A foreign key names a table the plugin does not define.
    DanglingForeignKey {
        table: String,
        constraint: String,
        target: String,
    },
    /// A foreign key names a column the target table does not have.
    UnknownTargetColumn {
        table: String,
        constraint: String,
        target: String,
        column: String,
    },
    /// A foreign key links columns of incompatible types.
    ForeignKeyTypeMismatch {
        table: String,
        constraint: String,
        column: String,
        column_type: SemanticType,
        target: String,
        target_column: String,
        target_type: SemanticType,
    },
    /// Two objects would get the same name inside the plugin's schema.
    DuplicateRelationName {
        name: String,
        first: Relation,
        second: Relation,
    },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::CircularDependency { cycle } => {
                write!(f, "circular foreign key dependency: {}", cycle.join(" -> "))
            }
            ResolveError::DanglingForeignKey {
                table,
                constraint,
                target,
            } => write!(
                f,
                "foreign key '{}' on table '{}' references table '{}', which is not defined",
                constraint, table, target
            ),
            ResolveError::UnknownTargetColumn {
                table,
                constraint,
                target,
                column,
            } => write!(
                f,
                "foreign key '{}' on table '{}' references unknown column '{}.{}'",
                constraint, table, target, column
            ),
            ResolveError::ForeignKeyTypeMismatch {
                table,
                constraint,
                column,
                column_type,
                target,
                target_column,
                target_type,
            } => write!(
                f,
                "foreign key '{}' links {}.{} ({}) to {}.{} ({})",
                constraint, table, column, column_type, target, target_column, target_type
            ),
            ResolveError::DuplicateRelationName {
                name,
                first,
                second,
            } => write!(
                f,
                "relation name '{}' is used by both {} and {}; give one of them an explicit name",
                name, first, second
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Order `tables` so that every table comes after the tables it references.
///
/// Tables with no ordering constraint between them keep their declaration
/// order. Self references are allowed and ignored for ordering purposes.
/// References into other schemas are neither ordered nor validated.
pub fn resolve(tables: Vec<TableDescriptor>) -> Result<Vec<TableDescriptor>, ResolveError> {
    let arena: IndexMap<String, TableDescriptor> = tables
        .into_iter()
        .map(|t| (t.name().to_string(), t))
        .collect();

    check_relation_names(&arena)?;
    validate_foreign_keys(&arena)?;

    let n = arena.len();
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (idx, table) in arena.values().enumerate() {
        for dep in table.dependencies() {
            if dep == table.name() {
                continue;
            }
            // validate_foreign_keys guarantees the target exists
            if let Some(dep_idx) = arena.get_index_of(dep) {
                in_degree[idx] += 1;
                dependents[dep_idx].push(idx);
            }
        }
    }

    // Ready queue ordered by declaration index
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &dependent in &dependents[idx] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < n {
        let cycle = find_cycle(&arena, &in_degree);
        return Err(ResolveError::CircularDependency { cycle });
    }

    let mut slots: Vec<Option<TableDescriptor>> = arena.into_values().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect())
}

/// Walk dependencies among the tables Kahn's algorithm could not schedule
/// until a table repeats.
///
/// Every unscheduled table still waits on at least one other unscheduled
/// table, so the walk cannot dead-end.
fn find_cycle(arena: &IndexMap<String, TableDescriptor>, in_degree: &[usize]) -> Vec<String> {
    let stuck = |name: &str| arena.get_index_of(name).is_some_and(|i| in_degree[i] > 0);

    let Some(start) = in_degree.iter().position(|&d| d > 0) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|&p| p == current) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&i| arena[i].name().to_string())
                .collect();
            cycle.push(arena[current].name().to_string());
            return cycle;
        }
        path.push(current);

        let table = &arena[current];
        let next = table
            .dependencies()
            .iter()
            .filter(|dep| dep.as_str() != table.name())
            .find(|dep| stuck(dep.as_str()))
            .and_then(|dep| arena.get_index_of(dep.as_str()));

        match next {
            Some(next) => current = next,
            None => return path.iter().map(|&i| arena[i].name().to_string()).collect(),
        }
    }
}

/// Every table, index and unique constraint must have a name of its own
/// across the whole plugin: `IF NOT EXISTS` would otherwise skip the second
/// object without a word.
///
/// Names Postgres picks itself (primary key and column-level unique indexes)
/// are checked against the declared ones only, since the server steers its
/// own picks around each other.
fn check_relation_names(arena: &IndexMap<String, TableDescriptor>) -> Result<(), ResolveError> {
    let mut claimed: HashMap<String, Relation> = HashMap::new();
    let mut claim = |name: &str, kind: RelationKind, table: &TableDescriptor| {
        let relation = Relation {
            kind,
            table: table.name().to_string(),
        };
        match claimed.get(name) {
            Some(first) => Err(ResolveError::DuplicateRelationName {
                name: name.to_string(),
                first: first.clone(),
                second: relation,
            }),
            None => {
                claimed.insert(name.to_string(), relation);
                Ok(())
            }
        }
    };

    for table in arena.values() {
        claim(table.name(), RelationKind::Table, table)?;
    }
    for table in arena.values() {
        for constraint in table.constraints() {
            if let ConstraintDescriptor::Unique { name, .. } = constraint {
                claim(name, RelationKind::UniqueConstraint, table)?;
            }
        }
        for index in table.indexes() {
            claim(&index.name, RelationKind::Index, table)?;
        }
    }

    let declared = claimed;
    for table in arena.values() {
        let mut implicit = Vec::new();
        if !table.primary_key_columns().is_empty() {
            implicit.push((
                schemata_sql::implicit_index_name(table.name(), None, "pkey"),
                RelationKind::PrimaryKey,
            ));
        }
        for column in table.columns().iter().filter(|c| c.unique && !c.primary_key) {
            implicit.push((
                schemata_sql::implicit_index_name(table.name(), Some(&column.name), "key"),
                RelationKind::UniqueColumn,
            ));
        }

        for (name, kind) in implicit {
            if let Some(first) = declared.get(&name) {
                return Err(ResolveError::DuplicateRelationName {
                    name,
                    first: first.clone(),
                    second: Relation {
                        kind,
                        table: table.name().to_string(),
                    },
                });
            }
        }
    }

    Ok(())
}

fn validate_foreign_keys(arena: &IndexMap<String, TableDescriptor>) -> Result<(), ResolveError> {
    for table in arena.values() {
        for fk in table.foreign_keys().filter(|fk| !fk.is_external()) {
            let Some(target) = arena.get(&fk.target_table) else {
                return Err(ResolveError::DanglingForeignKey {
                    table: table.name().to_string(),
                    constraint: fk.name.clone(),
                    target: fk.target_table.clone(),
                });
            };

            for (local, remote) in fk.columns.iter().zip(&fk.target_columns) {
                let Some(target_column) = target.column(remote) else {
                    return Err(ResolveError::UnknownTargetColumn {
                        table: table.name().to_string(),
                        constraint: fk.name.clone(),
                        target: target.name().to_string(),
                        column: remote.clone(),
                    });
                };
                // Local columns were checked during introspection
                let Some(local_column) = table.column(local) else {
                    continue;
                };

                if !local_column
                    .semantic_type
                    .is_compatible_with(&target_column.semantic_type)
                {
                    return Err(ResolveError::ForeignKeyTypeMismatch {
                        table: table.name().to_string(),
                        constraint: fk.name.clone(),
                        column: local.clone(),
                        column_type: local_column.semantic_type,
                        target: target.name().to_string(),
                        target_column: remote.clone(),
                        target_type: target_column.semantic_type,
                    });
                }
            }
        }
    }
    Ok(())
}
