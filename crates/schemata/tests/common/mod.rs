//! Test support: an in-memory stand-in for a Postgres catalog.
//!
//! [`MemoryDatabase`] understands exactly the statements schemata generates
//! and the transaction control the runner issues. It reproduces the parts of
//! Postgres behaviour the engine relies on:
//!
//! - work done in a transaction is invisible to the catalog until commit;
//! - tables, indexes and named unique constraints share one relation
//!   namespace per schema: `IF NOT EXISTS` skips any relation holding the
//!   name, and an inline `CONSTRAINT ... UNIQUE` whose name is taken fails
//!   with 42P07;
//! - any error aborts the transaction until `ROLLBACK TO SAVEPOINT`;
//! - `ALTER TABLE ... ADD CONSTRAINT` on an existing constraint fails with
//!   42710, while `IF NOT EXISTS` statements are no-ops;
//! - creating a table in a missing schema fails with 3F000, referencing a
//!   missing table with 42P01.

#![allow(dead_code)]

use schemata::executor::BoxFuture;
use schemata::{Executor, SqlError, Transaction};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    committed: BTreeSet<String>,
    fail_on: Vec<String>,
    hang_on: Vec<String>,
    log: Vec<String>,
}

/// A shared, in-memory catalog. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new connection to this database.
    pub fn connect(&self) -> MemoryExecutor {
        MemoryExecutor { db: self.clone() }
    }

    /// Make every statement containing `needle` fail with a syntax error.
    pub fn fail_on(&self, needle: &str) {
        self.state.lock().unwrap().fail_on.push(needle.to_string());
    }

    /// Make every statement containing `needle` never complete.
    pub fn hang_on(&self, needle: &str) {
        self.state.lock().unwrap().hang_on.push(needle.to_string());
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_on.clear();
        state.hang_on.clear();
    }

    /// Every committed catalog object, as `kind:schema.name` keys.
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.snapshot().contains(&schema_key(schema))
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        self.snapshot().contains(&table_key(schema, table))
    }

    pub fn has_constraint(&self, schema: &str, table: &str, constraint: &str) -> bool {
        self.snapshot()
            .contains(&constraint_key(schema, table, constraint))
    }

    pub fn has_index(&self, schema: &str, index: &str) -> bool {
        self.snapshot().contains(&index_key(schema, index))
    }

    /// Whether `index` exists and belongs to `table`.
    pub fn has_index_on(&self, schema: &str, table: &str, index: &str) -> bool {
        self.snapshot()
            .contains(&index_owner_key(schema, index, table))
    }

    /// Tables committed in `schema`, sorted.
    pub fn tables_in(&self, schema: &str) -> Vec<String> {
        let prefix = format!("table:{}.", schema);
        self.snapshot()
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Every statement executed so far, including transaction control.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn committed_contains(&self, key: &str) -> bool {
        self.state.lock().unwrap().committed.contains(key)
    }

    fn should_hang(&self, sql: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .hang_on
            .iter()
            .any(|n| sql.contains(n.as_str()))
    }

    fn should_fail(&self, sql: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .fail_on
            .iter()
            .any(|n| sql.contains(n.as_str()))
    }

    fn record(&self, sql: &str) {
        self.state.lock().unwrap().log.push(sql.to_string());
    }

    fn commit(&self, created: BTreeSet<String>) {
        self.state.lock().unwrap().committed.extend(created);
    }
}

/// A connection to a [`MemoryDatabase`].
pub struct MemoryExecutor {
    db: MemoryDatabase,
}

impl Executor for MemoryExecutor {
    fn begin<'c>(&'c mut self) -> BoxFuture<'c, Result<Box<dyn Transaction<'c> + 'c>, SqlError>> {
        let tx = MemoryTransaction {
            db: self.db.clone(),
            created: BTreeSet::new(),
            savepoints: Vec::new(),
            aborted: false,
        };
        Box::pin(async move { Ok(Box::new(tx) as Box<dyn Transaction<'c> + 'c>) })
    }
}

struct MemoryTransaction {
    db: MemoryDatabase,
    /// Objects created by this transaction, not yet visible to others
    created: BTreeSet<String>,
    savepoints: Vec<(String, BTreeSet<String>)>,
    aborted: bool,
}

fn err(code: &str, message: impl Into<String>) -> SqlError {
    SqlError::new(Some(code), message)
}

fn schema_key(schema: &str) -> String {
    format!("schema:{}", schema)
}

fn table_key(schema: &str, table: &str) -> String {
    format!("table:{}.{}", schema, table)
}

fn constraint_key(schema: &str, table: &str, constraint: &str) -> String {
    format!("constraint:{}.{}.{}", schema, table, constraint)
}

fn index_key(schema: &str, index: &str) -> String {
    format!("index:{}.{}", schema, index)
}

fn index_owner_key(schema: &str, index: &str, table: &str) -> String {
    format!("index_on:{}.{}.{}", schema, index, table)
}

/// Any pg_class entry: a table or an index.
fn relation_key(schema: &str, name: &str) -> String {
    format!("relation:{}.{}", schema, name)
}

/// Names of the inline `CONSTRAINT "name" UNIQUE (...)` clauses of a
/// CREATE TABLE statement.
fn unique_constraints(sql: &str) -> Vec<String> {
    sql.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("CONSTRAINT ") && line.contains(" UNIQUE ("))
        .filter_map(|line| idents(line).into_iter().next())
        .collect()
}

/// Double-quoted identifiers in `sql`, in order.
fn idents(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        out.push(ident);
    }
    out
}

impl MemoryTransaction {
    fn exists(&self, key: &str) -> bool {
        self.created.contains(key) || self.db.committed_contains(key)
    }

    fn require(&self, key: &str, code: &str, what: &str) -> Result<(), SqlError> {
        if self.exists(key) {
            Ok(())
        } else {
            Err(err(code, format!("{} does not exist", what)))
        }
    }

    fn apply(&mut self, sql: &str) -> Result<u64, SqlError> {
        if let Some(name) = sql.strip_prefix("ROLLBACK TO SAVEPOINT ") {
            let Some((_, snapshot)) = self.savepoints.iter().rev().find(|(n, _)| n == name) else {
                return Err(err("3B001", format!("savepoint \"{}\" does not exist", name)));
            };
            self.created = snapshot.clone();
            self.aborted = false;
            return Ok(0);
        }

        if self.aborted {
            return Err(err(
                "25P02",
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }

        let result = self.apply_statement(sql);
        if result.is_err() {
            self.aborted = true;
        }
        result
    }

    fn apply_statement(&mut self, sql: &str) -> Result<u64, SqlError> {
        if self.db.should_fail(sql) {
            return Err(err("42601", format!("syntax error in: {}", sql)));
        }

        if let Some(name) = sql.strip_prefix("SAVEPOINT ") {
            self.savepoints.push((name.to_string(), self.created.clone()));
            return Ok(0);
        }

        if let Some(name) = sql.strip_prefix("RELEASE SAVEPOINT ") {
            let Some(pos) = self.savepoints.iter().rposition(|(n, _)| n == name) else {
                return Err(err("3B001", format!("savepoint \"{}\" does not exist", name)));
            };
            self.savepoints.truncate(pos);
            return Ok(0);
        }

        let ids = idents(sql);

        if sql.starts_with("CREATE SCHEMA IF NOT EXISTS ") {
            self.created.insert(schema_key(&ids[0]));
            return Ok(0);
        }

        if sql.starts_with("CREATE TABLE IF NOT EXISTS ") {
            let (schema, table) = (&ids[0], &ids[1]);
            self.require(
                &schema_key(schema),
                "3F000",
                &format!("schema \"{}\"", schema),
            )?;
            if self.exists(&relation_key(schema, table)) {
                // NOTICE: relation already exists, skipping
                return Ok(0);
            }

            let mut created = vec![table_key(schema, table), relation_key(schema, table)];
            for constraint in unique_constraints(sql) {
                let relation = relation_key(schema, &constraint);
                if self.exists(&relation) || created.contains(&relation) {
                    return Err(err(
                        "42P07",
                        format!("relation \"{}\" already exists", constraint),
                    ));
                }
                created.push(relation);
                created.push(constraint_key(schema, table, &constraint));
                created.push(index_key(schema, &constraint));
                created.push(index_owner_key(schema, &constraint, table));
            }
            self.created.extend(created);
            return Ok(0);
        }

        if sql.starts_with("ALTER TABLE ") && sql.contains(" ADD CONSTRAINT ") {
            let (schema, table, constraint) = (&ids[0], &ids[1], &ids[2]);
            self.require(
                &table_key(schema, table),
                "42P01",
                &format!("relation \"{}.{}\"", schema, table),
            )?;

            if let Some((_, target)) = sql.split_once(" REFERENCES ") {
                let target = idents(target);
                self.require(
                    &table_key(&target[0], &target[1]),
                    "42P01",
                    &format!("relation \"{}.{}\"", target[0], target[1]),
                )?;
            }

            let key = constraint_key(schema, table, constraint);
            if self.exists(&key) {
                return Err(err(
                    "42710",
                    format!(
                        "constraint \"{}\" for relation \"{}\" already exists",
                        constraint, table
                    ),
                ));
            }
            self.created.insert(key);
            return Ok(0);
        }

        if sql.starts_with("CREATE INDEX IF NOT EXISTS ")
            || sql.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS ")
        {
            let index = &ids[0];
            let Some((_, on)) = sql.split_once(" ON ") else {
                return Err(err("42601", "index without ON clause"));
            };
            let on = idents(on);
            let (schema, table) = (&on[0], &on[1]);
            self.require(
                &table_key(schema, table),
                "42P01",
                &format!("relation \"{}.{}\"", schema, table),
            )?;
            if self.exists(&relation_key(schema, index)) {
                // Skipped even when the relation is another table's index
                return Ok(0);
            }
            self.created.insert(relation_key(schema, index));
            self.created.insert(index_key(schema, index));
            self.created.insert(index_owner_key(schema, index, table));
            return Ok(0);
        }

        Err(err("42601", format!("unsupported statement: {}", sql)))
    }
}

impl<'c> Transaction<'c> for MemoryTransaction {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64, SqlError>> {
        Box::pin(async move {
            self.db.record(sql);
            if self.db.should_hang(sql) {
                std::future::pending::<()>().await;
            }
            self.apply(sql)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'c, Result<(), SqlError>> {
        let MemoryTransaction {
            db,
            created,
            aborted,
            ..
        } = *self;
        Box::pin(async move {
            db.record("COMMIT");
            if aborted {
                return Err(err("25P02", "current transaction is aborted"));
            }
            db.commit(created);
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'c, Result<(), SqlError>> {
        Box::pin(async move {
            self.db.record("ROLLBACK");
            Ok(())
        })
    }
}

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
