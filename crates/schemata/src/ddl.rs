//! DDL generation.
//!
//! Every statement is written to be safe to re-run: schemas, tables and
//! indexes use `IF NOT EXISTS`. Foreign keys have no such clause in
//! Postgres, so the runner treats "already exists" on them as success.

use schemata_db_schema::{ConstraintDescriptor, ForeignKeyDescriptor, IndexDescriptor, OnDelete, TableDescriptor};
use schemata_sql::{qualified, quote_ident};

/// What a [`Statement`] creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    CreateSchema,
    CreateTable,
    AddForeignKey,
    CreateIndex,
}

impl StatementKind {
    /// The SQLSTATE that means "what this statement creates is already
    /// there", if that can happen at all.
    ///
    /// Tables and indexes are created with `IF NOT EXISTS`, so Postgres never
    /// raises 42P07 for the object itself. When it does, some other relation
    /// holds the name.
    pub fn already_exists_code(self) -> Option<&'static str> {
        match self {
            StatementKind::CreateSchema => Some("42P06"),
            StatementKind::AddForeignKey => Some("42710"),
            StatementKind::CreateTable | StatementKind::CreateIndex => None,
        }
    }
}

/// One DDL statement, tagged with the table it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    /// `None` for schema-level statements
    pub table: Option<String>,
    pub sql: String,
}

impl Statement {
    pub fn create_schema(schema: &str) -> Self {
        Self {
            kind: StatementKind::CreateSchema,
            table: None,
            sql: create_schema_sql(schema),
        }
    }
}

/// Everything needed to migrate one plugin, computed without touching the
/// database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub plugin: String,
    pub schema: String,
    pub statements: Vec<Statement>,
}

impl MigrationPlan {
    /// Render the plan as a SQL script, one statement per paragraph.
    pub fn to_sql(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.sql.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Tables the plan creates, in creation order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .filter(|s| s.kind == StatementKind::CreateTable)
            .filter_map(|s| s.table.as_deref())
    }
}

/// Generate the statements that create `tables` inside `schema`.
///
/// `tables` must already be in dependency order (see [`crate::resolve`]).
/// Output order: the schema, every table, every foreign key, every index.
pub fn generate(schema: &str, tables: &[TableDescriptor]) -> Vec<Statement> {
    let mut statements = vec![Statement::create_schema(schema)];

    // Create tables (without foreign keys, so creation order never matters for them)
    for table in tables {
        statements.push(Statement {
            kind: StatementKind::CreateTable,
            table: Some(table.name().to_string()),
            sql: create_table_sql(schema, table),
        });
    }

    for table in tables {
        for fk in table.foreign_keys() {
            statements.push(Statement {
                kind: StatementKind::AddForeignKey,
                table: Some(table.name().to_string()),
                sql: add_foreign_key_sql(schema, table, fk),
            });
        }
    }

    for table in tables {
        for idx in table.indexes() {
            statements.push(Statement {
                kind: StatementKind::CreateIndex,
                table: Some(table.name().to_string()),
                sql: create_index_sql(schema, table, idx),
            });
        }
    }

    statements
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema))
}

/// Generate the CREATE TABLE statement.
///
/// Does not include foreign key constraints; those are added separately by
/// [`add_foreign_key_sql`].
pub fn create_table_sql(schema: &str, table: &TableDescriptor) -> String {
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n",
        qualified(schema, table.name())
    );

    let pk_columns = table.primary_key_columns();
    let use_table_pk_constraint = pk_columns.len() > 1;

    let mut parts: Vec<String> = table
        .columns()
        .iter()
        .map(|col| {
            let mut def = format!("    {} {}", quote_ident(&col.name), col.native_type);

            if col.primary_key && !use_table_pk_constraint {
                def.push_str(" PRIMARY KEY");
            }

            // Composite keys are declared at table level, so their columns
            // need an explicit NOT NULL
            if !col.nullable && (!col.primary_key || use_table_pk_constraint) {
                def.push_str(" NOT NULL");
            }

            if col.unique && !col.primary_key {
                def.push_str(" UNIQUE");
            }

            if let Some(default) = &col.default {
                def.push_str(&format!(" DEFAULT {}", default));
            }

            def
        })
        .collect();

    if use_table_pk_constraint {
        let quoted: Vec<_> = pk_columns.iter().map(|c| quote_ident(c)).collect();
        parts.push(format!("    PRIMARY KEY ({})", quoted.join(", ")));
    }

    for constraint in table.constraints() {
        match constraint {
            ConstraintDescriptor::Unique { name, columns } => {
                let quoted: Vec<_> = columns.iter().map(|c| quote_ident(c)).collect();
                parts.push(format!(
                    "    CONSTRAINT {} UNIQUE ({})",
                    quote_ident(name),
                    quoted.join(", ")
                ));
            }
            ConstraintDescriptor::Check { name, expr } => {
                parts.push(format!(
                    "    CONSTRAINT {} CHECK ({})",
                    quote_ident(name),
                    expr
                ));
            }
            ConstraintDescriptor::ForeignKey(_) => {}
        }
    }

    sql.push_str(&parts.join(",\n"));
    sql.push_str("\n);");

    sql
}

/// Generate the ALTER TABLE statement adding one foreign key.
///
/// Intra-plugin references point into `schema`; external ones into the schema
/// they name.
pub fn add_foreign_key_sql(schema: &str, table: &TableDescriptor, fk: &ForeignKeyDescriptor) -> String {
    let target_schema = fk.target_schema.as_deref().unwrap_or(schema);
    let quoted_cols: Vec<_> = fk.columns.iter().map(|c| quote_ident(c)).collect();
    let quoted_ref_cols: Vec<_> = fk.target_columns.iter().map(|c| quote_ident(c)).collect();
    let on_delete = match fk.on_delete {
        OnDelete::NoAction => String::new(),
        action => format!(" ON DELETE {}", action.to_sql()),
    };

    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){};",
        qualified(schema, table.name()),
        quote_ident(&fk.name),
        quoted_cols.join(", "),
        qualified(target_schema, &fk.target_table),
        quoted_ref_cols.join(", "),
        on_delete
    )
}

/// Generate the CREATE INDEX statement for an index.
pub fn create_index_sql(schema: &str, table: &TableDescriptor, idx: &IndexDescriptor) -> String {
    let unique = if idx.unique { "UNIQUE " } else { "" };
    let method = idx
        .method
        .as_ref()
        .map(|m| format!(" USING {}", m))
        .unwrap_or_default();
    let cols: Vec<_> = idx.columns.iter().map(|c| c.to_sql()).collect();
    let where_clause = idx
        .where_clause
        .as_ref()
        .map(|w| format!(" WHERE {}", w))
        .unwrap_or_default();

    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {}{} ({}){};",
        unique,
        quote_ident(&idx.name),
        qualified(schema, table.name()),
        method,
        cols.join(", "),
        where_clause
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{CheckDef, ColumnDef, ForeignKeyDef, IndexDef, Introspector, TableDef};

    fn describe(def: TableDef) -> TableDescriptor {
        Introspector::default().describe(&def).unwrap()
    }

    fn memory() -> TableDescriptor {
        describe(
            TableDef::new("memory")
                .column(
                    ColumnDef::new("id", "uuid")
                        .primary_key()
                        .default("gen_random_uuid()"),
                )
                .column(ColumnDef::new("room_id", "uuid").not_null())
                .column(ColumnDef::new("parent_id", "uuid"))
                .column(ColumnDef::new("content", "jsonb").not_null())
                .column(ColumnDef::new("embedding", "vector(384)"))
                .foreign_key(ForeignKeyDef::new(["room_id"], "room", ["id"]).on_delete("cascade"))
                .foreign_key(ForeignKeyDef::new(["parent_id"], "memory", ["id"]))
                .check(CheckDef::new("jsonb_typeof(content) = 'object'").named("ck_memory_content"))
                .index(
                    IndexDef::new(["embedding vector_cosine_ops"])
                        .method("hnsw")
                        .named("idx_memory_embedding"),
                )
                .index(IndexDef::new(["room_id", "id DESC"]).where_clause("parent_id IS NULL")),
        )
    }

    #[test]
    fn test_create_table_sql() {
        insta::assert_snapshot!(create_table_sql("plugin_sql", &memory()), @r#"
        CREATE TABLE IF NOT EXISTS "plugin_sql"."memory" (
            "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            "room_id" UUID NOT NULL,
            "parent_id" UUID,
            "content" JSONB NOT NULL,
            "embedding" vector(384),
            CONSTRAINT "ck_memory_content" CHECK (jsonb_typeof(content) = 'object')
        );
        "#);
    }

    #[test]
    fn test_composite_primary_key_and_unique() {
        let participant = describe(
            TableDef::new("participant")
                .column(ColumnDef::new("room_id", "uuid").primary_key())
                .column(ColumnDef::new("entity_id", "uuid").primary_key())
                .column(ColumnDef::new("handle", "text").unique())
                .unique(["room_id", "handle"]),
        );
        let sql = create_table_sql("s", &participant);
        assert!(sql.contains("\"room_id\" UUID NOT NULL,"));
        assert!(sql.contains("\"handle\" TEXT UNIQUE,"));
        assert!(sql.contains("PRIMARY KEY (\"room_id\", \"entity_id\")"));
        assert!(sql.contains(
            "CONSTRAINT \"uq_participant_room_id_handle\" UNIQUE (\"room_id\", \"handle\")"
        ));
    }

    #[test]
    fn test_foreign_keys_follow_all_tables() {
        let room = describe(TableDef::new("room").column(ColumnDef::new("id", "uuid").primary_key()));
        let statements = generate("plugin_sql", &[room, memory()]);

        let kinds: Vec<StatementKind> = statements.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StatementKind::CreateSchema,
                StatementKind::CreateTable,
                StatementKind::CreateTable,
                StatementKind::AddForeignKey,
                StatementKind::AddForeignKey,
                StatementKind::CreateIndex,
                StatementKind::CreateIndex,
            ]
        );
        assert_eq!(statements[0].sql, "CREATE SCHEMA IF NOT EXISTS \"plugin_sql\";");
        assert_eq!(
            statements[3].sql,
            "ALTER TABLE \"plugin_sql\".\"memory\" ADD CONSTRAINT \"fk_memory_room_id\" FOREIGN KEY (\"room_id\") REFERENCES \"plugin_sql\".\"room\" (\"id\") ON DELETE CASCADE;"
        );
        assert_eq!(
            statements[4].sql,
            "ALTER TABLE \"plugin_sql\".\"memory\" ADD CONSTRAINT \"fk_memory_parent_id\" FOREIGN KEY (\"parent_id\") REFERENCES \"plugin_sql\".\"memory\" (\"id\");"
        );
    }

    #[test]
    fn test_index_sql() {
        let statements = generate("plugin_sql", &[memory()]);
        let indexes: Vec<&str> = statements
            .iter()
            .filter(|s| s.kind == StatementKind::CreateIndex)
            .map(|s| s.sql.as_str())
            .collect();
        assert_eq!(
            indexes,
            vec![
                "CREATE INDEX IF NOT EXISTS \"idx_memory_embedding\" ON \"plugin_sql\".\"memory\" USING hnsw (\"embedding\" vector_cosine_ops);",
                "CREATE INDEX IF NOT EXISTS \"idx_memory_room_id_id\" ON \"plugin_sql\".\"memory\" (\"room_id\", \"id\" DESC) WHERE parent_id IS NULL;",
            ]
        );
    }

    #[test]
    fn test_external_reference_uses_its_own_schema() {
        let participant = describe(
            TableDef::new("participant")
                .column(ColumnDef::new("agent_id", "uuid"))
                .foreign_key(ForeignKeyDef::new(["agent_id"], "agent", ["id"]).in_schema("core")),
        );
        let fk = participant.foreign_keys().next().unwrap();
        assert!(
            add_foreign_key_sql("plugin_sql", &participant, fk)
                .contains("REFERENCES \"core\".\"agent\" (\"id\")")
        );
    }

    #[test]
    fn test_only_schemas_and_foreign_keys_can_already_exist() {
        assert_eq!(StatementKind::CreateSchema.already_exists_code(), Some("42P06"));
        assert_eq!(StatementKind::AddForeignKey.already_exists_code(), Some("42710"));
        assert_eq!(StatementKind::CreateTable.already_exists_code(), None);
        assert_eq!(StatementKind::CreateIndex.already_exists_code(), None);
    }

    #[test]
    fn test_empty_plugin_still_creates_schema() {
        let plan = MigrationPlan {
            plugin: "empty".to_string(),
            schema: "empty".to_string(),
            statements: generate("empty", &[]),
        };
        assert_eq!(plan.to_sql(), "CREATE SCHEMA IF NOT EXISTS \"empty\";");
        assert_eq!(plan.tables().count(), 0);
    }
}
