//! SQL text helpers shared by the schemata crates.
//!
//! Everything here is pure string work: quoting identifiers, and
//! deriving deterministic, length-bounded names for schemas, constraints and
//! indexes so that re-running a migration always targets the same objects.

/// Postgres truncates identifiers longer than this many bytes.
pub const PG_IDENT_MAX: usize = 63;

/// Length of the hex hash suffix appended to shortened identifiers.
const HASH_SUFFIX_LEN: usize = 12;

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use schemata_sql::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                f.write_str("\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        f.write_str("\"")
    }
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes, so reserved words like `user` or `order` are safe as
/// table and column names.
pub fn quote_ident(name: &str) -> String {
    Ident(name).to_string()
}

/// Quote a schema-qualified object name.
///
/// ```
/// assert_eq!(schemata_sql::qualified("plugin_a", "memory"), "\"plugin_a\".\"memory\"");
/// ```
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", Ident(schema), Ident(name))
}

/// Derive the schema (namespace) name owned by a plugin.
///
/// The transform is deterministic: a leading `@` is dropped, ASCII letters are
/// lower-cased, and every run of other characters becomes a single `_`.
/// Names that would be empty or start with a digit gain a `p_` prefix.
///
/// ```
/// assert_eq!(schemata_sql::schema_name("@acme/plugin-knowledge"), "acme_plugin_knowledge");
/// assert_eq!(schemata_sql::schema_name("Twitter Client"), "twitter_client");
/// assert_eq!(schemata_sql::schema_name("3d-assets"), "p_3d_assets");
/// ```
pub fn schema_name(plugin: &str) -> String {
    let mut out = String::with_capacity(plugin.len());
    let mut pending_sep = false;

    for c in plugin.trim_start_matches('@').chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() {
        return format!("p_{}", short_hash(plugin));
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "p_");
    }

    fit_identifier(out)
}

/// Shorten an identifier to fit Postgres' 63-byte limit.
///
/// Identifiers that already fit are returned unchanged. Longer ones keep as
/// much of their head as possible and end with a stable hash of the full name,
/// so two long names sharing a prefix still map to distinct identifiers.
pub fn fit_identifier(name: String) -> String {
    if name.len() <= PG_IDENT_MAX {
        return name;
    }

    let hash = short_hash(&name);
    let mut head_len = PG_IDENT_MAX - 1 - HASH_SUFFIX_LEN;
    while head_len > 0 && !name.is_char_boundary(head_len) {
        head_len -= 1;
    }
    format!("{}_{}", &name[..head_len], hash)
}

/// Generate a standard index name for a table and columns.
///
/// ```
/// assert_eq!(schemata_sql::index_name("user", &["email"]), "idx_user_email");
/// assert_eq!(schemata_sql::index_name("post", &["author_id", "created_at"]), "idx_post_author_id_created_at");
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    fit_identifier(format!("idx_{}_{}", table, join_columns(columns)))
}

/// Generate a standard unique constraint name for a table and columns.
///
/// ```
/// assert_eq!(schemata_sql::unique_constraint_name("category", &["shop_id", "handle"]), "uq_category_shop_id_handle");
/// ```
pub fn unique_constraint_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    fit_identifier(format!("uq_{}_{}", table, join_columns(columns)))
}

/// Generate a standard foreign key constraint name for a table and its local columns.
///
/// ```
/// assert_eq!(schemata_sql::foreign_key_name("memory", &["room_id"]), "fk_memory_room_id");
/// ```
pub fn foreign_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    fit_identifier(format!("fk_{}_{}", table, join_columns(columns)))
}

/// Generate a deterministic CHECK constraint name for a table and expression.
///
/// The expression is whitespace-normalized before hashing, so reformatting a
/// check does not rename it.
pub fn check_constraint_name(table: &str, expr: &str) -> String {
    let normalized = normalize_sql_expr(expr);
    let suffix = short_hash(&normalized);

    let max_table_len = PG_IDENT_MAX.saturating_sub("ck__".len() + suffix.len());
    let mut len = max_table_len.min(table.len());
    while len > 0 && !table.is_char_boundary(len) {
        len -= 1;
    }

    format!("ck_{}_{}", &table[..len], suffix)
}

/// The name Postgres gives an index it creates on its own, such as the one
/// behind an inline `PRIMARY KEY` (`label = "pkey"`) or a column-level
/// `UNIQUE` (`label = "key"`).
///
/// Mirrors the server's truncation: the longer of `table` and `column` is
/// shortened first until the whole name fits.
///
/// ```
/// assert_eq!(schemata_sql::implicit_index_name("user", None, "pkey"), "user_pkey");
/// assert_eq!(schemata_sql::implicit_index_name("user", Some("email"), "key"), "user_email_key");
/// ```
pub fn implicit_index_name(table: &str, column: Option<&str>, label: &str) -> String {
    let mut overhead = label.len() + 1;
    if column.is_some() {
        overhead += 1;
    }
    let available = PG_IDENT_MAX.saturating_sub(overhead);

    let mut table_len = table.len();
    let mut column_len = column.map_or(0, str::len);
    while table_len + column_len > available {
        if table_len > column_len {
            table_len -= 1;
        } else {
            column_len -= 1;
        }
    }

    let mut out = clip(table, table_len).to_string();
    if let Some(column) = column {
        out.push('_');
        out.push_str(clip(column, column_len));
    }
    out.push('_');
    out.push_str(label);
    out
}

/// The longest prefix of `s` no longer than `len` bytes.
fn clip(s: &str, len: usize) -> &str {
    let mut len = len.min(s.len());
    while len > 0 && !s.is_char_boundary(len) {
        len -= 1;
    }
    &s[..len]
}

fn join_columns(columns: &[impl AsRef<str>]) -> String {
    columns
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join("_")
}

fn short_hash(input: &str) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex().to_string();
    hex[..HASH_SUFFIX_LEN].to_string()
}

/// Collapse whitespace outside of quoted sections.
fn normalize_sql_expr(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut pending_space = false;
    let mut quote: Option<char> = None;

    let mut chars = expr.chars().peekable();
    while let Some(ch) = chars.next() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                // doubled quote is an escape, stay inside
                if chars.peek() == Some(&q) {
                    out.push(q);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }

        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
        if ch == '\'' || ch == '"' {
            quote = Some(ch);
        }
    }

    out
}
