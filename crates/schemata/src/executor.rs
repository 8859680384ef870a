//! The boundary between the engine and a live database.
//!
//! The engine never opens connections. It is handed something implementing
//! [`Executor`], asks it for a [`Transaction`], and feeds that transaction SQL
//! text one statement at a time. Implementations are provided for
//! `tokio_postgres::Client` and `deadpool_postgres::Object`.
//!
//! Dropping a transaction without committing must roll it back. tokio-postgres
//! guarantees this, which is what makes a cancelled migration leave no trace.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::Instrument;

/// A boxed, sendable future, as returned by the executor traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An error reported by the executor, normalised to a SQLSTATE and a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlError {
    /// Five-character SQLSTATE, when the server reported one.
    pub code: Option<String>,
    pub message: String,
}

impl SqlError {
    pub fn new(code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Whether the server reported exactly this SQLSTATE.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for SqlError {}

impl From<tokio_postgres::Error> for SqlError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db) => SqlError::new(Some(db.code().code()), db.message()),
            None => SqlError::new(err.code().map(|c| c.code()), err.to_string()),
        }
    }
}

/// An open transaction.
///
/// `'c` is the lifetime of the connection the transaction borrows.
pub trait Transaction<'c>: Send {
    /// Execute one statement, returning the number of rows affected.
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64, SqlError>>;

    fn commit(self: Box<Self>) -> BoxFuture<'c, Result<(), SqlError>>;

    fn rollback(self: Box<Self>) -> BoxFuture<'c, Result<(), SqlError>>;
}

/// Something that can open transactions, typically a database connection.
pub trait Executor: Send {
    fn begin<'c>(&'c mut self) -> BoxFuture<'c, Result<Box<dyn Transaction<'c> + 'c>, SqlError>>;
}

impl<'c> Transaction<'c> for tokio_postgres::Transaction<'c> {
    fn execute<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<u64, SqlError>> {
        Box::pin(async move {
            tokio_postgres::Transaction::execute(self, sql, &[])
                .await
                .map_err(SqlError::from)
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'c, Result<(), SqlError>> {
        Box::pin(async move {
            tokio_postgres::Transaction::commit(*self)
                .await
                .map_err(SqlError::from)
        })
    }

    fn rollback(self: Box<Self>) -> BoxFuture<'c, Result<(), SqlError>> {
        Box::pin(async move {
            tokio_postgres::Transaction::rollback(*self)
                .await
                .map_err(SqlError::from)
        })
    }
}

impl Executor for tokio_postgres::Client {
    fn begin<'c>(&'c mut self) -> BoxFuture<'c, Result<Box<dyn Transaction<'c> + 'c>, SqlError>> {
        Box::pin(async move {
            let tx = tokio_postgres::Client::transaction(self).await?;
            Ok(Box::new(tx) as Box<dyn Transaction<'c> + 'c>)
        })
    }
}

impl Executor for deadpool_postgres::Object {
    fn begin<'c>(&'c mut self) -> BoxFuture<'c, Result<Box<dyn Transaction<'c> + 'c>, SqlError>> {
        // Deref to the underlying Client so the transaction is a plain tokio-postgres one
        let client: &'c mut tokio_postgres::Client = &mut *self;
        Executor::begin(client)
    }
}

/// Execute a statement inside a `db.execute` span.
pub(crate) async fn execute_traced(
    tx: &mut (dyn Transaction<'_> + '_),
    sql: &str,
) -> Result<u64, SqlError> {
    let span = tracing::debug_span!(
        "db.execute",
        sql = %sql,
        affected = tracing::field::Empty,
    );
    let affected = tx.execute(sql).instrument(span.clone()).await?;
    span.record("affected", affected);
    Ok(affected)
}
