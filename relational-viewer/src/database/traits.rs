//! Storage handle trait
//!
//! This trait defines what the engine needs from an embedded database. The
//! engine never hands it user-written SQL: statements are rendered by the
//! query planner from catalog identifiers, with values bound as parameters.

use crate::schema::{TableKind, Value};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// A rendered SQL statement together with its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// A schema object as listed by the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSchemaObject {
    pub name: String,
    pub kind: TableKind,
    /// The `CREATE` statement text, when the database keeps one
    pub sql: Option<String>,
}

/// One column as reported by the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    /// 1-based position in the primary key, 0 when not part of it
    pub primary_key_position: i64,
}

/// One column pair of a declared foreign key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawForeignKey {
    pub id: i64,
    pub seq: i64,
    pub table: String,
    pub from: String,
    pub to: Option<String>,
}

/// A lazily produced sequence of result rows, one value per selected column
pub type RawRowStream = BoxStream<'static, Result<Vec<Value>, StorageError>>;

/// Storage handle for schema discovery and data access
///
/// Implementations open the database read-only. Write access is never
/// requested.
#[async_trait]
pub trait StorageHandle: Send + Sync + 'static {
    /// List tables (and views when `include_views` is set), excluding the
    /// database's internal bookkeeping tables
    async fn schema_objects(
        &self,
        include_views: bool,
    ) -> Result<Vec<RawSchemaObject>, StorageError>;

    /// Columns of a table or view, in declaration order
    async fn columns(&self, table: &str) -> Result<Vec<RawColumn>, StorageError>;

    /// Declared foreign keys of a table, ordered by constraint id and position
    async fn foreign_keys(&self, table: &str) -> Result<Vec<RawForeignKey>, StorageError>;

    /// Run a statement returning a single integer (used for counts)
    async fn count(&self, statement: &SqlStatement) -> Result<u64, StorageError>;

    /// Run a read query and stream its rows
    ///
    /// Any connection the stream acquires is held inside the stream and
    /// released when the stream is dropped, whether or not it was drained.
    fn fetch(&self, statement: SqlStatement) -> RawRowStream;

    /// Release every connection. Later calls fail with [`StorageError::Closed`].
    async fn close(&self);
}

/// Storage error type
///
/// Variants carry no storage-layer message text; the detail is logged where
/// the error is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The file is not a database, or is damaged
    #[error("database file is malformed")]
    Malformed,

    /// Another process holds a lock on the database
    #[error("database is busy")]
    Busy,

    /// The file could not be read
    #[error("database file could not be read")]
    Io,

    /// The statement failed
    #[error("query failed")]
    Query,

    /// A value could not be decoded
    #[error("value could not be decoded")]
    Decode,

    /// The handle has been closed
    #[error("storage handle is closed")]
    Closed,
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        tracing::debug!(error = %error, "storage error");

        match &error {
            sqlx::Error::Database(database_error) => {
                // SQLite reports extended result codes; the low byte is the primary code
                let primary_code = database_error
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                match primary_code {
                    Some(11) | Some(26) => StorageError::Malformed,
                    Some(5) | Some(6) => StorageError::Busy,
                    Some(10) | Some(14) => StorageError::Io,
                    _ => StorageError::Query,
                }
            }
            sqlx::Error::Io(_) => StorageError::Io,
            sqlx::Error::PoolTimedOut => StorageError::Busy,
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => StorageError::Closed,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => StorageError::Decode,
            _ => StorageError::Query,
        }
    }
}
