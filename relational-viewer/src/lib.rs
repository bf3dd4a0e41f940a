//! # relational-viewer
//!
//! Schema introspection and relationship-aware, read-only browsing of SQLite
//! database files.
//!
//! ## Features
//!
//! - Dynamic schema discovery for any SQLite file, including views
//! - Relationship graph built from declared foreign keys, followable in both
//!   directions
//! - Paginated, sorted, filtered browsing with every value bound as a query
//!   parameter and every identifier checked against the live schema
//! - Count-capped row estimates so huge tables never need a full scan
//! - Tolerant of malformed schemas: dangling foreign keys and unknown types
//!   become warnings, not errors
//!
//! The crate is the engine only. HTTP routing and rendering live in the host
//! application, which calls into a [`Session`].
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use relational_viewer::{open_session, BrowseRequest, ViewerConfig};
//!
//! # async fn example() -> relational_viewer::Result<()> {
//! let session = open_session("./data/example.db", ViewerConfig::default()).await?;
//!
//! for table in session.list_tables().await? {
//!     println!("{} ({:?})", table.name, table.row_count);
//! }
//!
//! let result = session.browse(&BrowseRequest::new("orders").page_size(20)).await?;
//! for row in &result.rows {
//!     println!("{}", row.to_json());
//! }
//!
//! session.close().await;
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod catalog;
pub mod config;
pub mod database;
pub mod graph;
pub mod materializer;
pub mod pagination;
pub mod planner;
pub mod schema;
pub mod session;

// Public exports
pub use catalog::Catalog;
pub use config::ViewerConfig;
pub use graph::{ColumnPair, ForeignKeyEdge, RelationshipGraph};
pub use materializer::{Cell, LinkDescriptor, LinkPair, Reference, Row, RowStream};
pub use pagination::PaginationCursor;
pub use planner::{
    BrowseRequest, Filter, Operator, Predicate, QueryPlan, SortOrder, ValidationError,
};
pub use schema::{
    Column, DanglingReason, DeclaredForeignKey, RowCount, SchemaWarning, Table, TableInfo,
    TableKind, TypeAffinity, Value,
};
pub use session::{BackReference, BrowseResult, FollowedLink, Session, SessionStatus};

// Re-export storage seam
pub use database::traits::{StorageError, StorageHandle};

#[cfg(feature = "sqlite")]
pub use database::sqlite::SqliteStorage;

#[cfg(feature = "sqlite")]
pub use session::{open_session, SqliteSession};

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for every operation a caller can invoke
///
/// The `Display` output is safe to show to an untrusted caller: storage
/// failures are reduced to a category and never carry query text.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open database: {0}")]
    Open(#[from] OpenError),

    #[error("Table not found: {0}")]
    NotFound(String),

    #[error("Invalid browse request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    State(#[from] StateError),

    #[error("Query timeout exceeded")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open(_) => ErrorKind::Open,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::State(_) => ErrorKind::State,
            Error::Timeout => ErrorKind::Timeout,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }
}

/// Machine-readable error category, for mapping onto status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Open,
    NotFound,
    Validation,
    State,
    Timeout,
    Storage,
}

/// Reasons a database file could not be opened
///
/// An open that fails leaves no session state behind.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("file does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("file is not a database: {}", .0.display())]
    NotADatabase(PathBuf),

    #[error("file could not be read: {}", .0.display())]
    Unreadable(PathBuf),

    #[error("schema could not be read: {0}")]
    Schema(StorageError),

    #[error("timed out while reading the schema")]
    Timeout,
}

/// Operation invoked in the wrong session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("session has not been opened")]
    NotOpened,

    #[error("session is already open")]
    AlreadyOpened,

    #[error("session is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
