//! Database abstraction layer
//!
//! This module provides the storage seam the engine reads through: schema
//! metadata, parameterized read queries and count-capped scans.

pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the main trait
pub use traits::StorageHandle;
