//! Schema types for dynamic database introspection
//!
//! These types represent database schema information discovered at runtime.
//! Nothing here is known at compile time: tables and columns are plain data
//! read out of the database file when a session is opened.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of schema object a [`Table`] was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TableKind {
    Table,
    View,
}

/// Type affinity derived from a column's declared type
///
/// SQLite does not enforce declared types, so the affinity is only a hint
/// for renderers. Columns with no declaration, or with a declaration that
/// matches none of the affinity rules, are [`TypeAffinity::Opaque`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypeAffinity {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
    Opaque,
}

impl TypeAffinity {
    /// Classify a declared type
    ///
    /// Returns `None` when the declaration is non-empty but not recognized.
    /// The caller decides how to report that; the column is still usable as
    /// an opaque column.
    pub fn classify(declared: &str) -> Option<Self> {
        let declared = declared.trim().to_ascii_uppercase();

        if declared.is_empty() {
            return Some(TypeAffinity::Opaque);
        }
        if declared.contains("INT") {
            return Some(TypeAffinity::Integer);
        }
        if ["CHAR", "CLOB", "TEXT"].iter().any(|tag| declared.contains(tag)) {
            return Some(TypeAffinity::Text);
        }
        if declared.contains("BLOB") {
            return Some(TypeAffinity::Blob);
        }
        if ["REAL", "FLOA", "DOUB"].iter().any(|tag| declared.contains(tag)) {
            return Some(TypeAffinity::Real);
        }

        const NUMERIC_TAGS: &[&str] = &[
            "NUMERIC", "DECIMAL", "BOOLEAN", "BOOL", "DATE", "DATETIME", "TIMESTAMP", "TIME",
        ];
        let base = declared
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        if NUMERIC_TAGS.contains(&base) {
            return Some(TypeAffinity::Numeric);
        }

        None
    }
}

/// Complete schema information for a database table or view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// Name of the table, as stored in the schema
    pub name: String,

    /// Whether this is a table or a view
    pub kind: TableKind,

    /// Columns in declaration order
    pub columns: Vec<Column>,

    /// Primary key column names in key order (empty if there is none)
    pub primary_key: Vec<String>,

    /// Whether rows carry an implicit rowid
    pub has_rowid: bool,

    /// Foreign key constraints as declared, before resolution
    pub foreign_keys: Vec<DeclaredForeignKey>,

    /// Row count gathered when the catalog was read (if available)
    pub row_count: Option<RowCount>,
}

impl Table {
    /// Look up a column by name, ignoring ASCII case like SQLite does
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Position of a column in [`Table::columns`]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn info(&self) -> TableInfo {
        TableInfo {
            name: self.name.clone(),
            kind: self.kind,
            row_count: self.row_count,
        }
    }
}

/// Information about a single column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name
    pub name: String,

    /// Declared type exactly as written in the schema (if any)
    pub declared_type: Option<String>,

    /// Affinity derived from the declared type
    pub affinity: TypeAffinity,

    /// Whether the column allows NULL values
    pub nullable: bool,

    /// Whether this column is part of the primary key
    pub is_primary_key: bool,
}

/// A foreign key constraint as the database declares it
///
/// Nothing here has been checked against the rest of the schema yet; see
/// [`crate::graph::RelationshipGraph`] for the resolved form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredForeignKey {
    /// Constraint id within the owning table
    pub id: i64,

    /// Column names in this table, in constraint order
    pub columns: Vec<String>,

    /// Referenced table name
    pub references_table: String,

    /// Referenced column names; empty when the constraint names only the
    /// table and therefore refers to its primary key
    pub references_columns: Vec<String>,
}

/// A row count, possibly cut short by a count-capped scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "count", rename_all = "camelCase")]
pub enum RowCount {
    /// The exact number of rows
    Exact(u64),

    /// The scan stopped at its ceiling; at least this many rows exist
    AtLeast(u64),
}

impl RowCount {
    pub fn value(&self) -> u64 {
        match self {
            RowCount::Exact(count) | RowCount::AtLeast(count) => *count,
        }
    }

    pub fn is_capped(&self) -> bool {
        matches!(self, RowCount::AtLeast(_))
    }
}

/// Information about a table (for listing)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Table name
    pub name: String,

    /// Table or view
    pub kind: TableKind,

    /// Row count estimate (if available)
    pub row_count: Option<RowCount>,
}

/// A single cell value, one variant per SQLite storage class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to a plain JSON value for rendering
    ///
    /// Blobs are not rendered inline; only their size is reported.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(value) => serde_json::Value::from(*value),
            Value::Real(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(value) => serde_json::Value::String(value.clone()),
            Value::Blob(value) => {
                serde_json::Value::String(format!("[BLOB: {} bytes]", value.len()))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Why a declared foreign key could not be turned into an edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DanglingReason {
    MissingTable,
    MissingSourceColumn(String),
    MissingTargetColumn(String),
    NoTargetKey,
}

/// Non-fatal schema anomaly
///
/// Warnings are collected while the catalog is read and while the
/// relationship graph is built. They are never raised as errors; the
/// affected feature degrades instead (a cell has no link, a column is
/// treated as opaque, a table has no row count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "camelCase")]
pub enum SchemaWarning {
    /// A foreign key points at something the catalog does not contain
    DanglingForeignKey {
        table: String,
        columns: Vec<String>,
        references_table: String,
        reason: DanglingReason,
    },

    /// A foreign key's column lists have different lengths
    ForeignKeyArity {
        table: String,
        columns: Vec<String>,
        references_table: String,
        expected: usize,
        found: usize,
    },

    /// A declared type matched no affinity rule
    UnresolvableType {
        table: String,
        column: String,
        declared_type: String,
    },

    /// Counting rows failed or timed out
    RowCountUnavailable { table: String },

    /// Column metadata could not be read; the object is not browsable
    UnreadableTable { table: String },

    /// Foreign key metadata could not be read; the table has no links
    ForeignKeysUnavailable { table: String },
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaWarning::DanglingForeignKey {
                table,
                columns,
                references_table,
                reason,
            } => {
                let columns = columns.join(", ");
                match reason {
                    DanglingReason::MissingTable => write!(
                        f,
                        "foreign key {table}({columns}) references missing table {references_table}"
                    ),
                    DanglingReason::MissingSourceColumn(column) => write!(
                        f,
                        "foreign key {table}({columns}) uses missing column {column}"
                    ),
                    DanglingReason::MissingTargetColumn(column) => write!(
                        f,
                        "foreign key {table}({columns}) references missing column {references_table}.{column}"
                    ),
                    DanglingReason::NoTargetKey => write!(
                        f,
                        "foreign key {table}({columns}) references {references_table}, which has no primary key"
                    ),
                }
            }
            SchemaWarning::ForeignKeyArity {
                table,
                columns,
                references_table,
                expected,
                found,
            } => write!(
                f,
                "foreign key {table}({}) has {expected} columns but {references_table} key has {found}",
                columns.join(", ")
            ),
            SchemaWarning::UnresolvableType {
                table,
                column,
                declared_type,
            } => write!(
                f,
                "column {table}.{column} has unrecognized type {declared_type:?}, treated as opaque"
            ),
            SchemaWarning::RowCountUnavailable { table } => {
                write!(f, "row count unavailable for {table}")
            }
            SchemaWarning::UnreadableTable { table } => {
                write!(f, "column metadata unreadable for {table}")
            }
            SchemaWarning::ForeignKeysUnavailable { table } => {
                write!(f, "foreign key metadata unreadable for {table}")
            }
        }
    }
}
