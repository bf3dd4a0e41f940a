//! SQLite storage implementation

use crate::config::ViewerConfig;
use crate::database::traits::{
    RawColumn, RawForeignKey, RawRowStream, RawSchemaObject, SqlStatement, StorageError,
    StorageHandle,
};
use crate::schema::{TableKind, Value};
use crate::OpenError;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, TypeInfo, ValueRef};
use std::path::Path;

/// SQLite storage handle
///
/// Wraps a pool of read-only connections to a single database file. SQLite
/// allows any number of concurrent readers, so requests never wait on each
/// other beyond the pool size.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Wrap an existing pool
    ///
    /// # Arguments
    ///
    /// * `pool` - SQLite connection pool; it should have been opened read-only
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a database file read-only
    ///
    /// The file must already exist; it is never created. A trial query runs
    /// before returning so that a file which is not a database fails here
    /// rather than on the first browse.
    pub async fn open(path: &Path, config: &ViewerConfig) -> Result<Self, OpenError> {
        let metadata = std::fs::metadata(path).map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                OpenError::Missing(path.to_path_buf())
            } else {
                OpenError::Unreadable(path.to_path_buf())
            }
        })?;
        if !metadata.is_file() {
            return Err(OpenError::NotAFile(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(config.query_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.query_timeout)
            .connect_with(options)
            .await
            .map_err(|error| {
                tracing::debug!(path = %path.display(), error = %error, "failed to connect");
                match StorageError::from(error) {
                    StorageError::Malformed => OpenError::NotADatabase(path.to_path_buf()),
                    _ => OpenError::Unreadable(path.to_path_buf()),
                }
            })?;

        let trial: Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master")
                .fetch_one(&pool)
                .await;

        if let Err(error) = trial {
            pool.close().await;
            return Err(match StorageError::from(error) {
                StorageError::Malformed => OpenError::NotADatabase(path.to_path_buf()),
                _ => OpenError::Unreadable(path.to_path_buf()),
            });
        }

        tracing::info!(path = %path.display(), "opened database read-only");
        Ok(Self::new(pool))
    }

    /// Whether a `CREATE TABLE` statement declares a `WITHOUT ROWID` table
    ///
    /// Only the table options after the column list are inspected, so a
    /// column default or name containing the phrase does not count.
    fn declares_without_rowid(sql: &str) -> bool {
        let Some(close) = sql.rfind(')') else {
            return false;
        };

        sql[close + 1..].split(',').any(|option| {
            let mut words = option.split_whitespace();
            matches!(
                (words.next(), words.next(), words.next()),
                (Some(first), Some(second), None)
                    if first.eq_ignore_ascii_case("WITHOUT") && second.eq_ignore_ascii_case("ROWID")
            )
        })
    }

    /// Bind a value as the next positional parameter
    fn bind_value<'q>(
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
        value: &Value,
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        match value {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(value) => query.bind(*value),
            Value::Real(value) => query.bind(*value),
            Value::Text(value) => query.bind(value.clone()),
            Value::Blob(value) => query.bind(value.clone()),
        }
    }

    fn prepare(statement: &SqlStatement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        statement
            .params
            .iter()
            .fold(sqlx::query(&statement.sql), Self::bind_value)
    }

    /// Convert a SQLite row to values in column order
    fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, StorageError> {
        (0..row.len())
            .map(|index| Self::decode_value(row, index))
            .collect()
    }

    /// Decode one value by its runtime storage class
    ///
    /// SQLite has dynamic typing: the declared column type says nothing
    /// reliable about what a given cell holds, so the value's own datatype is
    /// used instead.
    fn decode_value(row: &SqliteRow, index: usize) -> Result<Value, StorageError> {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let storage_class = raw.type_info().name().to_string();

        let value = match storage_class.as_str() {
            "INTEGER" => Value::Integer(row.try_get_unchecked::<i64, _>(index)?),
            "REAL" => Value::Real(row.try_get_unchecked::<f64, _>(index)?),
            "BLOB" => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
            _ => {
                // TEXT from a foreign file is not guaranteed to be UTF-8
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                match String::from_utf8(bytes) {
                    Ok(text) => Value::Text(text),
                    Err(error) => {
                        tracing::debug!(column = index, "replacing invalid UTF-8 in text value");
                        Value::Text(String::from_utf8_lossy(error.as_bytes()).into_owned())
                    }
                }
            }
        };
        Ok(value)
    }

    fn row_stream(
        pool: SqlitePool,
        statement: SqlStatement,
    ) -> impl Stream<Item = Result<Vec<Value>, StorageError>> + Send + 'static {
        try_stream! {
            let mut connection = pool.acquire().await.map_err(StorageError::from)?;
            let mut rows = Self::prepare(&statement).fetch(&mut *connection);

            while let Some(row) = rows.try_next().await.map_err(StorageError::from)? {
                yield Self::decode_row(&row)?;
            }
        }
    }
}

#[async_trait]
impl StorageHandle for SqliteStorage {
    async fn schema_objects(
        &self,
        include_views: bool,
    ) -> Result<Vec<RawSchemaObject>, StorageError> {
        let query = r"SELECT name, type, sql FROM sqlite_master
            WHERE (type = 'table' OR (type = 'view' AND ?1))
              AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY name";

        let rows = sqlx::query(query)
            .bind(include_views)
            .fetch_all(&self.pool)
            .await?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let object_type: String = row.try_get("type")?;
            let sql: Option<String> = row.try_get("sql")?;

            let kind = if object_type == "view" {
                TableKind::View
            } else {
                TableKind::Table
            };
            objects.push(RawSchemaObject { name, kind, sql });
        }

        Ok(objects)
    }

    async fn columns(&self, table: &str) -> Result<Vec<RawColumn>, StorageError> {
        // The table-valued pragma takes the name as a bound parameter
        let rows = sqlx::query(
            r#"SELECT "name", "type", "notnull", "pk" FROM pragma_table_info(?1) ORDER BY "cid""#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let declared_type: Option<String> = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let primary_key_position: i64 = row.try_get("pk")?;

            columns.push(RawColumn {
                name,
                declared_type: declared_type.unwrap_or_default(),
                not_null: not_null != 0,
                primary_key_position,
            });
        }

        Ok(columns)
    }

    async fn foreign_keys(&self, table: &str) -> Result<Vec<RawForeignKey>, StorageError> {
        let query = r#"SELECT "id", "seq", "table", "from", "to"
            FROM pragma_foreign_key_list(?1)
            ORDER BY "id", "seq""#;
        let rows = sqlx::query(query)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut foreign_keys = Vec::with_capacity(rows.len());
        for row in rows {
            foreign_keys.push(RawForeignKey {
                id: row.try_get("id")?,
                seq: row.try_get("seq")?,
                table: row.try_get("table")?,
                from: row.try_get("from")?,
                to: row.try_get("to")?,
            });
        }

        Ok(foreign_keys)
    }

    async fn count(&self, statement: &SqlStatement) -> Result<u64, StorageError> {
        let row = Self::prepare(statement).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    fn fetch(&self, statement: SqlStatement) -> RawRowStream {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "fetching rows");
        Box::pin(Self::row_stream(self.pool.clone(), statement))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether a schema object of this kind and definition has an implicit rowid
pub(crate) fn has_rowid(kind: TableKind, sql: Option<&str>) -> bool {
    match kind {
        TableKind::View => false,
        TableKind::Table => !sql.is_some_and(SqliteStorage::declares_without_rowid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn memory_storage() -> SqliteStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT, weight REAL, payload BLOB)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO items VALUES (1, 'one', 1.5, x'0102'), (2, NULL, NULL, NULL)")
            .execute(&pool)
            .await
            .unwrap();
        SqliteStorage::new(pool)
    }

    #[test]
    fn test_declares_without_rowid() {
        assert!(SqliteStorage::declares_without_rowid(
            "CREATE TABLE t (a PRIMARY KEY) without\n  rowid"
        ));
        assert!(SqliteStorage::declares_without_rowid(
            "CREATE TABLE t (a PRIMARY KEY) STRICT, WITHOUT ROWID"
        ));
        assert!(!SqliteStorage::declares_without_rowid("CREATE TABLE t (a)"));
        assert!(!SqliteStorage::declares_without_rowid(
            "CREATE TABLE notes (body TEXT DEFAULT 'without rowid', \"without rowid\" INTEGER)"
        ));
        assert!(!SqliteStorage::declares_without_rowid("CREATE TABLE t AS SELECT 1"));
        assert!(has_rowid(TableKind::Table, None));
        assert!(!has_rowid(TableKind::View, Some("CREATE VIEW v AS SELECT 1")));
    }

    #[tokio::test]
    async fn test_fetch_decodes_storage_classes() {
        let storage = memory_storage().await;
        let statement = SqlStatement {
            sql: "SELECT id, label, weight, payload FROM items WHERE id = ?".to_string(),
            params: vec![Value::Integer(1)],
        };

        let rows: Vec<_> = storage.fetch(statement).collect().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].as_ref().unwrap(),
            &vec![
                Value::Integer(1),
                Value::Text("one".to_string()),
                Value::Real(1.5),
                Value::Blob(vec![1, 2]),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_is_decoded_lossily() {
        let storage = memory_storage().await;
        let statement = SqlStatement {
            sql: "SELECT 'before', CAST(x'C328' AS TEXT), 'after'".to_string(),
            params: Vec::new(),
        };

        let rows: Vec<_> = storage.fetch(statement).collect().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].as_ref().unwrap(),
            &vec![
                Value::Text("before".to_string()),
                Value::Text("\u{FFFD}(".to_string()),
                Value::Text("after".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_null_parameter_binds_as_null() {
        let storage = memory_storage().await;
        let statement = SqlStatement {
            sql: "SELECT COUNT(*) FROM items WHERE ? IS NULL".to_string(),
            params: vec![Value::Null],
        };
        assert_eq!(storage.count(&statement).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_columns_and_foreign_keys() {
        let storage = memory_storage().await;
        let columns = storage.columns("items").await.unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].primary_key_position, 1);
        assert_eq!(columns[1].declared_type, "TEXT");

        assert!(storage.foreign_keys("items").await.unwrap().is_empty());
        assert!(storage.columns("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_after_close_fails() {
        let storage = memory_storage().await;
        storage.close().await;

        let statement = SqlStatement {
            sql: "SELECT 1".to_string(),
            params: Vec::new(),
        };
        let rows: Vec<_> = storage.fetch(statement).collect().await;
        assert_eq!(rows, vec![Err(StorageError::Closed)]);
    }
}
