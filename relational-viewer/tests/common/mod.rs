use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch database file that lives as long as the value
pub struct Fixture {
    _directory: TempDir,
    pub path: PathBuf,
}

impl Fixture {
    pub async fn empty() -> Self {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let path = directory.path().join("empty.db");
        let pool = connect(&path).await;
        pool.close().await;

        Self {
            _directory: directory,
            path,
        }
    }

    /// A database built from the given statements
    pub async fn with_schema(statements: &[&str]) -> Self {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let path = directory.path().join("custom.db");
        let pool = connect(&path).await;
        for statement in statements {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .expect("Failed to run fixture statement");
        }
        pool.close().await;

        Self {
            _directory: directory,
            path,
        }
    }

    pub async fn store() -> Self {
        let directory = tempfile::tempdir().expect("Failed to create temp dir");
        let path = directory.path().join("store.db");
        let pool = connect(&path).await;
        setup(&pool).await.expect("Failed to setup fixture database");
        pool.close().await;

        Self {
            _directory: directory,
            path,
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connect(path: &Path) -> SqlitePool {
    // Foreign keys off so that dangling references can be inserted
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(false);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create fixture database")
}

async fn setup(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let statements = [
        r#"
        CREATE TABLE customers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT
        )
        "#,
        r#"
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            customer_id INTEGER REFERENCES customers(id),
            total REAL,
            note TEXT
        )
        "#,
        r#"
        CREATE TABLE order_lines (
            order_id INTEGER NOT NULL,
            line_no INTEGER NOT NULL,
            sku TEXT NOT NULL,
            PRIMARY KEY (order_id, line_no),
            FOREIGN KEY (order_id) REFERENCES orders(id)
        ) WITHOUT ROWID
        "#,
        r#"
        CREATE TABLE audit (
            id INTEGER PRIMARY KEY,
            subject_id INTEGER REFERENCES archived_subjects(id),
            message TEXT
        )
        "#,
        r#"
        CREATE TABLE employees (
            id INTEGER PRIMARY KEY,
            manager_id INTEGER REFERENCES employees(id),
            name TEXT NOT NULL
        )
        "#,
        "CREATE VIEW big_orders AS SELECT id, total FROM orders WHERE total > 100",
        r#"
        INSERT INTO customers (id, name, email) VALUES
            (1, 'Alice', 'alice@example.com'),
            (2, 'Bob', NULL),
            (3, 'Carol', 'carol@example.com')
        "#,
        r#"
        INSERT INTO orders (id, customer_id, total, note) VALUES
            (1, 1, 250.0, 'first'),
            (2, 2, 99.5, NULL),
            (3, 42, 120.0, 'customer was deleted'),
            (4, NULL, 10.0, 'walk-in')
        "#,
        r#"
        INSERT INTO order_lines (order_id, line_no, sku) VALUES
            (1, 1, 'A-100'),
            (1, 2, 'B-200'),
            (3, 1, 'C-300')
        "#,
        "INSERT INTO audit (id, subject_id, message) VALUES (1, 7, 'created')",
        r#"
        WITH RECURSIVE sequence(n) AS (
            SELECT 1
            UNION ALL
            SELECT n + 1 FROM sequence WHERE n < 10000
        )
        INSERT INTO employees (id, manager_id, name)
        SELECT n, CASE WHEN n = 1 THEN NULL ELSE n / 2 END, 'employee ' || n
        FROM sequence
        "#,
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
