//! Browse sessions
//!
//! A session is scoped to one database file. It moves through
//! `Unopened → Opened → Closed`; `Closed` is terminal. While open it holds
//! the catalog and relationship graph, which are immutable and shared by
//! every concurrent request.

use crate::catalog::Catalog;
use crate::config::ViewerConfig;
use crate::database::traits::StorageHandle;
use crate::graph::{ForeignKeyEdge, RelationshipGraph};
use crate::materializer::{self, LinkDescriptor, Row, RowStream};
use crate::pagination::PaginationCursor;
use crate::planner::{self, BrowseRequest, QueryPlan};
use crate::schema::{RowCount, SchemaWarning, Table, TableInfo};
use crate::{Error, Result, StateError};
use futures::TryStreamExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg(feature = "sqlite")]
use crate::database::sqlite::SqliteStorage;
#[cfg(feature = "sqlite")]
use std::path::Path;

/// Session over a SQLite file
#[cfg(feature = "sqlite")]
pub type SqliteSession = Session<SqliteStorage>;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Unopened,
    Opened,
    Closed,
}

enum SessionState<S> {
    Unopened,
    Opened(Arc<OpenDatabase<S>>),
    Closed,
}

struct OpenDatabase<S> {
    storage: S,
    catalog: Arc<Catalog>,
    graph: Arc<RelationshipGraph>,
}

/// One page of a browsed table
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseResult {
    /// Table name as spelled in the schema
    pub table: String,

    /// Column names in row order
    pub columns: Vec<String>,

    pub rows: Vec<Row>,

    pub pagination: PaginationCursor,
}

impl BrowseResult {
    pub fn total(&self) -> RowCount {
        self.pagination.total
    }

    pub fn page(&self) -> u64 {
        self.pagination.page
    }

    pub fn has_next(&self) -> bool {
        self.pagination.has_next
    }
}

/// Outcome of following a link
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FollowedLink {
    /// The referenced row exists
    Found { row: Row },

    /// No row matches; the foreign key value dangles
    Dangling { link: LinkDescriptor },
}

/// A table whose rows point at a given row, with the request that lists them
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackReference {
    pub edge: ForeignKeyEdge,
    pub request: BrowseRequest,
}

/// Browse session over one database
///
/// All methods take `&self`; wrap the session in an `Arc` to share it
/// between request handlers.
pub struct Session<S: StorageHandle> {
    config: ViewerConfig,
    state: RwLock<SessionState<S>>,
}

impl<S: StorageHandle> Session<S> {
    /// Create an unopened session
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(SessionState::Unopened),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.read().await {
            SessionState::Unopened => SessionStatus::Unopened,
            SessionState::Opened(_) => SessionStatus::Opened,
            SessionState::Closed => SessionStatus::Closed,
        }
    }

    /// Open the session on an already-connected storage handle
    ///
    /// Reads the catalog and builds the relationship graph. On failure the
    /// storage is closed and the session stays unopened. Slow row counts do
    /// not fail the open; they leave the table without an estimate.
    pub async fn attach(&self, storage: S) -> Result<()> {
        let mut state = self.state.write().await;

        let state_error = match &*state {
            SessionState::Unopened => None,
            SessionState::Opened(_) => Some(StateError::AlreadyOpened),
            SessionState::Closed => Some(StateError::Closed),
        };
        if let Some(error) = state_error {
            storage.close().await;
            return Err(error.into());
        }

        let catalog = match Catalog::read(&storage, &self.config).await {
            Ok(catalog) => catalog,
            Err(error) => {
                storage.close().await;
                return Err(error.into());
            }
        };

        let graph = RelationshipGraph::build(&catalog);
        tracing::info!(
            tables = catalog.tables().len(),
            relationships = graph.edges().len(),
            warnings = catalog.warnings().len() + graph.warnings().len(),
            "session opened"
        );

        *state = SessionState::Opened(Arc::new(OpenDatabase {
            storage,
            catalog: Arc::new(catalog),
            graph: Arc::new(graph),
        }));
        Ok(())
    }

    /// Close the session
    ///
    /// Idempotent. Requests already running keep their snapshot and finish
    /// or fail on their own; waiting for them is bounded by the query timeout.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, SessionState::Closed)
        };

        if let SessionState::Opened(database) = previous {
            if tokio::time::timeout(self.config.query_timeout, database.storage.close())
                .await
                .is_err()
            {
                tracing::warn!("connections still in use after close timeout");
            }
            tracing::info!("session closed");
        }
    }

    async fn snapshot(&self) -> Result<Arc<OpenDatabase<S>>> {
        match &*self.state.read().await {
            SessionState::Opened(database) => Ok(Arc::clone(database)),
            SessionState::Unopened => Err(StateError::NotOpened.into()),
            SessionState::Closed => Err(StateError::Closed.into()),
        }
    }

    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.query_timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_milliseconds = self.config.query_timeout.as_millis() as u64,
                    "query timed out"
                );
                Err(Error::Timeout)
            }
        }
    }

    /// Schema snapshot of the open database
    pub async fn catalog(&self) -> Result<Arc<Catalog>> {
        Ok(Arc::clone(&self.snapshot().await?.catalog))
    }

    /// Relationship graph of the open database
    pub async fn graph(&self) -> Result<Arc<RelationshipGraph>> {
        Ok(Arc::clone(&self.snapshot().await?.graph))
    }

    /// Tables and views with their row estimates, ordered by name
    pub async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        Ok(self.snapshot().await?.catalog.list_tables())
    }

    pub async fn describe_table(&self, name: &str) -> Result<Table> {
        self.snapshot().await?.catalog.describe_table(name).cloned()
    }

    /// Schema anomalies found while opening
    pub async fn warnings(&self) -> Result<Vec<SchemaWarning>> {
        let database = self.snapshot().await?;
        Ok(database
            .catalog
            .warnings()
            .iter()
            .chain(database.graph.warnings())
            .cloned()
            .collect())
    }

    /// Validate a request and build its plan without running anything
    pub async fn plan(&self, request: &BrowseRequest) -> Result<QueryPlan> {
        let database = self.snapshot().await?;
        Ok(planner::plan(&database.catalog, request, &self.config)?)
    }

    /// Run a plan and stream its rows
    ///
    /// The stream is not bounded by the query timeout; the consumer decides
    /// how long to read.
    pub async fn execute(&self, plan: QueryPlan) -> Result<RowStream> {
        let database = self.snapshot().await?;
        Ok(materializer::execute(&database.storage, plan, &database.graph))
    }

    /// Count the rows a plan selects, capped at the configured ceiling
    pub async fn count_estimate(&self, plan: &QueryPlan) -> Result<RowCount> {
        let database = self.snapshot().await?;
        self.bounded(materializer::count_estimate(
            &database.storage,
            plan,
            self.config.count_ceiling(),
        ))
        .await
    }

    /// Fetch one page of a table
    ///
    /// A page index past the end is moved back to the last page; the result's
    /// `pagination.clamped` flag reports when that happened. When rows
    /// continue past the served page the total stays capped and `has_next` is
    /// set, however far beyond the count ceiling the page lies.
    pub async fn browse(&self, request: &BrowseRequest) -> Result<BrowseResult> {
        let database = self.snapshot().await?;
        let plan = planner::plan(&database.catalog, request, &self.config)?;

        let ceiling = self.config.count_ceiling();
        let mut total = self
            .bounded(materializer::count_estimate(&database.storage, &plan, ceiling))
            .await?;

        // A capped count says nothing about pages beyond the ceiling. The
        // OFFSET scan walks that far anyway, so count up to the end of the
        // requested page instead.
        let reach = plan.offset().saturating_add(plan.page_size());
        if total.is_capped() && reach > ceiling {
            total = self
                .bounded(materializer::count_estimate(&database.storage, &plan, reach))
                .await?;
        }

        let pagination = PaginationCursor::new(total, plan.page_size(), plan.page());
        let plan = if pagination.clamped {
            tracing::debug!(
                table = %plan.table(),
                requested = pagination.requested_page,
                served = pagination.page,
                "page past the end, clamping"
            );
            plan.at_page(pagination.page)
        } else {
            plan
        };

        let table = plan.table().to_string();
        let stream = materializer::execute(&database.storage, plan, &database.graph);
        let columns = stream.columns().to_vec();
        let rows: Vec<Row> = self.bounded(stream.try_collect()).await?;

        Ok(BrowseResult {
            table,
            columns,
            rows,
            pagination,
        })
    }

    /// Check whether a link's target row exists
    pub async fn follow(&self, link: &LinkDescriptor) -> Result<FollowedLink> {
        let database = self.snapshot().await?;
        let request = link.browse_request().page_size(1);
        let plan = planner::plan(&database.catalog, &request, &self.config)?;

        let mut stream = materializer::execute(&database.storage, plan, &database.graph);
        let first = self.bounded(stream.try_next()).await?;

        Ok(match first {
            Some(row) => FollowedLink::Found { row },
            None => FollowedLink::Dangling { link: link.clone() },
        })
    }

    /// Tables whose foreign keys point at `row` of `table`
    ///
    /// Computed from the relationship graph alone; no query runs. Edges whose
    /// referenced values are NULL in `row` are skipped.
    pub async fn back_references(&self, table: &str, row: &Row) -> Result<Vec<BackReference>> {
        let database = self.snapshot().await?;
        let table = database.catalog.describe_table(table)?;

        let references = database
            .graph
            .edges_to(&table.name)
            .filter_map(|edge| {
                let request = edge.pairs.iter().try_fold(
                    BrowseRequest::new(edge.source_table.clone()),
                    |request, pair| {
                        let value = row.value(&pair.target).filter(|value| !value.is_null())?;
                        Some(request.filter(pair.source.clone(), value.clone()))
                    },
                )?;
                Some(BackReference {
                    edge: edge.clone(),
                    request,
                })
            })
            .collect();

        Ok(references)
    }
}

#[cfg(feature = "sqlite")]
impl Session<SqliteStorage> {
    /// Open a SQLite file read-only and move the session to `Opened`
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<()> {
        match self.status().await {
            SessionStatus::Unopened => {}
            SessionStatus::Opened => return Err(StateError::AlreadyOpened.into()),
            SessionStatus::Closed => return Err(StateError::Closed.into()),
        }

        let storage = SqliteStorage::open(path.as_ref(), &self.config).await?;
        self.attach(storage).await
    }
}

/// Open a SQLite file and return a session ready for browsing
#[cfg(feature = "sqlite")]
pub async fn open_session(path: impl AsRef<Path>, config: ViewerConfig) -> Result<SqliteSession> {
    let session = Session::new(config);
    session.open(path).await?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::traits::{
        RawColumn, RawForeignKey, RawRowStream, RawSchemaObject, SqlStatement, StorageError,
    };
    use crate::schema::{TableKind, Value};
    use crate::OpenError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// One table `items(id INTEGER PRIMARY KEY)` with three rows
    #[derive(Default)]
    struct MockStorage {
        closed: Arc<AtomicBool>,
        schema_delay: Option<Duration>,
        count_delay: Option<Duration>,
        foreign_keys_fail: bool,
    }

    async fn pause(delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    #[async_trait]
    impl StorageHandle for MockStorage {
        async fn schema_objects(
            &self,
            _include_views: bool,
        ) -> std::result::Result<Vec<RawSchemaObject>, StorageError> {
            pause(self.schema_delay).await;
            Ok(vec![RawSchemaObject {
                name: "items".to_string(),
                kind: TableKind::Table,
                sql: None,
            }])
        }

        async fn columns(&self, _table: &str) -> std::result::Result<Vec<RawColumn>, StorageError> {
            Ok(vec![RawColumn {
                name: "id".to_string(),
                declared_type: "INTEGER".to_string(),
                not_null: false,
                primary_key_position: 1,
            }])
        }

        async fn foreign_keys(
            &self,
            _table: &str,
        ) -> std::result::Result<Vec<RawForeignKey>, StorageError> {
            if self.foreign_keys_fail {
                return Err(StorageError::Malformed);
            }
            Ok(Vec::new())
        }

        async fn count(&self, _statement: &SqlStatement) -> std::result::Result<u64, StorageError> {
            pause(self.count_delay).await;
            Ok(3)
        }

        fn fetch(&self, _statement: SqlStatement) -> RawRowStream {
            let rows = (1..=3).map(|id| Ok(vec![Value::Integer(id)])).collect::<Vec<_>>();
            Box::pin(futures::stream::iter(rows))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_operations_require_open_session() {
        let session: Session<MockStorage> = Session::new(ViewerConfig::default());
        assert_eq!(session.status().await, SessionStatus::Unopened);

        assert!(matches!(
            session.list_tables().await,
            Err(Error::State(StateError::NotOpened))
        ));
        assert!(matches!(
            session.browse(&BrowseRequest::new("items")).await,
            Err(Error::State(StateError::NotOpened))
        ));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let session = Session::new(ViewerConfig::default());
        let closed = Arc::new(AtomicBool::new(false));
        session
            .attach(MockStorage {
                closed: Arc::clone(&closed),
                ..MockStorage::default()
            })
            .await
            .unwrap();
        assert_eq!(session.status().await, SessionStatus::Opened);
        assert_eq!(session.list_tables().await.unwrap().len(), 1);

        let second = session.attach(MockStorage::default()).await;
        assert!(matches!(second, Err(Error::State(StateError::AlreadyOpened))));

        session.close().await;
        assert!(closed.load(Ordering::SeqCst));
        session.close().await;
        assert_eq!(session.status().await, SessionStatus::Closed);

        assert!(matches!(
            session.describe_table("items").await,
            Err(Error::State(StateError::Closed))
        ));
        assert!(matches!(
            session.attach(MockStorage::default()).await,
            Err(Error::State(StateError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_close_before_open_is_terminal() {
        let session: Session<MockStorage> = Session::new(ViewerConfig::default());
        session.close().await;
        assert_eq!(session.status().await, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_browse_through_mock() {
        let session = Session::new(ViewerConfig::default());
        session.attach(MockStorage::default()).await.unwrap();

        let result = session.browse(&BrowseRequest::new("ITEMS")).await.unwrap();
        assert_eq!(result.table, "items");
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.total(), RowCount::Exact(3));
        assert!(!result.has_next());
    }

    #[tokio::test]
    async fn test_slow_count_degrades_to_warning() {
        let config = ViewerConfig::default().with_query_timeout(Duration::from_millis(50));
        let session = Session::new(config);
        session
            .attach(MockStorage {
                count_delay: Some(Duration::from_secs(5)),
                ..MockStorage::default()
            })
            .await
            .unwrap();

        assert_eq!(session.status().await, SessionStatus::Opened);
        assert_eq!(session.describe_table("items").await.unwrap().row_count, None);
        assert_eq!(
            session.warnings().await.unwrap(),
            vec![SchemaWarning::RowCountUnavailable {
                table: "items".to_string()
            }]
        );

        // Browsing still counts, and that count is bounded too
        let plan = session.plan(&BrowseRequest::new("items")).await.unwrap();
        assert!(matches!(session.count_estimate(&plan).await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_slow_schema_fails_open() {
        let config = ViewerConfig::default().with_query_timeout(Duration::from_millis(50));
        let session = Session::new(config);
        let closed = Arc::new(AtomicBool::new(false));
        let result = session
            .attach(MockStorage {
                closed: Arc::clone(&closed),
                schema_delay: Some(Duration::from_secs(5)),
                ..MockStorage::default()
            })
            .await;

        assert!(matches!(result, Err(Error::Open(OpenError::Timeout))));
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(session.status().await, SessionStatus::Unopened);
    }

    #[tokio::test]
    async fn test_unreadable_foreign_keys_degrade_to_warning() {
        let session = Session::new(ViewerConfig::default());
        session
            .attach(MockStorage {
                foreign_keys_fail: true,
                ..MockStorage::default()
            })
            .await
            .unwrap();

        let items = session.describe_table("items").await.unwrap();
        assert!(items.foreign_keys.is_empty());
        assert_eq!(items.row_count, Some(RowCount::Exact(3)));
        assert_eq!(
            session.warnings().await.unwrap(),
            vec![SchemaWarning::ForeignKeysUnavailable {
                table: "items".to_string()
            }]
        );

        let result = session.browse(&BrowseRequest::new("items")).await.unwrap();
        assert_eq!(result.rows.len(), 3);
    }
}
