//! Backend connectors.
//!
//! A [`Connector`] turns a location plus credentials into a live
//! [`ConnectionHandle`]. Connectors are looked up by [`BackendKind`] in a
//! [`ConnectorRegistry`]; adding a backend means registering another
//! implementation. Handles are never pooled or shared between requests.

mod databricks;
mod salesforce;
mod sqlite;
mod sqlserver;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ColumnInfo, ConnectionRequest, CredentialField, Credentials, QueryResult};

pub use databricks::DatabricksConnector;
pub use salesforce::SalesforceConnector;
pub use sqlite::SqliteConnector;
pub use sqlserver::SqlServerConnector;

/// Opens connections for one backend kind.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Backend this connector serves.
    fn kind(&self) -> BackendKind;

    /// Credential fields checked before [`Connector::open`] is called.
    fn required_credentials(&self) -> &'static [CredentialField] {
        self.kind().required_credentials()
    }

    /// Opens a connection. A single attempt; failures are `ConnectionFailed`.
    async fn open(
        &self,
        location: &str,
        credentials: &Credentials,
    ) -> AppResult<Box<dyn ConnectionHandle>>;
}

/// A live, request-scoped connection.
#[async_trait]
pub trait ConnectionHandle: Send {
    /// Query language name given to the model (e.g. "SQLite", "T-SQL").
    fn dialect(&self) -> &'static str;

    /// Describes up to `limits.max_tables` tables, with `limits.sample_rows`
    /// example rows each.
    async fn describe_tables(&mut self, limits: &SchemaLimits) -> AppResult<Vec<TableSchema>>;

    /// Executes `sql` verbatim.
    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult>;

    /// Releases the underlying connection.
    async fn close(&mut self) -> AppResult<()>;
}

/// Table description used as schema context for query generation.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub sample: Option<QueryResult>,
}

/// Renders table descriptions as the schema block of the generation prompt.
pub fn render_table_info(tables: &[TableSchema]) -> String {
    let mut out = String::new();
    for table in tables {
        let _ = writeln!(out, "CREATE TABLE {} (", table.name);
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("\t{} {}", c.name, c.data_type))
            .collect();
        let _ = writeln!(out, "{}\n)", columns.join(",\n"));

        if let Some(sample) = table.sample.as_ref().filter(|s| s.row_count() > 0) {
            let _ = writeln!(
                out,
                "/*\n{} rows from {} table:\n{}\n*/",
                sample.row_count(),
                table.name,
                sample.to_text()
            );
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Maps backend kinds to their connectors.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<BackendKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SqliteConnector));
        registry.register(Arc::new(SqlServerConnector));
        registry.register(Arc::new(DatabricksConnector));
        registry.register(Arc::new(SalesforceConnector));
        registry
    }

    /// Registers a connector, replacing any previous one for the same kind.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    /// Registered kinds in display order.
    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.connectors.contains_key(kind))
            .collect()
    }

    /// Checks credentials and opens a connection for `request`.
    ///
    /// Nothing touches the network or file system until the backend is known
    /// to be registered and every required credential is present.
    pub async fn open(&self, request: &ConnectionRequest) -> AppResult<Box<dyn ConnectionHandle>> {
        let connector = self
            .connectors
            .get(&request.backend)
            .ok_or_else(|| AppError::UnsupportedBackend(request.backend.to_string()))?;

        let missing = request.credentials.missing(connector.required_credentials());
        if !missing.is_empty() {
            return Err(AppError::MissingCredentials {
                backend: request.backend.to_string(),
                fields: missing.iter().map(ToString::to_string).collect(),
            });
        }

        connector.open(&request.location, &request.credentials).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Connector doubles shared by the pipeline and handler tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Wraps a connector and counts opens, executions and closes.
    pub struct CountingConnector {
        inner: Arc<dyn Connector>,
        pub stats: Arc<ConnectionStats>,
    }

    #[derive(Default)]
    pub struct ConnectionStats {
        pub opened: AtomicUsize,
        pub executed: AtomicUsize,
        pub closed: AtomicUsize,
    }

    impl ConnectionStats {
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }
        pub fn executed(&self) -> usize {
            self.executed.load(Ordering::SeqCst)
        }
        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl CountingConnector {
        pub fn wrap(inner: Arc<dyn Connector>) -> (Arc<Self>, Arc<ConnectionStats>) {
            let stats = Arc::new(ConnectionStats::default());
            let connector = Arc::new(Self {
                inner,
                stats: stats.clone(),
            });
            (connector, stats)
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        fn kind(&self) -> BackendKind {
            self.inner.kind()
        }

        async fn open(
            &self,
            location: &str,
            credentials: &Credentials,
        ) -> AppResult<Box<dyn ConnectionHandle>> {
            self.stats.opened.fetch_add(1, Ordering::SeqCst);
            let inner = self.inner.open(location, credentials).await?;
            Ok(Box::new(CountingHandle {
                inner,
                stats: self.stats.clone(),
            }))
        }
    }

    struct CountingHandle {
        inner: Box<dyn ConnectionHandle>,
        stats: Arc<ConnectionStats>,
    }

    #[async_trait]
    impl ConnectionHandle for CountingHandle {
        fn dialect(&self) -> &'static str {
            self.inner.dialect()
        }

        async fn describe_tables(&mut self, limits: &SchemaLimits) -> AppResult<Vec<TableSchema>> {
            self.inner.describe_tables(limits).await
        }

        async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
            self.stats.executed.fetch_add(1, Ordering::SeqCst);
            self.inner.execute(sql).await
        }

        async fn close(&mut self) -> AppResult<()> {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    /// Seeds a SQLite file with table `t` holding three rows.
    pub async fn seed_sqlite(dir: &tempfile::TempDir) -> String {
        use sqlx::sqlite::SqliteConnectOptions;
        use sqlx::{ConnectOptions, Connection};

        let path = dir.path().join("fixture.db");
        let mut conn = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .connect()
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&mut conn)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t (name) VALUES ('ann'), ('bob'), ('cy')")
            .execute(&mut conn)
            .await
            .unwrap();
        conn.close().await.unwrap();
        path.to_string_lossy().into_owned()
    }
}
