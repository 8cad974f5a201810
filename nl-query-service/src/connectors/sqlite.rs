//! SQLite backend over a single `sqlx` connection.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};

use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ColumnInfo, Credentials, QueryResult};

use super::{ConnectionHandle, Connector, TableSchema};

/// Opens an existing SQLite database file.
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn open(
        &self,
        location: &str,
        _credentials: &Credentials,
    ) -> AppResult<Box<dyn ConnectionHandle>> {
        let options = connect_options(location)?;
        let conn = options
            .connect()
            .await
            .map_err(|e| AppError::connection(BackendKind::Sqlite, e))?;

        tracing::debug!(location = %location, "sqlite connection opened");
        Ok(Box::new(SqliteHandle { conn: Some(conn) }))
    }
}

/// Accepts either a plain file path or a `sqlite:` URL. The file must exist.
fn connect_options(location: &str) -> AppResult<SqliteConnectOptions> {
    let options = if location.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(location)
            .map_err(|e| AppError::connection(BackendKind::Sqlite, e))?
    } else {
        SqliteConnectOptions::new().filename(location)
    };
    Ok(options.create_if_missing(false))
}

struct SqliteHandle {
    conn: Option<SqliteConnection>,
}

impl SqliteHandle {
    fn conn(&mut self) -> AppResult<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::Internal("sqlite connection already closed".into()))
    }

    async fn fetch(&mut self, sql: &str) -> AppResult<QueryResult> {
        let rows = sqlx::query(sql)
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| AppError::ExecutionFailed(e.to_string()))?;
        Ok(to_result(&rows))
    }
}

#[async_trait]
impl ConnectionHandle for SqliteHandle {
    fn dialect(&self) -> &'static str {
        "SQLite"
    }

    async fn describe_tables(&mut self, limits: &SchemaLimits) -> AppResult<Vec<TableSchema>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name LIMIT ?",
        )
        .bind(limits.max_tables as i64)
        .fetch_all(self.conn()?)
        .await
        .map_err(|e| AppError::ExecutionFailed(e.to_string()))?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let quoted = quote_ident(&name);
            let columns = sqlx::query(&format!("PRAGMA table_info({})", quoted))
                .fetch_all(self.conn()?)
                .await
                .map_err(|e| AppError::ExecutionFailed(e.to_string()))?
                .iter()
                .map(|row| {
                    ColumnInfo::new(
                        row.try_get::<String, _>("name").unwrap_or_default(),
                        row.try_get::<String, _>("type").unwrap_or_default(),
                    )
                })
                .collect();

            let sample = if limits.sample_rows > 0 {
                let sql = format!("SELECT * FROM {} LIMIT {}", quoted, limits.sample_rows);
                self.fetch(&sql).await.ok()
            } else {
                None
            };

            tables.push(TableSchema {
                name,
                columns,
                sample,
            });
        }
        Ok(tables)
    }

    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
        self.fetch(sql).await
    }

    async fn close(&mut self) -> AppResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .await
                .map_err(|e| AppError::Internal(format!("closing sqlite connection: {}", e)))?;
        }
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_result(rows: &[SqliteRow]) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|c| ColumnInfo::new(c.name(), c.type_info().name()))
                .collect()
        })
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| decode_value(row, i)).collect())
        .collect();

    QueryResult { columns, rows }
}

/// SQLite values are dynamically typed; try the storage classes in turn.
fn decode_value(row: &SqliteRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|f| json!(f)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::super::testing::seed_sqlite;
    use super::*;

    async fn open(path: &str) -> Box<dyn ConnectionHandle> {
        SqliteConnector
            .open(path, &Credentials::default())
            .await
            .ok()
            .expect("open fixture")
    }

    #[tokio::test]
    async fn test_count_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_sqlite(&dir).await;
        let mut handle = open(&path).await;

        let result = handle.execute("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(result.rows, vec![vec![json!(3)]]);
        assert_eq!(result.to_text(), "COUNT(*)\n3");
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_describe_tables_with_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_sqlite(&dir).await;
        let mut handle = open(&path).await;

        let limits = SchemaLimits {
            sample_rows: 2,
            ..Default::default()
        };
        let tables = handle.describe_tables(&limits).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "t");
        let names: Vec<_> = tables[0].columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(tables[0].sample.as_ref().unwrap().row_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_sql_is_execution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_sqlite(&dir).await;
        let mut handle = open(&path).await;

        let err = handle.execute("SELEC nonsense").await.unwrap_err();
        assert!(matches!(err, AppError::ExecutionFailed(msg) if msg.contains("syntax error")));
    }

    #[tokio::test]
    async fn test_missing_file_is_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.db");
        let err = SqliteConnector
            .open(missing.to_str().unwrap(), &Credentials::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::ConnectionFailed { backend, .. } if backend == "sqlite"));
    }
}
