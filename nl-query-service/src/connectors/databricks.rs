//! Databricks SQL warehouse backend.
//!
//! Statements run through the SQL Statement Execution API
//! (`/api/2.0/sql/statements`) with inline JSON results. There is no session
//! state on the server side; the handle only keeps the HTTP client and the
//! warehouse it targets.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ColumnInfo, CredentialField, Credentials, QueryResult};

use super::{ConnectionHandle, Connector, TableSchema};

/// Server-side wait before the statement is cancelled. The API caps this at 50s.
const WAIT_TIMEOUT: &str = "50s";

pub struct DatabricksConnector;

#[async_trait]
impl Connector for DatabricksConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Databricks
    }

    /// `location` is the SQL warehouse id or its HTTP path
    /// (`/sql/1.0/warehouses/<id>`); the workspace host comes from the
    /// credentials.
    async fn open(
        &self,
        location: &str,
        credentials: &Credentials,
    ) -> AppResult<Box<dyn ConnectionHandle>> {
        let host = credentials.require(self.kind(), CredentialField::Host)?;
        let token = credentials.require(self.kind(), CredentialField::Token)?;

        let session = Session {
            client: reqwest::Client::new(),
            base_url: workspace_url(host)?,
            token: token.to_string(),
            warehouse_id: warehouse_id(location)?,
        };
        session.probe().await?;

        tracing::debug!(
            host = %session.base_url,
            warehouse = %session.warehouse_id,
            "databricks warehouse reachable"
        );
        Ok(Box::new(DatabricksHandle {
            session: Some(session),
        }))
    }
}

fn connection_error(e: impl ToString) -> AppError {
    AppError::connection(BackendKind::Databricks, e)
}

fn workspace_url(host: &str) -> AppResult<String> {
    let host = host.trim().trim_end_matches('/');
    let host = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);
    if host.is_empty() || host.contains('/') {
        return Err(connection_error(format!("invalid workspace host: {}", host)));
    }
    Ok(format!("https://{}", host))
}

fn warehouse_id(location: &str) -> AppResult<String> {
    location
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| connection_error("missing SQL warehouse id"))
}

/// Pulls `message` out of a Databricks error body, falling back to the raw text.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

struct Session {
    client: reqwest::Client,
    base_url: String,
    token: String,
    warehouse_id: String,
}

impl Session {
    async fn probe(&self) -> AppResult<()> {
        let url = format!("{}/api/2.0/sql/warehouses/{}", self.base_url, self.warehouse_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(connection_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(connection_error(format!("HTTP {}: {}", status, api_message(&text))));
        }
        Ok(())
    }

    async fn run(&self, sql: &str) -> AppResult<QueryResult> {
        let body = json!({
            "warehouse_id": self.warehouse_id,
            "statement": sql,
            "wait_timeout": WAIT_TIMEOUT,
            "on_wait_timeout": "CANCEL",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
        });

        let response = self
            .client
            .post(format!("{}/api/2.0/sql/statements", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExecutionFailed(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::ExecutionFailed(format!(
                "HTTP {}: {}",
                status,
                api_message(&text)
            )));
        }

        let statement: StatementResponse = response
            .json()
            .await
            .map_err(|e| AppError::ExecutionFailed(format!("invalid response: {}", e)))?;

        let (mut result, mut next_link) = statement.into_result()?;
        while let Some(link) = next_link {
            let chunk: ResultChunk = self
                .client
                .get(format!("{}{}", self.base_url, link))
                .bearer_auth(&self.token)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| AppError::ExecutionFailed(format!("fetching result chunk: {}", e)))?
                .json()
                .await
                .map_err(|e| AppError::ExecutionFailed(format!("invalid result chunk: {}", e)))?;
            next_link = chunk.append_to(&mut result);
        }
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<Manifest>,
    #[serde(default)]
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: ManifestSchema,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ManifestColumn>,
}

#[derive(Debug, Deserialize)]
struct ManifestColumn {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
    #[serde(default)]
    type_text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

impl StatementResponse {
    /// Converts a finished statement into a result plus the link to the next
    /// chunk, if the result spans several.
    fn into_result(self) -> AppResult<(QueryResult, Option<String>)> {
        if self.status.state != "SUCCEEDED" {
            let detail = self
                .status
                .error
                .map(|e| match (e.error_code, e.message) {
                    (Some(code), Some(message)) => format!("{}: {}", code, message),
                    (_, Some(message)) => message,
                    (Some(code), None) => code,
                    (None, None) => String::new(),
                })
                .unwrap_or_default();
            return Err(AppError::ExecutionFailed(format!(
                "statement {}{}{}",
                self.status.state,
                if detail.is_empty() { "" } else { ": " },
                detail
            )));
        }

        let columns: Vec<ManifestColumn> = self
            .manifest
            .map(|m| m.schema.columns)
            .unwrap_or_default();
        let types: Vec<String> = columns
            .iter()
            .map(|c| c.type_name.clone().unwrap_or_default())
            .collect();

        let mut result = QueryResult {
            columns: columns
                .into_iter()
                .map(|c| {
                    let data_type = c.type_text.or(c.type_name).unwrap_or_default();
                    ColumnInfo::new(c.name, data_type)
                })
                .collect(),
            rows: Vec::new(),
        };

        let next = self.result.unwrap_or_default().append_typed(&mut result, &types);
        Ok((result, next))
    }
}

impl ResultChunk {
    fn append_to(self, result: &mut QueryResult) -> Option<String> {
        let types: Vec<String> = result
            .columns
            .iter()
            .map(|c| base_type(&c.data_type).to_string())
            .collect();
        self.append_typed(result, &types)
    }

    fn append_typed(self, result: &mut QueryResult, types: &[String]) -> Option<String> {
        result.rows.extend(self.data_array.into_iter().map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, raw)| typed_value(types.get(i).map(String::as_str), raw))
                .collect()
        }));
        self.next_chunk_internal_link
    }
}

/// `DECIMAL(10,2)` -> `DECIMAL`.
fn base_type(type_text: &str) -> &str {
    type_text.split(['(', '<']).next().unwrap_or(type_text).trim()
}

/// JSON_ARRAY results carry every value as a string; restore scalars.
fn typed_value(type_name: Option<&str>, raw: Option<String>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    match type_name.map(|t| t.to_ascii_uppercase()).as_deref() {
        Some("BYTE" | "SHORT" | "INT" | "LONG" | "TINYINT" | "SMALLINT" | "BIGINT") => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(raw)),
        Some("FLOAT" | "DOUBLE") => raw
            .parse::<f64>()
            .map(|f| json!(f))
            .unwrap_or(Value::String(raw)),
        Some("BOOLEAN") => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },
        _ => Value::String(raw),
    }
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Column list from `DESCRIBE TABLE` output, stopping at the partition section.
fn described_columns(result: &QueryResult) -> Vec<ColumnInfo> {
    result
        .rows
        .iter()
        .map(|row| {
            let text = |i: usize| row.get(i).and_then(Value::as_str).unwrap_or_default();
            (text(0).trim().to_string(), text(1).trim().to_string())
        })
        .take_while(|(name, _)| !name.is_empty() && !name.starts_with('#'))
        .map(|(name, data_type)| ColumnInfo::new(name, data_type))
        .collect()
}

/// Qualified table names from `SHOW TABLES` output.
fn listed_tables(result: &QueryResult, max_tables: usize) -> Vec<String> {
    let position = |name: &str| result.columns.iter().position(|c| c.name == name);
    let Some(table_idx) = position("tableName") else {
        return Vec::new();
    };
    let database_idx = position("database").or_else(|| position("namespace"));

    result
        .rows
        .iter()
        .filter_map(|row| {
            let table = row.get(table_idx)?.as_str()?;
            let database = database_idx
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .filter(|db| !db.is_empty());
            Some(match database {
                Some(db) => format!("{}.{}", quote_ident(db), quote_ident(table)),
                None => quote_ident(table),
            })
        })
        .take(max_tables)
        .collect()
}

struct DatabricksHandle {
    session: Option<Session>,
}

impl DatabricksHandle {
    fn session(&self) -> AppResult<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| AppError::Internal("databricks session already closed".into()))
    }
}

#[async_trait]
impl ConnectionHandle for DatabricksHandle {
    fn dialect(&self) -> &'static str {
        "Databricks SQL"
    }

    async fn describe_tables(&mut self, limits: &SchemaLimits) -> AppResult<Vec<TableSchema>> {
        let session = self.session()?;
        let listing = session.run("SHOW TABLES").await?;

        let mut tables = Vec::new();
        for name in listed_tables(&listing, limits.max_tables) {
            let described = session.run(&format!("DESCRIBE TABLE {}", name)).await?;
            let sample = if limits.sample_rows > 0 {
                session
                    .run(&format!("SELECT * FROM {} LIMIT {}", name, limits.sample_rows))
                    .await
                    .ok()
            } else {
                None
            };
            tables.push(TableSchema {
                name,
                columns: described_columns(&described),
                sample,
            });
        }
        Ok(tables)
    }

    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
        self.session()?.run(sql).await
    }

    async fn close(&mut self) -> AppResult<()> {
        self.session.take();
        Ok(())
    }
}
