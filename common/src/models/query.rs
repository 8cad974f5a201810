//! Query models.
//!
//! Request bodies for the form and JSON endpoints, the tabular result of an
//! executed statement, and the final answer payload.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::AppResult;
use crate::models::connection::{BackendKind, ConnectionRequest, Credentials};

/// Form fields posted by the HTML input page.
///
/// Credential fields are backend specific; only the ones belonging to the
/// selected `db_type` are read.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct QueryForm {
    #[validate(length(min = 1, message = "Database type is required"))]
    pub db_type: String,
    #[validate(length(min = 1, message = "Database location is required"))]
    pub db_location: String,
    #[validate(length(min = 1, message = "Query is required"))]
    pub query: String,
    pub db_username: Option<String>,
    pub db_password: Option<String>,
    pub databricks_host: Option<String>,
    pub databricks_token: Option<String>,
    pub sf_username: Option<String>,
    pub sf_password: Option<String>,
    pub sf_token: Option<String>,
}

impl QueryForm {
    /// Validates the form and splits it into a connection request and the question.
    pub fn into_parts(self) -> AppResult<(ConnectionRequest, String)> {
        self.validate()?;
        let backend: BackendKind = self.db_type.parse()?;

        let credentials = match backend {
            BackendKind::Sqlite => Credentials::default(),
            BackendKind::SqlServer => Credentials {
                username: self.db_username,
                password: self.db_password,
                ..Default::default()
            },
            BackendKind::Databricks => Credentials {
                host: self.databricks_host,
                token: self.databricks_token,
                ..Default::default()
            },
            BackendKind::Salesforce => Credentials {
                username: self.sf_username,
                password: self.sf_password,
                security_token: self.sf_token,
                ..Default::default()
            },
        };

        Ok((
            ConnectionRequest {
                backend,
                location: self.db_location,
                credentials,
            },
            self.query,
        ))
    }
}

/// JSON request body for `POST /api/query`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct QueryRequest {
    /// Backend tag: sqlite, sqlserver, databricks or salesforce.
    #[validate(length(min = 1, message = "Database type is required"))]
    pub db_type: String,

    /// File path, host, warehouse id or instance URL.
    #[validate(length(min = 1, message = "Database location is required"))]
    pub db_location: String,

    /// Natural-language question.
    #[validate(length(min = 1, message = "Query is required"))]
    pub query: String,

    /// Backend credentials.
    #[serde(default)]
    pub credentials: Credentials,
}

impl QueryRequest {
    /// Validates the body and splits it into a connection request and the question.
    pub fn into_parts(self) -> AppResult<(ConnectionRequest, String)> {
        self.validate()?;
        let backend: BackendKind = self.db_type.parse()?;
        Ok((
            ConnectionRequest {
                backend,
                location: self.db_location,
                credentials: self.credentials,
            },
            self.query,
        ))
    }
}

/// Result of a SQL statement execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    /// Column information.
    pub columns: Vec<ColumnInfo>,

    /// Row data (each row is a vector of JSON values).
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Column information in a query result or table description.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Column data type, as reported by the backend.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

impl QueryResult {
    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Renders the result as plain text: a ` | `-joined header line followed by
    /// one line per row.
    pub fn to_text(&self) -> String {
        if self.rows.is_empty() {
            return "(no rows)".to_string();
        }

        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        if !self.columns.is_empty() {
            lines.push(
                self.columns
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" | "),
            );
        }
        for row in &self.rows {
            lines.push(row.iter().map(value_text).collect::<Vec<_>>().join(" | "));
        }
        lines.join("\n")
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Successful pipeline outcome.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QueryAnswer {
    /// Backend the question was run against.
    pub backend: BackendKind,
    /// Original natural-language question.
    pub question: String,
    /// SQL produced by the language model.
    pub generated_sql: String,
    /// Execution result as handed to the answer prompt.
    pub result: String,
    /// Natural-language answer.
    pub answer: String,
}
