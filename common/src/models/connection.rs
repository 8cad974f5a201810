//! Connection models.
//!
//! A connection request lives for exactly one HTTP request; nothing here is
//! persisted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};

/// Database backend enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// SQLite database file.
    Sqlite,
    /// Microsoft SQL Server.
    SqlServer,
    /// Databricks SQL warehouse (Delta tables).
    Databricks,
    /// Salesforce org queried with SOQL.
    Salesforce,
}

impl BackendKind {
    /// All backend kinds, in form display order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Sqlite,
        BackendKind::SqlServer,
        BackendKind::Databricks,
        BackendKind::Salesforce,
    ];

    /// Tag used in forms, URLs and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::SqlServer => "sqlserver",
            BackendKind::Databricks => "databricks",
            BackendKind::Salesforce => "salesforce",
        }
    }

    /// Human-readable name for the input form.
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "SQLite",
            BackendKind::SqlServer => "SQL Server",
            BackendKind::Databricks => "Databricks Delta Table",
            BackendKind::Salesforce => "Salesforce",
        }
    }

    /// Credential fields that must be present before a connection is attempted.
    pub fn required_credentials(&self) -> &'static [CredentialField] {
        match self {
            BackendKind::Sqlite => &[],
            BackendKind::SqlServer => &[CredentialField::Username, CredentialField::Password],
            BackendKind::Databricks => &[CredentialField::Host, CredentialField::Token],
            BackendKind::Salesforce => &[
                CredentialField::Username,
                CredentialField::Password,
                CredentialField::SecurityToken,
            ],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| AppError::UnsupportedBackend(s.to_string()))
    }
}

/// A single credential slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Username,
    Password,
    Host,
    Token,
    SecurityToken,
}

impl CredentialField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::Username => "username",
            CredentialField::Password => "password",
            CredentialField::Host => "host",
            CredentialField::Token => "token",
            CredentialField::SecurityToken => "security_token",
        }
    }
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend credentials. Empty strings count as absent.
#[derive(Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub token: Option<String>,
    pub security_token: Option<String>,
}

impl Credentials {
    /// Returns the value of a field if it is present and non-empty.
    pub fn get(&self, field: CredentialField) -> Option<&str> {
        let value = match field {
            CredentialField::Username => &self.username,
            CredentialField::Password => &self.password,
            CredentialField::Host => &self.host,
            CredentialField::Token => &self.token,
            CredentialField::SecurityToken => &self.security_token,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// Returns the subset of `required` that is absent.
    pub fn missing(&self, required: &[CredentialField]) -> Vec<CredentialField> {
        required
            .iter()
            .copied()
            .filter(|field| self.get(*field).is_none())
            .collect()
    }

    /// Returns a field or a `MissingCredentials` error for `backend`.
    pub fn require(&self, backend: BackendKind, field: CredentialField) -> AppResult<&str> {
        self.get(field).ok_or_else(|| AppError::MissingCredentials {
            backend: backend.to_string(),
            fields: vec![field.to_string()],
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("host", &self.host)
            .field("token", &redact(&self.token))
            .field("security_token", &redact(&self.security_token))
            .finish()
    }
}

/// Everything needed to open one backend connection.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub backend: BackendKind,
    /// File path, host, warehouse id or instance URL depending on the backend.
    pub location: String,
    pub credentials: Credentials,
}
