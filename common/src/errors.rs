//! Application error types.
//!
//! Every pipeline failure is terminal for the request and is surfaced to the
//! caller verbatim, including the raw backend or provider text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::response::ApiResponse;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised while handling a query request.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A required request field is absent or empty.
    #[error("validation error: {0}")]
    Validation(String),

    /// The backend needs credential fields that were not supplied.
    #[error("missing credentials for {backend}: {}", .fields.join(", "))]
    MissingCredentials { backend: String, fields: Vec<String> },

    /// The backend tag is not one of the registered kinds.
    #[error("unsupported database type: {0}")]
    UnsupportedBackend(String),

    /// Opening the backend connection failed.
    #[error("failed to connect to {backend}: {message}")]
    ConnectionFailed { backend: String, message: String },

    /// The language model could not produce a query.
    #[error("query generation failed: {0}")]
    TranslationFailed(String),

    /// The backend rejected or failed the generated query.
    #[error("query execution failed: {0}")]
    ExecutionFailed(String),

    /// The language model could not phrase the answer.
    #[error("answer composition failed: {0}")]
    CompositionFailed(String),

    /// Startup configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Creates a `ConnectionFailed` error for a backend.
    pub fn connection(backend: impl ToString, message: impl ToString) -> Self {
        Self::ConnectionFailed {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    /// Stable error code for client handling.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::MissingCredentials { .. } => "MISSING_CREDENTIALS",
            AppError::UnsupportedBackend(_) => "UNSUPPORTED_BACKEND",
            AppError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            AppError::TranslationFailed(_) => "TRANSLATION_FAILED",
            AppError::ExecutionFailed(_) => "EXECUTION_FAILED",
            AppError::CompositionFailed(_) => "COMPOSITION_FAILED",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error reaches the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::MissingCredentials { .. }
            | AppError::UnsupportedBackend(_) => StatusCode::BAD_REQUEST,
            AppError::ExecutionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ConnectionFailed { .. }
            | AppError::TranslationFailed(_)
            | AppError::CompositionFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details attached to the JSON error body, if any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::MissingCredentials { backend, fields } => {
                Some(json!({ "backend": backend, "fields": fields }))
            }
            AppError::ConnectionFailed { backend, .. } => Some(json!({ "backend": backend })),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages.join("; "))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "request rejected");
        }

        let body = match self.details() {
            Some(details) => ApiResponse::err_with_details(self.code(), self.to_string(), details),
            None => ApiResponse::err(self.code(), self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_names_backend_and_fields() {
        let err = AppError::MissingCredentials {
            backend: "sqlserver".into(),
            fields: vec!["username".into(), "password".into()],
        };
        assert_eq!(
            err.to_string(),
            "missing credentials for sqlserver: username, password"
        );
        assert_eq!(err.code(), "MISSING_CREDENTIALS");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_downstream_errors_map_to_bad_gateway() {
        assert_eq!(
            AppError::TranslationFailed("timeout".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::connection("sqlite", "no such file").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
