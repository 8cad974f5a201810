//! Shared data models.

pub mod connection;
pub mod query;

pub use connection::{BackendKind, ConnectionRequest, CredentialField, Credentials};
pub use query::{ColumnInfo, QueryAnswer, QueryForm, QueryRequest, QueryResult};
