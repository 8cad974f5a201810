//! Shared building blocks for the natural-language query service.
//!
//! - `config`: environment-driven service configuration
//! - `errors`: the request error taxonomy and its HTTP mapping
//! - `middleware`: request-id tracing middleware
//! - `models`: connection and query request/response models
//! - `response`: the JSON response envelope
//! - `utils`: id generation, markup escaping, statement classification

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
