//! 路由模块

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::input_form))
        .route("/query_sql", post(handlers::query_sql))
        .route("/api/query", post(handlers::query_api))
        .route("/api/health", get(handlers::health_check))
}
