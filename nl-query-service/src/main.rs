//! 自然语言查询服务
//!
//! 针对用户指定的数据库回答自然语言问题，包括：
//! - 按请求建立连接（SQLite、SQL Server、Databricks、Salesforce）
//! - 由大模型根据表结构生成查询语句
//! - 执行查询并由大模型组织最终回答

mod connectors;
mod executor;
mod handlers;
mod llm;
mod pages;
mod routes;
mod service;
mod state;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::request_id::request_id_middleware;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "nl-query-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "自然语言查询服务 API",
        version = "0.1.0",
        description = "生成并执行 SQL 以回答自然语言问题"
    ),
    paths(handlers::query_api, handlers::health_check),
    components(schemas(
        common::models::QueryRequest,
        common::models::Credentials,
        common::models::QueryAnswer,
        common::models::BackendKind,
        common::response::ApiError,
        common::response::ResponseMeta,
        handlers::HealthResponse,
    )),
    tags(
        (name = "query", description = "问答端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 先加载配置：其中会读取 `.env`，可能设置 RUST_LOG
    let config = AppConfig::load_with_service(SERVICE_NAME).context("加载配置失败")?;
    init_tracing();

    // 创建路由
    let addr = config.bind_addr();
    let app = create_router(AppState::new(config.clone()));

    info!(
        service = SERVICE_NAME,
        address = %addr,
        model = %config.llm.model,
        "启动服务"
    );

    // 启动服务
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

/// 初始化日志追踪：`RUST_LOG` 过滤（默认 `info`），`LOG_FORMAT=json` 输出 JSON 行
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "监听 Ctrl-C 信号失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "监听 SIGTERM 信号失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("收到关闭信号，开始优雅停机");
}
