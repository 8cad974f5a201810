//! Handler模块

use std::time::Instant;

use axum::{
    extract::{rejection::FormRejection, rejection::JsonRejection, State},
    response::{Html, IntoResponse, Response},
    Extension, Form, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::AppError;
use common::middleware::RequestId;
use common::models::{BackendKind, QueryAnswer, QueryForm, QueryRequest};
use common::response::ApiResponse;

use crate::pages;
use crate::service::PipelineStage;
use crate::state::AppState;

/// 问题输入页面
pub async fn input_form(State(state): State<AppState>) -> Html<String> {
    Html(pages::input_form(&state.pipeline.backends()))
}

/// 输入页面的表单提交，始终返回 HTML 页面
pub async fn query_sql(
    State(state): State<AppState>,
    form: Result<Form<QueryForm>, FormRejection>,
) -> Response {
    let parts = form
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
        .and_then(|Form(form)| form.into_parts());

    let outcome = match parts {
        Ok((request, question)) => state.pipeline.clone().run_detached(request, question).await,
        Err(e) => {
            tracing::warn!(stage = %PipelineStage::Rejected, error = %e, "表单请求被拒绝");
            Err(e)
        }
    };

    match outcome {
        Ok(answer) => {
            tracing::info!(stage = %PipelineStage::Rendered, backend = %answer.backend, "回答页面已渲染");
            Html(pages::answer_page(&answer)).into_response()
        }
        Err(e) => (e.status_code(), Html(pages::error_page(&e))).into_response(),
    }
}

/// 针对指定数据库回答自然语言问题
#[utoipa::path(
    post,
    path = "/api/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "问题已回答", body = ApiResponse<QueryAnswer>),
        (status = 400, description = "参数校验失败、缺少凭据或不支持的数据库类型"),
        (status = 422, description = "生成的查询在数据库上执行失败"),
        (status = 502, description = "数据库连接或大模型调用失败")
    )
)]
pub async fn query_api(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<QueryAnswer>>, AppError> {
    let started = Instant::now();
    let Json(payload) = payload.map_err(|rejection| AppError::Validation(rejection.body_text()))?;

    let (request, question) = payload.into_parts().inspect_err(|e| {
        tracing::warn!(stage = %PipelineStage::Rejected, error = %e, "请求被拒绝");
    })?;
    let answer = state.pipeline.clone().run_detached(request, question).await?;
    tracing::info!(stage = %PipelineStage::Rendered, backend = %answer.backend, "回答已返回");

    Ok(Json(
        ApiResponse::ok(answer)
            .with_request_id(request_id.as_str())
            .with_duration(started.elapsed().as_millis() as u64)
            .with_service(state.config.service_name.clone()),
    ))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行中", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        backends: state.pipeline.backends(),
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// 可查询的数据库类型
    pub backends: Vec<BackendKind>,
}
