//! 问答流水线模块
//!
//! 每个请求依次经过 `Received → ConnectionOpened → QueryGenerated →
//! QueryExecuted → AnswerComposed`，最后由 handler 渲染。连接建立前失败记为
//! `Rejected`，之后的失败记为 `Failed`。连接一旦建立，任何路径都会关闭。

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};
use common::models::{BackendKind, ConnectionRequest, QueryAnswer};

use crate::connectors::{ConnectionHandle, ConnectorRegistry};
use crate::executor::QueryExecutor;
use crate::llm::{AnswerComposer, LlmClient, QueryTranslator};

/// 流水线阶段，对应日志中的 `stage` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    ConnectionOpened,
    QueryGenerated,
    QueryExecuted,
    AnswerComposed,
    Rendered,
    Rejected,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::ConnectionOpened => "connection_opened",
            PipelineStage::QueryGenerated => "query_generated",
            PipelineStage::QueryExecuted => "query_executed",
            PipelineStage::AnswerComposed => "answer_composed",
            PipelineStage::Rendered => "rendered",
            PipelineStage::Rejected => "rejected",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个问题的处理流程：连接、生成查询、执行、组织回答
pub struct QueryPipeline {
    registry: ConnectorRegistry,
    translator: QueryTranslator,
    composer: AnswerComposer,
}

impl QueryPipeline {
    pub fn new(registry: ConnectorRegistry, llm: Arc<dyn LlmClient>, limits: SchemaLimits) -> Self {
        Self {
            registry,
            translator: QueryTranslator::new(llm.clone(), limits),
            composer: AnswerComposer::new(llm),
        }
    }

    /// 已注册的数据库类型
    pub fn backends(&self) -> Vec<BackendKind> {
        self.registry.kinds()
    }

    /// 在独立任务中执行 [`QueryPipeline::run`]。
    ///
    /// 客户端断开导致调用方被丢弃时流程仍会跑完，已建立的连接总会被关闭。
    pub async fn run_detached(
        self: Arc<Self>,
        request: ConnectionRequest,
        question: String,
    ) -> AppResult<QueryAnswer> {
        tokio::spawn(async move { self.run(request, question).await })
            .await
            .map_err(|e| AppError::Internal(format!("流水线任务异常退出: {}", e)))?
    }

    /// 在 `request` 指定的数据库上回答 `question`
    pub async fn run(&self, request: ConnectionRequest, question: String) -> AppResult<QueryAnswer> {
        let started = Instant::now();
        let backend = request.backend;
        tracing::info!(stage = %PipelineStage::Received, %backend, "收到问题");

        let mut handle = match self.registry.open(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(stage = %PipelineStage::Rejected, %backend, error = %e, "请求被拒绝");
                return Err(e);
            }
        };
        tracing::info!(
            stage = %PipelineStage::ConnectionOpened,
            %backend,
            dialect = handle.dialect(),
            "连接已建立"
        );

        let outcome = self.answer(backend, handle.as_mut(), question).await;

        if let Err(e) = handle.close().await {
            tracing::warn!(%backend, error = %e, "关闭连接失败");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::info!(
                stage = %PipelineStage::AnswerComposed,
                %backend,
                elapsed_ms,
                "回答已生成"
            ),
            Err(e) => tracing::warn!(
                stage = %PipelineStage::Failed,
                %backend,
                elapsed_ms,
                error = %e,
                "流水线执行失败"
            ),
        }
        outcome
    }

    async fn answer(
        &self,
        backend: BackendKind,
        handle: &mut dyn ConnectionHandle,
        question: String,
    ) -> AppResult<QueryAnswer> {
        let generated_sql = self.translator.translate(&question, handle).await?;
        tracing::info!(stage = %PipelineStage::QueryGenerated, %backend, sql = %generated_sql, "查询已生成");

        let result = QueryExecutor::execute(handle, &generated_sql).await?;
        tracing::info!(stage = %PipelineStage::QueryExecuted, %backend, "查询已执行");

        let answer = self
            .composer
            .compose(&question, &generated_sql, &result)
            .await?;

        Ok(QueryAnswer {
            backend,
            question,
            generated_sql,
            result,
            answer,
        })
    }
}
