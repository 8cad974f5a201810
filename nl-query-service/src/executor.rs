//! 查询执行模块

use std::time::Instant;

use common::errors::AppResult;
use common::utils::{SqlClassifier, StatementKind};

use crate::connectors::ConnectionHandle;

/// 原样执行生成的语句
pub struct QueryExecutor;

impl QueryExecutor {
    /// 执行 `sql` 并以文本形式返回结果
    ///
    /// 非只读语句会记录 `warn` 日志，但仍然执行；数据库错误原样作为
    /// `ExecutionFailed` 返回。
    pub async fn execute(handle: &mut dyn ConnectionHandle, sql: &str) -> AppResult<String> {
        let kind = SqlClassifier::classify(sql);
        if kind != StatementKind::Read {
            tracing::warn!(?kind, sql = %sql, "生成的语句不是只读查询");
        }

        let started = Instant::now();
        let result = handle.execute(sql).await?;
        tracing::info!(
            rows = result.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "查询执行完成"
        );
        Ok(result.to_text())
    }
}
