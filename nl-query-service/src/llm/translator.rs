//! 问题到查询语句的转换

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use common::config::SchemaLimits;
use common::errors::{AppError, AppResult};

use super::LlmClient;
use crate::connectors::{render_table_info, ConnectionHandle};

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(.*?)```").expect("valid regex"));
// 只去掉已知的语言标记，首个单词可能就是查询关键字
static FENCE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:sql|t-?sql|soql|sqlite|mysql|postgres(?:ql)?|spark(?:sql)?|databricks|text|plaintext)[ \t]*\r?\n")
        .expect("valid regex")
});
static QUERY_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)SQL\s?Query:\s*").expect("valid regex"));
static TRAILING_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*(SQL\s?Result|Answer):").expect("valid regex"));

const SYSTEM_PROMPT: &str = "You translate questions about a database into a single query. \
Reply with the query only: no explanation, no markdown.";

/// 根据表结构构造提示词，由大模型生成查询语句
pub struct QueryTranslator {
    llm: Arc<dyn LlmClient>,
    limits: SchemaLimits,
}

impl QueryTranslator {
    pub fn new(llm: Arc<dyn LlmClient>, limits: SchemaLimits) -> Self {
        Self { llm, limits }
    }

    /// 读取 `handle` 对应的表结构并返回生成的查询语句
    ///
    /// 返回前不对语句做任何校验。
    pub async fn translate(
        &self,
        question: &str,
        handle: &mut dyn ConnectionHandle,
    ) -> AppResult<String> {
        let dialect = handle.dialect();
        let tables = handle
            .describe_tables(&self.limits)
            .await
            .map_err(|e| AppError::TranslationFailed(format!("reading schema: {}", e)))?;

        let prompt = generation_prompt(question, dialect, self.limits.top_k, &render_table_info(&tables));
        let reply = self
            .llm
            .complete(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| AppError::TranslationFailed(e.to_string()))?;

        let sql = extract_sql(&reply).ok_or_else(|| {
            AppError::TranslationFailed(format!("model reply contained no query: {:?}", reply))
        })?;

        tracing::info!(dialect, tables = tables.len(), sql = %sql, "查询语句已生成");
        Ok(sql)
    }
}

fn generation_prompt(question: &str, dialect: &str, top_k: usize, table_info: &str) -> String {
    format!(
        "You are a {dialect} expert. Given an input question, create a syntactically correct \
{dialect} query to run.
Unless the user specifies in the question a specific number of examples to obtain, query for \
at most {top_k} results, using the row-limiting syntax of {dialect}. You can order the results \
to return the most informative data in the database.
Never query for all columns from a table. Query only the columns that are needed to answer the \
question.
Pay attention to use only the column names you can see in the tables below. Be careful to not \
query for columns that do not exist. Also, pay attention to which column is in which table.

Only use the following tables:
{table_info}

Question: {question}
SQLQuery: "
    )
}

/// 从模型回复中提取查询语句
///
/// 处理 markdown 代码块、开头的 `SQLQuery:` 标记以及结尾的 `SQLResult:` /
/// `Answer:` 段落。末尾分号会被去掉，部分数据库不接受分号。
pub fn extract_sql(reply: &str) -> Option<String> {
    let mut text = match FENCED_BLOCK.captures(reply).and_then(|c| c.get(1)) {
        Some(body) => {
            let body = body.as_str();
            FENCE_TAG.find(body).map_or(body, |tag| &body[tag.end()..])
        }
        None => reply,
    };

    if let Some(marker) = QUERY_MARKER.find(text) {
        text = &text[marker.end()..];
    }
    if let Some(section) = TRAILING_SECTION.find(text) {
        text = &text[..section.start()];
    }

    let sql = text
        .trim()
        .trim_matches('`')
        .trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());

    (!sql.is_empty()).then(|| sql.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::testing::seed_sqlite;
    use crate::connectors::{Connector, SqliteConnector};
    use crate::llm::testing::ScriptedLlm;
    use common::models::Credentials;

    #[test]
    fn test_extract_plain_query() {
        assert_eq!(
            extract_sql("SELECT COUNT(*) FROM t").as_deref(),
            Some("SELECT COUNT(*) FROM t")
        );
    }

    #[test]
    fn test_extract_from_fence() {
        let reply = "Here you go:\n```sql\nSELECT name FROM t LIMIT 5;\n```\nThat lists names.";
        assert_eq!(extract_sql(reply).as_deref(), Some("SELECT name FROM t LIMIT 5"));
    }

    #[test]
    fn test_extract_strips_chain_labels() {
        let reply = "SQLQuery: SELECT COUNT(*) FROM users\nSQLResult: 100\nAnswer: There are 100 users";
        assert_eq!(extract_sql(reply).as_deref(), Some("SELECT COUNT(*) FROM users"));
    }

    #[test]
    fn test_extract_untagged_fence_keeps_first_keyword() {
        assert_eq!(
            extract_sql("```SELECT COUNT(*) FROM t```").as_deref(),
            Some("SELECT COUNT(*) FROM t")
        );
        assert_eq!(
            extract_sql("```SELECT\n  name FROM t\n```").as_deref(),
            Some("SELECT\n  name FROM t")
        );
    }

    #[test]
    fn test_extract_drops_dialect_tags() {
        assert_eq!(
            extract_sql("```tsql\nSELECT TOP (5) name FROM t\n```").as_deref(),
            Some("SELECT TOP (5) name FROM t")
        );
        assert_eq!(
            extract_sql("```SOQL\nSELECT Id FROM Account\n```").as_deref(),
            Some("SELECT Id FROM Account")
        );
    }

    #[test]
    fn test_extract_keeps_multiline_query() {
        let reply = "SELECT name\nFROM t\nWHERE id > 1";
        assert_eq!(extract_sql(reply).as_deref(), Some(reply));
    }

    #[test]
    fn test_extract_empty_reply() {
        assert_eq!(extract_sql("  ```sql\n```  "), None);
        assert_eq!(extract_sql(""), None);
    }

    #[tokio::test]
    async fn test_prompt_carries_schema_dialect_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_sqlite(&dir).await;
        let mut handle = SqliteConnector
            .open(&path, &Credentials::default())
            .await
            .ok()
            .unwrap();

        let llm = ScriptedLlm::replying(&["SQLQuery: SELECT COUNT(*) FROM t;"]);
        let limits = SchemaLimits {
            top_k: 7,
            ..Default::default()
        };
        let translator = QueryTranslator::new(llm.clone(), limits);

        let sql = translator
            .translate("how many rows?", handle.as_mut())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT COUNT(*) FROM t");

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("You are a SQLite expert"));
        assert!(prompt.contains("at most 7 results"));
        assert!(prompt.contains("CREATE TABLE t ("));
        assert!(prompt.contains("3 rows from t table:"));
        assert!(prompt.ends_with("Question: how many rows?\nSQLQuery: "));
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_error_is_translation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = seed_sqlite(&dir).await;
        let mut handle = SqliteConnector
            .open(&path, &Credentials::default())
            .await
            .ok()
            .unwrap();

        let llm = ScriptedLlm::new([Err("rate limited".to_string())]);
        let translator = QueryTranslator::new(llm, SchemaLimits::default());
        let err = translator
            .translate("how many rows?", handle.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TranslationFailed(msg) if msg.contains("rate limited")));
    }
}
