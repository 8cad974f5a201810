//! 自然语言回答组织

use std::sync::Arc;

use common::errors::{AppError, AppResult};

use super::LlmClient;

/// 填充固定的回答模板
pub fn answer_prompt(question: &str, sql: &str, result: &str) -> String {
    format!(
        "Given the following user question, corresponding SQL query, and SQL result, \
answer the user question.

Question: {question}
SQL Query: {sql}
SQL Result: {result}
Answer: "
    )
}

/// 由大模型把执行结果组织成回答
pub struct AnswerComposer {
    llm: Arc<dyn LlmClient>,
}

impl AnswerComposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn compose(&self, question: &str, sql: &str, result: &str) -> AppResult<String> {
        let reply = self
            .llm
            .complete("", &answer_prompt(question, sql, result))
            .await
            .map_err(|e| AppError::CompositionFailed(e.to_string()))?;

        // 原样渲染，空回复也不例外
        Ok(reply.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;

    #[test]
    fn test_template_layout() {
        assert_eq!(
            answer_prompt("How many?", "SELECT COUNT(*) FROM t", "COUNT(*)\n3"),
            "Given the following user question, corresponding SQL query, and SQL result, \
answer the user question.\n\nQuestion: How many?\nSQL Query: SELECT COUNT(*) FROM t\n\
SQL Result: COUNT(*)\n3\nAnswer: "
        );
    }

    #[tokio::test]
    async fn test_compose_trims_reply() {
        let llm = ScriptedLlm::replying(&["  There are 3 rows.\n"]);
        let composer = AnswerComposer::new(llm.clone());
        let answer = composer
            .compose("How many?", "SELECT COUNT(*) FROM t", "COUNT(*)\n3")
            .await
            .unwrap();
        assert_eq!(answer, "There are 3 rows.");
        assert!(llm.prompts()[0].contains("SQL Result: COUNT(*)\n3"));
    }

    #[tokio::test]
    async fn test_failures_are_composition_errors() {
        let composer = AnswerComposer::new(ScriptedLlm::new([Err("overloaded".to_string())]));
        let err = composer.compose("q", "SELECT 1", "1").await.unwrap_err();
        assert!(matches!(err, AppError::CompositionFailed(msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn test_blank_reply_is_passed_through() {
        let composer = AnswerComposer::new(ScriptedLlm::replying(&["   "]));
        let answer = composer.compose("q", "SELECT 1", "1").await.unwrap();
        assert_eq!(answer, "");
    }
}
