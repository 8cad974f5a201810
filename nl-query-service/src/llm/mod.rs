//! 大模型访问模块
//!
//! [`LlmClient`] 隔离流水线与对话补全服务。查询生成与回答组织各自持有
//! 启动时由 [`common::config::LlmConfig`] 构建的 `Arc<dyn LlmClient>`。

mod composer;
mod openai;
mod translator;

use async_trait::async_trait;

pub use composer::AnswerComposer;
pub use openai::OpenAiClient;
pub use translator::QueryTranslator;

/// 大模型调用错误
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// 对话补全客户端
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发送一轮 system/user 消息并返回模型回复。
    /// `system` 为空时只发送用户消息。
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// 按顺序返回预设回复，并记录每次的用户提示词
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: impl IntoIterator<Item = Result<String, String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        /// 每次调用都成功返回给定回复
        pub fn replying(replies: &[&str]) -> Arc<Self> {
            Self::new(replies.iter().map(|r| Ok(r.to_string())))
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(user.to_string());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(LlmError::Status {
                    status: 503,
                    message,
                }),
                None => Err(LlmError::InvalidResponse("script exhausted".into())),
            }
        }
    }
}
