//! Mock 生成客户端（用于测试，无需 API）
//!
//! 聊天请求回显最后一条用户消息；重写请求返回固定摘要文本，
//! 便于离线跑通整条单元流水线。

use async_trait::async_trait;

use crate::generate::{ChatMessage, ChatRole, GenerationClient, GenerationError};

const DEFAULT_SUMMARY: &str = "This study looked at a question readers often find confusing. \
In plain terms, the researchers compared two approaches and found that the new one worked \
better for most people, while being careful to note where the evidence is still limited.";

/// Mock 客户端：可注入固定摘要文本
pub struct MockGenerationClient {
    summary: String,
}

impl MockGenerationClient {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
        }
    }
}

impl Default for MockGenerationClient {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY)
    }
}

#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let is_rewrite = messages
            .iter()
            .any(|m| m.role == ChatRole::User && m.content.starts_with("Rewrite this abstract"));
        if is_rewrite {
            return Ok(self.summary.clone());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Mock reply: {last_user}"))
    }
}
