//! 生成服务客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 GenerationClient::complete（非流式，
//! 每次调用一问一答）。超时与重试是后端的事，引擎不做自动重试。

use async_trait::async_trait;
use thiserror::Error;

/// 请求消息角色
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 发往生成服务的单条消息
#[derive(Clone, Debug)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 生成服务错误；对当前尝试是致命的，阶段保持原地，允许手动重试
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("service returned empty content")]
    EmptyResponse,
}

/// 生成服务客户端 trait
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// 非流式完成，返回首条回复文本
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError>;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
