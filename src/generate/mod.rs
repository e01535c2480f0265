//! 生成服务层：客户端抽象与实现（OpenAI 兼容 / Mock）与请求构造

use std::sync::Arc;

pub mod mock;
pub mod openai;
pub mod request;
pub mod traits;

pub use mock::MockGenerationClient;
pub use openai::{OpenAiGenerator, TokenUsage};
pub use request::{chat_request, summary_request, CHAT_SYSTEM_PROMPT};
pub use traits::{ChatMessage, ChatRole, GenerationClient, GenerationError};

use crate::config::LlmSection;

/// 按配置创建生成客户端；provider = "mock" 时离线运行
pub fn create_generator(cfg: &LlmSection) -> Arc<dyn GenerationClient> {
    match cfg.provider.as_str() {
        "mock" => {
            tracing::info!("Using mock generation client");
            Arc::new(MockGenerationClient::default())
        }
        _ => {
            tracing::info!(model = %cfg.model, "Using OpenAI-compatible generation client");
            Arc::new(OpenAiGenerator::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                None,
            ))
        }
    }
}
