//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, Message, Role};

use crate::config::LlmSection;

/// 根据配置创建客户端；未知 provider 视为配置错误，不做静默回退
pub fn create_client_from_config(config: &LlmSection) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(
            OpenAiClient::new(
                config.base_url.as_deref(),
                &config.model,
                config.api_key.as_deref(),
            )
            .with_timeout(config.timeouts.request),
        )),
        "mock" => Ok(Arc::new(MockLlmClient::new())),
        other => Err(LlmError::Config(format!(
            "Unknown LLM provider '{}' (expected 'openai' or 'mock')",
            other
        ))),
    }
}
