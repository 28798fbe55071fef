//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认回显最后一条 User 消息；可配置固定响应或强制失败，便于本地跑通整条流水线。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：固定响应 / 回显 / 强制失败
#[derive(Debug, Default)]
pub struct MockLlmClient {
    response: Option<String>,
    fail: bool,
    calls: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 固定返回给定响应
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            fail: false,
            calls: AtomicU64::new(0),
        }
    }

    /// 每次调用都返回供应商错误（模拟不可用）
    pub fn failing() -> Self {
        Self {
            response: None,
            fail: true,
            calls: AtomicU64::new(0),
        }
    }

    /// 累计调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if self.fail {
            return Err(LlmError::Api("mock provider unavailable".to_string()));
        }

        if let Some(resp) = &self.response {
            return Ok(resp.clone());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("```\n{}\n```", last_user))
    }
}
