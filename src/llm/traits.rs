//! 后端适配器抽象
//!
//! 所有后端（Profile 路由服务 / 本地 HTTP 服务 / OpenAI 兼容端点）实现 BackendAdapter：
//! 发送已准备好的消息列表，返回未归一化的原始响应（RawResponse）。具体网络实现由宿主提供。

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::memory::Message;

/// 后端返回的原始响应，形状在归一化之前未知
pub type RawResponse = serde_json::Value;

/// 后端调用失败的类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}

/// 后端适配器 trait：send(messages, max_tokens, token) -> RawResponse
///
/// 实现方若支持中止，应在 token 被取消时尽快返回 `BackendError::Cancelled`；
/// 不支持中止的实现也无妨，GenerationJob 会在 await 点丢弃该调用并抑制其结果。
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn send(
        &self,
        messages: &[Message],
        max_tokens: u32,
        token: CancellationToken,
    ) -> Result<RawResponse, BackendError>;

    /// 后端名称（用于日志）
    fn name(&self) -> &str {
        "backend"
    }
}
