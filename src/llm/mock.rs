//! Mock 后端（用于本地运行与测试，无需网络）
//!
//! 从最后一条 User 指令中读出「EXACTLY N」，按固定名单生成 N 条 `名字: 内容` 形式的反应消息，
//! 以 OpenAI choices 形状返回，便于跑通归一化与解析流程。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::llm::{BackendAdapter, BackendError, RawResponse};
use crate::memory::{Message, Role};

const ROSTER: &[&str] = &["pixelpanda", "NightOwl", "grumpy_cat", "Luna", "dev_null", "Sunny"];
const LINES: &[&str] = &[
    "did not see that coming",
    "this is getting good",
    "wait, rewind that",
    "LMAO",
    "called it three turns ago",
    "okay but why is nobody talking about the ending",
    "chat is this real",
    "the tension right now",
];

static COUNT_RE: OnceLock<Regex> = OnceLock::new();

/// Mock 后端：可选模拟延迟，延迟期间响应取消
#[derive(Debug, Default, Clone)]
pub struct MockBackend {
    latency: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn requested_count(messages: &[Message]) -> usize {
        let re = COUNT_RE.get_or_init(|| Regex::new(r"EXACTLY (\d+)").unwrap());
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| re.captures(&m.content))
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(5)
    }
}

#[async_trait]
impl BackendAdapter for MockBackend {
    async fn send(
        &self,
        messages: &[Message],
        _max_tokens: u32,
        token: CancellationToken,
    ) -> Result<RawResponse, BackendError> {
        if let Some(latency) = self.latency {
            tokio::select! {
                _ = token.cancelled() => return Err(BackendError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        let count = Self::requested_count(messages);
        let seed = messages.iter().map(|m| m.content.len()).sum::<usize>();
        let body: Vec<String> = (0..count)
            .map(|i| {
                let name = ROSTER[(seed + i) % ROSTER.len()];
                let line = LINES[(seed / 3 + i * 5) % LINES.len()];
                format!("{}: {}", name, line)
            })
            .collect();

        Ok(json!({
            "choices": [{ "message": { "role": "assistant", "content": body.join("\n") } }]
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
