//! 生成任务：准备好的请求 → 后端调用 → 归一化 → 解析
//!
//! 每个任务持有独立的 CancellationToken。token 被取消时后端调用在 await 点被丢弃（若后端支持中止，
//! 它也会收到同一个 token）；结果是否应用由会话在持锁状态下再检查一次 token 决定。

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::{FeedError, JobId, JobState};
use crate::feed::{clean_text, parse_messages, GenerationRequest, ParsedMessage};
use crate::llm::{extract_text, BackendAdapter, BackendError};

/// 一次成功生成的产物
#[derive(Debug, Clone)]
pub struct GeneratedBatch {
    pub messages: Vec<ParsedMessage>,
    /// 清理后的原文，记入 commentaries
    pub raw_text: String,
}

/// 单次生成任务
pub struct GenerationJob {
    id: JobId,
    conversation_id: String,
    state: JobState,
    token: CancellationToken,
    request: GenerationRequest,
    backend: Arc<dyn BackendAdapter>,
    state_tx: Option<Arc<watch::Sender<JobState>>>,
}

impl GenerationJob {
    /// 创建任务，进入 Preparing
    pub fn new(
        id: JobId,
        conversation_id: impl Into<String>,
        request: GenerationRequest,
        backend: Arc<dyn BackendAdapter>,
        token: CancellationToken,
    ) -> Self {
        let mut job = Self {
            id,
            conversation_id: conversation_id.into(),
            state: JobState::Idle,
            token,
            request,
            backend,
            state_tx: None,
        };
        job.advance(JobState::Preparing);
        job
    }

    /// 状态变化同时推送到 watch 通道
    pub fn with_state_channel(mut self, tx: Arc<watch::Sender<JobState>>) -> Self {
        tx.send_replace(self.state.clone());
        self.state_tx = Some(tx);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn requested_count(&self) -> usize {
        self.request.requested_count
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn advance(&mut self, next: JobState) {
        if !self.state.can_transition_to(&next) {
            tracing::warn!(
                "[{}#{}] ignoring invalid transition {:?} -> {:?}",
                self.conversation_id,
                self.id,
                self.state,
                next
            );
            return;
        }
        tracing::debug!("[{}#{}] {:?} -> {:?}", self.conversation_id, self.id, self.state, next);
        self.state = next;
        if let Some(tx) = &self.state_tx {
            tx.send_replace(self.state.clone());
        }
    }

    /// 执行任务直到终态
    ///
    /// 提取失败与解析为空都返回空结果类错误，由调用方展示为「未生成任何内容」。
    pub async fn execute(&mut self) -> Result<GeneratedBatch, FeedError> {
        if self.token.is_cancelled() {
            self.advance(JobState::Cancelled);
            return Err(FeedError::Cancelled);
        }

        self.advance(JobState::InFlight);
        tracing::info!(
            "[{}#{}] sending {} messages to {} (max_tokens {}, requesting {})",
            self.conversation_id,
            self.id,
            self.request.messages.len(),
            self.backend.name(),
            self.request.max_tokens,
            self.request.requested_count
        );

        let token = self.token.clone();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => Err(BackendError::Cancelled),
            r = self.backend.send(&self.request.messages, self.request.max_tokens, token.clone()) => r,
        };

        let raw = match response {
            Ok(raw) if !self.token.is_cancelled() => raw,
            Ok(_) => {
                self.advance(JobState::Cancelled);
                return Err(FeedError::Cancelled);
            }
            Err(e) if e.is_cancelled() || self.token.is_cancelled() => {
                self.advance(JobState::Cancelled);
                return Err(FeedError::Cancelled);
            }
            Err(e) => {
                tracing::warn!("[{}#{}] backend failed: {}", self.conversation_id, self.id, e);
                self.advance(JobState::Failed(e.to_string()));
                return Err(e.into());
            }
        };

        // 后端调用本身成功；空结果也走 Succeeded，由 JobOutcome::Empty 区分
        self.advance(JobState::Succeeded);

        let text = extract_text(&raw).map_err(|e| {
            tracing::warn!("[{}#{}] {}: {}", self.conversation_id, self.id, e, raw);
            FeedError::from(e)
        })?;

        let messages = parse_messages(&text, self.request.requested_count);
        tracing::info!(
            "[{}#{}] parsed {}/{} messages",
            self.conversation_id,
            self.id,
            messages.len(),
            self.request.requested_count
        );
        if messages.is_empty() {
            return Err(FeedError::ParseEmpty);
        }

        Ok(GeneratedBatch {
            messages,
            raw_text: clean_text(&text),
        })
    }
}
