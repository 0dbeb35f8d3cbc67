//! 会话切换：同一时刻只挂载一个会话
//!
//! 切换时旧会话的生成被取消（ConversationSwitch）、播放计时被停止，但持久化状态不动；
//! 新会话挂载时从自己的持久化状态恢复。

use tokio::sync::broadcast;

use crate::config::FeedSettings;
use crate::core::session::{ConversationSession, FeedDeps};
use crate::core::FeedEvent;
use crate::memory::{ChatTurn, StoreError, Transcript};

pub struct FeedHub {
    deps: FeedDeps,
    settings: FeedSettings,
    max_turns: usize,
    current: Option<ConversationSession>,
}

impl FeedHub {
    pub fn new(deps: FeedDeps, settings: FeedSettings, max_turns: usize) -> Self {
        Self {
            deps,
            settings,
            max_turns,
            current: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.deps.subscribe()
    }

    pub fn current(&self) -> Option<&ConversationSession> {
        self.current.as_ref()
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// 切换到指定会话，history 为宿主当前的对话记录；切到当前会话时什么也不做
    pub async fn switch_to(
        &mut self,
        conversation_id: &str,
        history: Vec<ChatTurn>,
    ) -> ConversationSession {
        if let Some(session) = self
            .current
            .as_ref()
            .filter(|s| s.conversation_id() == conversation_id)
        {
            return session.clone();
        }

        self.detach().await;
        let mut transcript = Transcript::new(self.max_turns);
        for turn in history {
            transcript.push(turn);
        }
        tracing::info!("Switching feed to conversation {}", conversation_id);
        let session = ConversationSession::attach(
            self.deps.clone(),
            conversation_id,
            self.settings.clone(),
            transcript,
        )
        .await;
        self.current = Some(session.clone());
        session
    }

    pub async fn detach(&mut self) {
        if let Some(session) = self.current.take() {
            session.detach().await;
        }
    }

    /// 删除会话的持久化状态；若正是当前会话则先卸载
    pub async fn delete(&mut self, conversation_id: &str) -> Result<(), StoreError> {
        if self
            .current
            .as_ref()
            .is_some_and(|s| s.conversation_id() == conversation_id)
        {
            self.detach().await;
            self.deps.sink.clear(conversation_id);
        }
        tracing::info!("Deleting feed state for {}", conversation_id);
        self.deps.store.clear(conversation_id).await
    }

    /// 新设置对之后挂载的会话与当前会话同时生效
    pub async fn update_settings(&mut self, settings: FeedSettings) {
        self.settings = settings.clone();
        if let Some(session) = &self.current {
            session.update_settings(settings).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::feed::{ParsedMessage, RecordingSink};
    use crate::llm::MockBackend;
    use crate::memory::{ConversationState, MemoryStore, PersistenceStore};

    fn msg(author: &str) -> ParsedMessage {
        ParsedMessage {
            author: author.to_string(),
            content: "hello there".to_string(),
            order: 0,
        }
    }

    #[tokio::test]
    async fn test_switch_restores_each_conversation() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        store
            .save("a", &ConversationState::shown("a", vec![msg("Ann")], Default::default()))
            .await
            .unwrap();

        let deps = FeedDeps::new(Arc::new(MockBackend::new()), store.clone(), sink.clone());
        let mut hub = FeedHub::new(deps, FeedSettings::default(), 50);

        hub.switch_to("a", vec![ChatTurn::user("hi")]).await;
        assert_eq!(sink.snapshot().visible, vec![msg("Ann")]);

        let session = hub.switch_to("b", Vec::new()).await;
        assert_eq!(session.conversation_id(), "b");
        assert!(sink.snapshot().visible.is_empty());

        hub.delete("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
        assert_eq!(hub.current().map(|s| s.conversation_id()), Some("b"));

        hub.delete("b").await.unwrap();
        assert!(hub.current().is_none());
    }
}
