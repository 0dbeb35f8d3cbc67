//! 反应流集成测试：通过公开 API 驱动会话切换、节奏播放恢复与持久化

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chorus::config::{FeedSettings, PlaybackMode};
    use chorus::core::{
        CancelReason, FeedDeps, FeedEvent, FeedHub, JobOutcome, StartOutcome, Trigger,
    };
    use chorus::feed::{RecordingSink, StatusNotice};
    use chorus::llm::{BackendAdapter, BackendError, MockBackend, RawResponse};
    use chorus::memory::{ChatTurn, JsonFileStore, MemoryStore, Message, PersistenceStore};
    use serde_json::json;
    use tokio::sync::broadcast;
    use tokio_util::sync::CancellationToken;

    /// 按顺序返回预设文本
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl BackendAdapter for ScriptedBackend {
        async fn send(
            &self,
            _messages: &[Message],
            _max_tokens: u32,
            _token: CancellationToken,
        ) -> Result<RawResponse, BackendError> {
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(text) => Ok(json!({ "choices": [{ "message": { "content": text } }] })),
                None => Err(BackendError::Http {
                    status: 429,
                    message: "script exhausted".into(),
                }),
            }
        }
    }

    const SIX: &str = "<think>plan the crowd</think>\n\
        Ann: first one here\n\
        Ben: the plot thickens\n\
        Cat: <b>no way</b>\n\
        Dan: called it\n\
        Eve: rewind please\n\
        Fay: this scene though";

    fn paced(wait_secs: f64) -> FeedSettings {
        let mut settings = FeedSettings::default();
        settings.mode = PlaybackMode::PacedManual;
        settings.batch_size = 6;
        settings.min_wait_secs = wait_secs;
        settings.max_wait_secs = wait_secs;
        settings.newest_first = false;
        settings
    }

    async fn wait_for(events: &mut broadcast::Receiver<FeedEvent>, f: impl Fn(&FeedEvent) -> bool) {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if f(&event) {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_immediate_feed_restored_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());

        {
            let store = Arc::new(JsonFileStore::new(dir.path()));
            let deps = FeedDeps::new(Arc::new(ScriptedBackend::new(&[SIX])), store, sink.clone());
            let mut events = deps.subscribe();
            let mut hub = FeedHub::new(deps, FeedSettings::default(), 100);
            let session = hub.switch_to("chat-1", vec![ChatTurn::user("a storm rolls in")]).await;
            assert!(matches!(session.start(Trigger::Manual).await, StartOutcome::Started(_)));
            wait_for(&mut events, |e| matches!(e, FeedEvent::JobFinished { .. })).await;
            hub.detach().await;
        }

        let shown = sink.snapshot().visible;
        // 默认 message_count = 5，多出的一条被截断；标记已剥离
        assert_eq!(shown.len(), 5);
        assert_eq!(shown[2].content, "no way");

        let restarted = Arc::new(RecordingSink::new());
        let store = Arc::new(JsonFileStore::new(dir.path()));
        let deps = FeedDeps::new(Arc::new(MockBackend::new()), store.clone(), restarted.clone());
        let mut hub = FeedHub::new(deps, FeedSettings::default(), 100);
        hub.switch_to("chat-1", Vec::new()).await;

        assert_eq!(restarted.snapshot().visible, shown);
        let saved = store.load("chat-1").await.unwrap().unwrap();
        assert!(saved.livestream_complete);
        assert_eq!(saved.commentaries.len(), 1);
        assert!(!saved.commentaries[&0].contains("<think>"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_playback_resumes_after_switching_back() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let deps = FeedDeps::new(Arc::new(ScriptedBackend::new(&[SIX])), store.clone(), sink.clone());
        let mut events = deps.subscribe();
        let mut hub = FeedHub::new(deps, paced(30.0), 100);

        let session = hub.switch_to("a", vec![ChatTurn::user("hello")]).await;
        session.start(Trigger::Manual).await;
        wait_for(&mut events, |e| matches!(e, FeedEvent::Revealed { displayed: 2, .. })).await;

        hub.switch_to("b", Vec::new()).await;
        let paused = store.load("a").await.unwrap().unwrap();
        assert!(!paused.livestream_complete);
        assert!(paused.displayed.len() >= 2);
        assert_eq!(paused.displayed.len() + paused.remaining().len(), 6);
        let already_shown = paused.displayed.len();

        let before = sink.snapshot().reveals.len();
        hub.switch_to("a", vec![ChatTurn::user("hello")]).await;
        wait_for(&mut events, |e| matches!(e, FeedEvent::PlaybackComplete { .. })).await;

        let recorded = sink.snapshot();
        assert_eq!(recorded.reveals.len() - before, 6 - already_shown);
        let done = store.load("a").await.unwrap().unwrap();
        assert!(done.livestream_complete);
        assert_eq!(done.displayed, done.full_set);
        assert_eq!(recorded.visible, done.full_set);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_deferred_while_playing_then_stop() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let deps = FeedDeps::new(Arc::new(ScriptedBackend::new(&[SIX, SIX])), store.clone(), sink.clone());
        let mut events = deps.subscribe();
        let mut hub = FeedHub::new(deps, paced(10.0), 100);

        let session = hub.switch_to("a", vec![ChatTurn::user("hello")]).await;
        session.start(Trigger::Manual).await;
        wait_for(&mut events, |e| matches!(e, FeedEvent::Revealed { .. })).await;

        assert_eq!(session.start(Trigger::Manual).await, StartOutcome::Deferred);
        assert!(session.stop_playback().await);
        wait_for(&mut events, |e| matches!(e, FeedEvent::PlaybackStopped { .. })).await;
        assert!(!session.is_playing().await);

        // 停止后的快照不会在重新挂载时恢复播放
        let stopped = store.load("a").await.unwrap().unwrap();
        assert!(stopped.livestream_complete);
        hub.switch_to("b", Vec::new()).await;
        hub.switch_to("a", Vec::new()).await;
        assert!(!hub.current().unwrap().is_playing().await);
        assert_eq!(sink.snapshot().visible, stopped.displayed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_generation_supersedes_slow_one() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let backend = MockBackend::new().with_latency(Duration::from_secs(10));
        let deps = FeedDeps::new(Arc::new(backend), store.clone(), sink.clone());
        let mut events = deps.subscribe();
        let mut hub = FeedHub::new(deps, FeedSettings::default(), 100);

        let session = hub.switch_to("a", vec![ChatTurn::user("hello")]).await;
        let StartOutcome::Started(first) = session.start(Trigger::Manual).await else {
            panic!("first start skipped");
        };
        let StartOutcome::Started(second) = session.start(Trigger::Manual).await else {
            panic!("second start skipped");
        };

        let mut outcomes = Vec::new();
        while outcomes.len() < 2 {
            if let FeedEvent::JobFinished { job_id, outcome, .. } = events.recv().await.unwrap() {
                outcomes.push((job_id, outcome));
            }
        }
        assert_eq!(outcomes[0], (first, JobOutcome::Cancelled(CancelReason::Superseded)));
        assert_eq!(outcomes[1], (second, JobOutcome::Succeeded { count: 5 }));

        let recorded = sink.snapshot();
        assert_eq!(recorded.batches, 1);
        assert_eq!(
            recorded.notices,
            vec![StatusNotice::Generating, StatusNotice::Generating, StatusNotice::Finished]
        );
    }

    #[tokio::test]
    async fn test_backend_failure_reported_and_reset_clears() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let deps = FeedDeps::new(Arc::new(ScriptedBackend::new(&[SIX])), store.clone(), sink.clone());
        let mut events = deps.subscribe();
        let mut hub = FeedHub::new(deps, FeedSettings::default(), 100);

        let session = hub.switch_to("a", vec![ChatTurn::user("hello")]).await;
        session.start(Trigger::Manual).await;
        wait_for(&mut events, |e| matches!(e, FeedEvent::JobFinished { .. })).await;
        session.start(Trigger::Manual).await;
        wait_for(&mut events, |e| matches!(e, FeedEvent::JobFinished { .. })).await;

        let recorded = sink.snapshot();
        assert_eq!(recorded.visible.len(), 5);
        assert_eq!(
            recorded.notices.last(),
            Some(&StatusNotice::Failed("HTTP 429: script exhausted".into()))
        );

        session.reset().await.unwrap();
        assert!(sink.snapshot().visible.is_empty());
        assert!(store.load("a").await.unwrap().is_none());
    }
}
