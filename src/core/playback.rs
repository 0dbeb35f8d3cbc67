//! 节奏播放：把一批消息按随机间隔逐条展示，可中断、可恢复
//!
//! 每次播放是一个 PlaybackRun，拥有自己的 CancellationToken 与队列。展示、快照更新与保存
//! 在同一把锁内完成，因此持久化的 displayed + 队列剩余 始终等于 full_set。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::FeedSettings;
use crate::core::FeedEvent;
use crate::feed::{DisplaySink, ParsedMessage, RevealPosition};
use crate::memory::{save_best_effort, ConversationState, PersistenceStore};

/// 待展示队列
#[derive(Debug, Clone, Default)]
pub struct PlaybackQueue {
    pending: VecDeque<ParsedMessage>,
    revealed: usize,
}

impl PlaybackQueue {
    pub fn new(messages: impl IntoIterator<Item = ParsedMessage>) -> Self {
        Self {
            pending: messages.into_iter().collect(),
            revealed: 0,
        }
    }

    pub fn pop_next(&mut self) -> Option<ParsedMessage> {
        let next = self.pending.pop_front();
        if next.is_some() {
            self.revealed += 1;
        }
        next
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// 本次播放已展示的条数
    pub fn revealed(&self) -> usize {
        self.revealed
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// 播放节奏
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub min_wait_secs: f64,
    pub max_wait_secs: f64,
    pub newest_first: bool,
}

impl Pacing {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            min_wait_secs: settings.min_wait_secs,
            max_wait_secs: settings.max_wait_secs,
            newest_first: settings.newest_first,
        }
    }

    /// 测试用：不等待
    pub fn instant(newest_first: bool) -> Self {
        Self {
            min_wait_secs: 0.0,
            max_wait_secs: 0.0,
            newest_first,
        }
    }

    /// [min, max] 内均匀随机
    pub fn next_delay(&self) -> Duration {
        let secs = if self.max_wait_secs > self.min_wait_secs {
            rand::thread_rng().gen_range(self.min_wait_secs..=self.max_wait_secs)
        } else {
            self.min_wait_secs
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn position(&self) -> RevealPosition {
        if self.newest_first {
            RevealPosition::Top
        } else {
            RevealPosition::Bottom
        }
    }
}

struct PlaybackRun {
    id: u64,
    token: CancellationToken,
    queue: PlaybackQueue,
    state: ConversationState,
    pacing: Pacing,
}

struct SchedulerShared {
    conversation_id: String,
    store: Arc<dyn PersistenceStore>,
    sink: Arc<dyn DisplaySink>,
    events: broadcast::Sender<FeedEvent>,
    completions: mpsc::UnboundedSender<()>,
    run: Mutex<Option<PlaybackRun>>,
}

/// 单个会话的播放调度器
pub struct PlaybackScheduler {
    shared: Arc<SchedulerShared>,
    next_run_id: AtomicU64,
}

impl PlaybackScheduler {
    /// 播放自然结束时向 completions 发送一次通知（链式生成用）
    pub fn new(
        conversation_id: impl Into<String>,
        store: Arc<dyn PersistenceStore>,
        sink: Arc<dyn DisplaySink>,
        events: broadcast::Sender<FeedEvent>,
        completions: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                conversation_id: conversation_id.into(),
                store,
                sink,
                events,
                completions,
                run: Mutex::new(None),
            }),
            next_run_id: AtomicU64::new(1),
        }
    }

    /// 播放新生成的一批（state.displayed 为空）
    pub async fn enqueue(&self, state: ConversationState, pacing: Pacing) {
        debug_assert!(state.displayed.is_empty());
        self.start_run(state, pacing).await;
    }

    /// 从持久化状态继续：只排入尚未展示的部分，已展示快照保持原样
    pub async fn resume(&self, state: ConversationState, pacing: Pacing) {
        tracing::info!(
            "[{}] resuming playback: {} shown, {} remaining",
            self.shared.conversation_id,
            state.displayed.len(),
            state.remaining().len()
        );
        self.start_run(state, pacing).await;
    }

    async fn start_run(&self, state: ConversationState, pacing: Pacing) {
        let id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let queue = PlaybackQueue::new(state.remaining());
        {
            let mut slot = self.shared.run.lock().await;
            if let Some(previous) = slot.take() {
                previous.token.cancel();
            }
            *slot = Some(PlaybackRun {
                id,
                token: token.clone(),
                queue,
                state,
                pacing,
            });
        }
        tokio::spawn(reveal_loop(self.shared.clone(), id, token));
    }

    /// 用户显式停止：清空队列并把当前快照标记为结束，之后不会再恢复
    pub async fn stop(&self) -> bool {
        let mut slot = self.shared.run.lock().await;
        let Some(mut run) = slot.take() else {
            return false;
        };
        run.token.cancel();
        run.state.livestream_complete = true;
        run.state.touch();
        save_best_effort(self.shared.store.as_ref(), &run.state).await;
        tracing::info!(
            "[{}] playback stopped with {} unrevealed",
            self.shared.conversation_id,
            run.queue.remaining()
        );
        self.shared.emit_stopped();
        true
    }

    /// 停止计时与队列，不改动已保存的状态（切换会话 / 禁用时使用，重新挂载后可恢复）
    pub async fn halt(&self) -> bool {
        let run = self.shared.run.lock().await.take();
        match run {
            Some(run) => {
                run.token.cancel();
                tracing::debug!("[{}] playback halted", self.shared.conversation_id);
                self.shared.emit_stopped();
                true
            }
            None => false,
        }
    }

    pub async fn is_active(&self) -> bool {
        self.shared.run.lock().await.is_some()
    }

    /// (已展示, 剩余)
    pub async fn progress(&self) -> Option<(usize, usize)> {
        self.shared
            .run
            .lock()
            .await
            .as_ref()
            .map(|run| (run.state.displayed.len(), run.queue.remaining()))
    }
}

impl SchedulerShared {
    fn emit_stopped(&self) {
        let _ = self.events.send(FeedEvent::PlaybackStopped {
            conversation_id: self.conversation_id.clone(),
        });
    }
}

/// 第一条立即展示；每条之后等待随机间隔，最后一条之后的等待结束才算完成
async fn reveal_loop(shared: Arc<SchedulerShared>, run_id: u64, token: CancellationToken) {
    loop {
        let delay = {
            let mut slot = shared.run.lock().await;
            let Some(run) = slot.as_mut().filter(|r| r.id == run_id) else {
                return;
            };
            if token.is_cancelled() {
                return;
            }

            match run.queue.pop_next() {
                Some(message) => {
                    let position = run.pacing.position();
                    match position {
                        RevealPosition::Top => run.state.displayed.insert(0, message.clone()),
                        RevealPosition::Bottom => run.state.displayed.push(message.clone()),
                    }
                    run.state.touch();
                    shared.sink.reveal(&shared.conversation_id, &message, position);
                    save_best_effort(shared.store.as_ref(), &run.state).await;
                    let _ = shared.events.send(FeedEvent::Revealed {
                        conversation_id: shared.conversation_id.clone(),
                        displayed: run.state.displayed.len(),
                        remaining: run.queue.remaining(),
                    });
                    run.pacing.next_delay()
                }
                None => {
                    run.state.livestream_complete = true;
                    run.state.touch();
                    save_best_effort(shared.store.as_ref(), &run.state).await;
                    tracing::info!(
                        "[{}] playback complete ({} revealed)",
                        shared.conversation_id,
                        run.queue.revealed()
                    );
                    *slot = None;
                    let _ = shared.events.send(FeedEvent::PlaybackComplete {
                        conversation_id: shared.conversation_id.clone(),
                    });
                    let _ = shared.completions.send(());
                    return;
                }
            }
        };

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::feed::RecordingSink;
    use crate::memory::MemoryStore;

    fn msg(order: usize) -> ParsedMessage {
        ParsedMessage {
            author: format!("viewer{}", order),
            content: format!("line {}", order),
            order,
        }
    }

    struct Harness {
        scheduler: PlaybackScheduler,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        events: broadcast::Receiver<FeedEvent>,
        completions: mpsc::UnboundedReceiver<()>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let (events_tx, events) = broadcast::channel(64);
        let (done_tx, completions) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new("c1", store.clone(), sink.clone(), events_tx, done_tx);
        Harness {
            scheduler,
            store,
            sink,
            events,
            completions,
        }
    }

    async fn wait_for(events: &mut broadcast::Receiver<FeedEvent>, f: impl Fn(&FeedEvent) -> bool) {
        loop {
            let event = events.recv().await.unwrap();
            if f(&event) {
                return;
            }
        }
    }

    #[test]
    fn test_queue_accounting() {
        let mut queue = PlaybackQueue::new((0..3).map(msg));
        assert_eq!(queue.pop_next(), Some(msg(0)));
        assert_eq!(queue.revealed() + queue.remaining(), 3);
        queue.pop_next();
        queue.pop_next();
        assert!(queue.pop_next().is_none());
        assert_eq!(queue.revealed(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_delay_within_bounds() {
        let pacing = Pacing {
            min_wait_secs: 0.5,
            max_wait_secs: 1.5,
            newest_first: true,
        };
        for _ in 0..50 {
            let d = pacing.next_delay();
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
        assert_eq!(Pacing::instant(true).next_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_plays_full_batch_to_completion() {
        let mut h = harness();
        let state = ConversationState::pending("c1", (0..5).map(msg).collect(), BTreeMap::new());
        h.scheduler.enqueue(state, Pacing::instant(true)).await;

        wait_for(&mut h.events, |e| matches!(e, FeedEvent::PlaybackComplete { .. })).await;
        assert!(h.completions.recv().await.is_some());
        assert!(!h.scheduler.is_active().await);

        let saved = h.store.load("c1").await.unwrap().unwrap();
        assert!(saved.livestream_complete);
        assert_eq!(saved.displayed.len(), 5);
        assert!(saved.remaining().is_empty());
        // 最新在前
        assert_eq!(saved.displayed[0], msg(4));
        assert_eq!(h.sink.snapshot().visible, saved.displayed);
    }

    #[tokio::test]
    async fn test_resume_reveals_only_remaining() {
        let mut h = harness();
        let mut state = ConversationState::pending("c1", (0..10).map(msg).collect(), BTreeMap::new());
        state.displayed = vec![msg(0), msg(1), msg(2), msg(3)];
        h.scheduler.resume(state, Pacing::instant(false)).await;

        wait_for(&mut h.events, |e| matches!(e, FeedEvent::PlaybackComplete { .. })).await;
        let reveals = h.sink.snapshot().reveals;
        assert_eq!(reveals, (4..10).map(msg).collect::<Vec<_>>());

        let saved = h.store.load("c1").await.unwrap().unwrap();
        assert_eq!(saved.displayed, (0..10).map(msg).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stop_empties_queue_and_finalizes() {
        let mut h = harness();
        let state = ConversationState::pending("c1", (0..5).map(msg).collect(), BTreeMap::new());
        let slow = Pacing {
            min_wait_secs: 60.0,
            max_wait_secs: 60.0,
            newest_first: true,
        };
        h.scheduler.enqueue(state, slow).await;
        wait_for(&mut h.events, |e| matches!(e, FeedEvent::Revealed { .. })).await;
        assert_eq!(h.scheduler.progress().await, Some((1, 4)));

        assert!(h.scheduler.stop().await);
        assert!(!h.scheduler.is_active().await);
        assert!(!h.scheduler.stop().await);

        let saved = h.store.load("c1").await.unwrap().unwrap();
        assert!(saved.livestream_complete);
        assert_eq!(saved.displayed.len(), 1);
        assert_eq!(h.sink.snapshot().reveals.len(), 1);
    }

    #[tokio::test]
    async fn test_halt_keeps_state_resumable() {
        let mut h = harness();
        let state = ConversationState::pending("c1", (0..3).map(msg).collect(), BTreeMap::new());
        let slow = Pacing {
            min_wait_secs: 60.0,
            max_wait_secs: 60.0,
            newest_first: false,
        };
        h.scheduler.enqueue(state, slow).await;
        wait_for(&mut h.events, |e| matches!(e, FeedEvent::Revealed { .. })).await;

        assert!(h.scheduler.halt().await);
        let saved = h.store.load("c1").await.unwrap().unwrap();
        assert!(saved.needs_resume());
        assert_eq!(saved.remaining(), vec![msg(1), msg(2)]);
        assert!(h.completions.try_recv().is_err());
    }
}
