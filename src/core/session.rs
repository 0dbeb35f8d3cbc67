//! 会话：单个宿主对话的生成与播放协调
//!
//! 同一会话任意时刻最多一个活跃生成任务。新的 start 先取消旧任务并等待它结束（有上限，
//! 超时则 abort）。取消与结果应用都在 core 锁内完成：已被取消的任务的结果不会写入展示端或存储。
//!
//! 锁顺序：start_gate → core → 播放调度器内部锁。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{FeedSettings, PlaybackMode};
use crate::core::job::{GeneratedBatch, GenerationJob};
use crate::core::playback::{Pacing, PlaybackScheduler};
use crate::core::{
    CancelReason, FeedError, FeedEvent, JobId, JobOutcome, JobState, SkipReason, StartOutcome,
    Trigger,
};
use crate::feed::{build_request, DisplaySink, PromptExtras, StatusNotice, StyleLibrary};
use crate::llm::BackendAdapter;
use crate::memory::{save_best_effort, ChatTurn, ConversationState, PersistenceStore, StoreError, Transcript};

/// 新任务等待被取代任务结束的上限
pub const SUPERSEDE_WAIT: Duration = Duration::from_millis(500);

const EVENT_CAPACITY: usize = 256;

/// 会话共享的外部依赖
#[derive(Clone)]
pub struct FeedDeps {
    pub backend: Arc<dyn BackendAdapter>,
    pub store: Arc<dyn PersistenceStore>,
    pub sink: Arc<dyn DisplaySink>,
    pub styles: Arc<StyleLibrary>,
    pub events: broadcast::Sender<FeedEvent>,
}

impl FeedDeps {
    pub fn new(
        backend: Arc<dyn BackendAdapter>,
        store: Arc<dyn PersistenceStore>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            backend,
            store,
            sink,
            styles: Arc::new(StyleLibrary::new()),
            events,
        }
    }

    pub fn with_styles(mut self, styles: StyleLibrary) -> Self {
        self.styles = Arc::new(styles);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }
}

struct ActiveJob {
    id: JobId,
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
    handle: JoinHandle<()>,
}

impl ActiveJob {
    /// 只记录第一次的取消原因
    fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    async fn wait(self, limit: Duration) {
        let ActiveJob { id, mut handle, .. } = self;
        if tokio::time::timeout(limit, &mut handle).await.is_err() {
            tracing::warn!("job #{} did not stop within {:?}, aborting", id, limit);
            handle.abort();
            let _ = handle.await;
        }
    }
}

struct SessionCore {
    transcript: Transcript,
    commentaries: BTreeMap<usize, String>,
    job: Option<ActiveJob>,
    /// 新消息去抖
    pending_input: Option<CancellationToken>,
}

struct SessionInner {
    conversation_id: String,
    deps: FeedDeps,
    settings: RwLock<FeedSettings>,
    extras: RwLock<PromptExtras>,
    start_gate: Mutex<()>,
    core: Mutex<SessionCore>,
    scheduler: PlaybackScheduler,
    job_state: Arc<watch::Sender<JobState>>,
    /// detach 时取消：所有任务 token 与去抖 token 都是它的子 token
    lifetime: CancellationToken,
    next_job_id: AtomicU64,
}

/// 已挂载的会话句柄（克隆共享同一会话）
#[derive(Clone)]
pub struct ConversationSession {
    inner: Arc<SessionInner>,
}

/// 新消息触发是否被当前模式接受
fn accepts_new_input(settings: &FeedSettings) -> bool {
    match settings.mode {
        PlaybackMode::Immediate => settings.auto_update_on_messages,
        PlaybackMode::PacedChainOnNewInput => true,
        PlaybackMode::PacedManual | PlaybackMode::PacedChainOnCompletion => false,
    }
}

fn gate(settings: &FeedSettings, trigger: Trigger) -> Option<SkipReason> {
    if !settings.enabled {
        Some(SkipReason::Disabled)
    } else if settings.paused {
        Some(SkipReason::Paused)
    } else if trigger == Trigger::NewInput && !accepts_new_input(settings) {
        Some(SkipReason::ModeIgnoresTrigger)
    } else if trigger == Trigger::Chain && settings.mode != PlaybackMode::PacedChainOnCompletion {
        Some(SkipReason::ModeIgnoresTrigger)
    } else {
        None
    }
}

impl ConversationSession {
    /// 挂载会话：加载持久化状态，恢复展示；节奏模式下未播完的批次从断点继续
    pub async fn attach(
        deps: FeedDeps,
        conversation_id: impl Into<String>,
        settings: FeedSettings,
        transcript: Transcript,
    ) -> Self {
        let conversation_id = conversation_id.into();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(
            conversation_id.clone(),
            deps.store.clone(),
            deps.sink.clone(),
            deps.events.clone(),
            done_tx,
        );
        let (job_state, _) = watch::channel(JobState::Idle);

        let session = Self {
            inner: Arc::new(SessionInner {
                conversation_id,
                deps,
                settings: RwLock::new(settings),
                extras: RwLock::new(PromptExtras::default()),
                start_gate: Mutex::new(()),
                core: Mutex::new(SessionCore {
                    transcript,
                    commentaries: BTreeMap::new(),
                    job: None,
                    pending_input: None,
                }),
                scheduler,
                job_state: Arc::new(job_state),
                lifetime: CancellationToken::new(),
                next_job_id: AtomicU64::new(1),
            }),
        };
        session.spawn_chain_listener(done_rx);
        session.restore().await;
        session
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    async fn restore(&self) {
        let inner = &self.inner;
        let id = inner.conversation_id.as_str();
        let sink = &inner.deps.sink;

        let state = match inner.deps.store.load(id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("[{}] failed to load saved state: {}", id, e);
                None
            }
        };
        let Some(state) = state else {
            sink.clear(id);
            return;
        };

        inner.core.lock().await.commentaries = state.commentaries.clone();
        let settings = inner.settings.read().await.clone();

        if settings.enabled && settings.mode.is_paced() && state.needs_resume() {
            sink.restore(id, &state.displayed);
            inner
                .scheduler
                .resume(state, Pacing::from_settings(&settings))
                .await;
        } else if state.displayed.is_empty() {
            sink.restore(id, &state.full_set);
        } else {
            sink.restore(id, &state.displayed);
        }
    }

    fn spawn_chain_listener(&self, mut done: mpsc::UnboundedReceiver<()>) {
        let session = self.clone();
        let lifetime = self.inner.lifetime.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = lifetime.cancelled() => break,
                    next = done.recv() => {
                        if next.is_none() {
                            break;
                        }
                        let outcome = session.start(Trigger::Chain).await;
                        tracing::debug!("[{}] chain trigger: {:?}", session.conversation_id(), outcome);
                    }
                }
            }
        });
    }

    /// 启动一次生成
    ///
    /// 外部触发在播放进行中被延后；链式触发不受限制。批次入队在 core 锁内完成，
    /// 所以持 core 锁后再检查一次。
    pub async fn start(&self, trigger: Trigger) -> StartOutcome {
        let inner = &self.inner;
        let id = inner.conversation_id.as_str();
        if inner.lifetime.is_cancelled() {
            return StartOutcome::Skipped(SkipReason::Detached);
        }

        let settings = inner.settings.read().await.clone();
        if let Some(reason) = gate(&settings, trigger) {
            tracing::debug!("[{}] {:?} trigger skipped: {:?}", id, trigger, reason);
            return StartOutcome::Skipped(reason);
        }
        if trigger.is_external() && inner.scheduler.is_active().await {
            tracing::info!("[{}] playback in progress, deferring {:?} trigger", id, trigger);
            return StartOutcome::Deferred;
        }
        if inner.core.lock().await.transcript.is_empty() {
            return StartOutcome::Skipped(SkipReason::EmptyTranscript);
        }

        let _gate = inner.start_gate.lock().await;
        if let Some(previous) = self.interrupt(CancelReason::Superseded).await {
            tracing::debug!("[{}] superseding job #{}", id, previous.id);
            previous.wait(SUPERSEDE_WAIT).await;
        }
        if inner.lifetime.is_cancelled() {
            return StartOutcome::Skipped(SkipReason::Detached);
        }

        let settings = inner.settings.read().await.clone();
        let extras = inner.extras.read().await.clone();
        let style = inner.deps.styles.resolve(&settings.style);

        // 上一个任务可能刚在 core 锁内把批次交给播放调度器
        let mut core = inner.core.lock().await;
        if trigger.is_external() && inner.scheduler.is_active().await {
            tracing::info!("[{}] playback started meanwhile, deferring {:?} trigger", id, trigger);
            return StartOutcome::Deferred;
        }
        let request = build_request(&settings, &style, &core.transcript, &core.commentaries, &extras);
        let commentary_index = core.transcript.last_index();
        let job_id = inner.next_job_id.fetch_add(1, Ordering::Relaxed);
        let token = inner.lifetime.child_token();
        let reason = Arc::new(OnceLock::new());

        let job = GenerationJob::new(job_id, id, request, inner.deps.backend.clone(), token.clone())
            .with_state_channel(inner.job_state.clone());
        inner.deps.sink.status(id, StatusNotice::Generating);
        tracing::info!(
            "[{}] job #{} started ({:?}, style {}, mode {:?})",
            id,
            job_id,
            trigger,
            style.id,
            settings.mode
        );

        let handle = tokio::spawn(self.clone().run_job(job, reason.clone(), commentary_index));
        core.job = Some(ActiveJob {
            id: job_id,
            token,
            reason,
            handle,
        });
        StartOutcome::Started(job_id)
    }

    async fn run_job(
        self,
        mut job: GenerationJob,
        reason: Arc<OnceLock<CancelReason>>,
        commentary_index: Option<usize>,
    ) {
        let result = job.execute().await;
        self.finish_job(&job, &reason, result, commentary_index).await;
    }

    /// 任务结束：在 core 锁内再检查一次 token，再决定是否应用结果
    async fn finish_job(
        &self,
        job: &GenerationJob,
        reason: &OnceLock<CancelReason>,
        result: Result<GeneratedBatch, FeedError>,
        commentary_index: Option<usize>,
    ) -> JobOutcome {
        let inner = &self.inner;
        let id = inner.conversation_id.as_str();
        let sink = &inner.deps.sink;
        let cancelled = || JobOutcome::Cancelled(reason.get().copied().unwrap_or(CancelReason::User));

        let mut core = inner.core.lock().await;
        let outcome = if job.token().is_cancelled() {
            cancelled()
        } else {
            match result {
                Ok(batch) => self.apply_batch(&mut core, batch, commentary_index).await,
                Err(FeedError::Cancelled) => cancelled(),
                Err(e) if e.is_empty_result() => JobOutcome::Empty,
                Err(e) => JobOutcome::Failed(e.to_string()),
            }
        };

        match &outcome {
            JobOutcome::Succeeded { .. } => sink.status(id, StatusNotice::Finished),
            JobOutcome::Empty => sink.status(id, StatusNotice::NothingGenerated),
            JobOutcome::Cancelled(CancelReason::User) => sink.status(id, StatusNotice::Cancelled),
            JobOutcome::Cancelled(_) => {}
            JobOutcome::Failed(msg) => sink.status(id, StatusNotice::Failed(msg.clone())),
        }

        if core.job.as_ref().map(|j| j.id) == Some(job.id()) {
            core.job = None;
        }
        if core.job.is_none() {
            inner.job_state.send_replace(JobState::Idle);
        }
        drop(core);

        tracing::info!("[{}] job #{} finished: {:?}", id, job.id(), outcome);
        let _ = inner.deps.events.send(FeedEvent::JobFinished {
            conversation_id: id.to_string(),
            job_id: job.id(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn apply_batch(
        &self,
        core: &mut SessionCore,
        batch: GeneratedBatch,
        commentary_index: Option<usize>,
    ) -> JobOutcome {
        let inner = &self.inner;
        let id = inner.conversation_id.as_str();
        let count = batch.messages.len();
        if let Some(idx) = commentary_index {
            core.commentaries.insert(idx, batch.raw_text);
        }

        let settings = inner.settings.read().await.clone();
        if settings.mode.is_paced() {
            let state = ConversationState::pending(id, batch.messages, core.commentaries.clone());
            save_best_effort(inner.deps.store.as_ref(), &state).await;
            inner.deps.sink.clear(id);
            inner
                .scheduler
                .enqueue(state, Pacing::from_settings(&settings))
                .await;
        } else {
            inner.deps.sink.show_batch(id, &batch.messages);
            let state = ConversationState::shown(id, batch.messages, core.commentaries.clone());
            save_best_effort(inner.deps.store.as_ref(), &state).await;
        }
        JobOutcome::Succeeded { count }
    }

    /// 取下当前任务并标记取消，同时放弃待触发的去抖
    async fn interrupt(&self, reason: CancelReason) -> Option<ActiveJob> {
        let mut core = self.inner.core.lock().await;
        if let Some(pending) = core.pending_input.take() {
            pending.cancel();
        }
        let job = core.job.take();
        if let Some(job) = &job {
            job.cancel(reason);
        }
        job
    }

    /// 用户取消当前生成；空闲时什么也不做
    pub async fn cancel(&self) -> bool {
        let mut core = self.inner.core.lock().await;
        if let Some(pending) = core.pending_input.take() {
            pending.cancel();
        }
        match &core.job {
            Some(job) => {
                tracing::info!("[{}] cancelling job #{}", self.inner.conversation_id, job.id);
                job.cancel(CancelReason::User);
                true
            }
            None => false,
        }
    }

    /// 用户停止播放：清空队列，已展示的内容保留
    pub async fn stop_playback(&self) -> bool {
        self.inner.scheduler.stop().await
    }

    /// 记录一条宿主对话轮次（不触发生成）
    pub async fn record_turn(&self, turn: ChatTurn) {
        self.inner.core.lock().await.transcript.push(turn);
    }

    /// 宿主出现新消息：记录并按模式决定是否（去抖后）生成
    pub async fn on_new_input(&self, turn: ChatTurn) -> bool {
        let hidden = turn.hidden;
        self.record_turn(turn).await;
        if hidden {
            return false;
        }

        let settings = self.inner.settings.read().await.clone();
        if gate(&settings, Trigger::NewInput).is_some() {
            return false;
        }
        if self.inner.scheduler.is_active().await {
            tracing::debug!("[{}] playback in progress, ignoring new input", self.inner.conversation_id);
            return false;
        }
        self.schedule_debounced(Duration::from_millis(settings.debounce_ms))
            .await;
        true
    }

    /// 后到的输入会取消尚未触发的那次
    async fn schedule_debounced(&self, delay: Duration) {
        let token = self.inner.lifetime.child_token();
        if let Some(previous) = self.inner.core.lock().await.pending_input.replace(token.clone()) {
            previous.cancel();
        }
        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let outcome = session.start(Trigger::NewInput).await;
            tracing::debug!("[{}] debounced input: {:?}", session.conversation_id(), outcome);
        });
    }

    pub async fn set_extras(&self, extras: PromptExtras) {
        *self.inner.extras.write().await = extras;
    }

    pub async fn settings(&self) -> FeedSettings {
        self.inner.settings.read().await.clone()
    }

    /// 替换设置；离开节奏模式会停止播放，禁用会中断生成
    pub async fn update_settings(&self, settings: FeedSettings) {
        let previous = std::mem::replace(&mut *self.inner.settings.write().await, settings.clone());
        if previous.enabled && !settings.enabled {
            self.disable().await;
        } else if previous.mode.is_paced() && !settings.mode.is_paced() {
            self.inner.scheduler.stop().await;
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        let was = std::mem::replace(&mut self.inner.settings.write().await.enabled, enabled);
        if was && !enabled {
            self.disable().await;
        }
    }

    /// 暂停只阻止新的生成，进行中的任务与播放不受影响
    pub async fn set_paused(&self, paused: bool) {
        self.inner.settings.write().await.paused = paused;
    }

    async fn disable(&self) {
        tracing::info!("[{}] feed disabled", self.inner.conversation_id);
        if let Some(job) = self.interrupt(CancelReason::Disabled).await {
            job.wait(SUPERSEDE_WAIT).await;
        }
        self.inner.scheduler.halt().await;
    }

    /// 清空本会话：中断生成与播放，清除展示、过往反应与持久化状态
    pub async fn reset(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        let id = inner.conversation_id.as_str();
        let _gate = inner.start_gate.lock().await;
        if let Some(job) = self.interrupt(CancelReason::User).await {
            job.wait(SUPERSEDE_WAIT).await;
        }
        inner.scheduler.halt().await;
        inner.core.lock().await.commentaries.clear();
        inner.deps.sink.clear(id);
        tracing::info!("[{}] feed reset", id);
        inner.deps.store.clear(id).await
    }

    /// 卸载会话（切换到其他对话前调用）；已保存的状态保持原样以便之后恢复
    pub async fn detach(&self) {
        let inner = &self.inner;
        if let Some(job) = self.interrupt(CancelReason::ConversationSwitch).await {
            job.wait(SUPERSEDE_WAIT).await;
        }
        inner.scheduler.halt().await;
        inner.lifetime.cancel();
        tracing::debug!("[{}] detached", inner.conversation_id);
    }

    pub async fn is_generating(&self) -> bool {
        self.inner.core.lock().await.job.is_some()
    }

    pub async fn is_playing(&self) -> bool {
        self.inner.scheduler.is_active().await
    }

    /// (已展示, 剩余)
    pub async fn playback_progress(&self) -> Option<(usize, usize)> {
        self.inner.scheduler.progress().await
    }

    pub fn job_state(&self) -> JobState {
        self.inner.job_state.borrow().clone()
    }

    pub fn watch_job_state(&self) -> watch::Receiver<JobState> {
        self.inner.job_state.subscribe()
    }

    pub async fn transcript_len(&self) -> usize {
        self.inner.core.lock().await.transcript.len()
    }
}
