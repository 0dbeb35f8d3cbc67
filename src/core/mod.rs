//! 核心编排层：错误、任务状态机、生成任务、节奏播放、会话与会话切换、主控循环

pub mod error;
pub mod hub;
pub mod job;
pub mod orchestrator;
pub mod playback;
pub mod session;
pub mod state;

pub use error::FeedError;
pub use hub::FeedHub;
pub use job::{GeneratedBatch, GenerationJob};
pub use orchestrator::{create_feed_runtime, Command};
pub use playback::{Pacing, PlaybackQueue, PlaybackScheduler};
pub use session::{ConversationSession, FeedDeps, SUPERSEDE_WAIT};
pub use state::{
    CancelReason, FeedEvent, JobId, JobOutcome, JobState, SkipReason, StartOutcome, Trigger,
};
