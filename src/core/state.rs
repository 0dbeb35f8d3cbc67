//! 状态定义：生成任务状态机、结果、取消原因、触发来源与事件

use serde::Serialize;

/// 任务 ID（会话内单调递增）
pub type JobId = u64;

/// 生成任务状态：Idle → Preparing → InFlight → {Succeeded | Cancelled | Failed} → Idle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum JobState {
    Idle,
    Preparing,
    InFlight,
    Succeeded,
    Cancelled,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Cancelled | JobState::Failed(_)
        )
    }

    /// 合法迁移；取消可以发生在任何非终态
    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Idle, Preparing) => true,
            (Preparing, InFlight) => true,
            (Preparing, Failed(_)) => true,
            (InFlight, Succeeded) | (InFlight, Failed(_)) => true,
            (Idle | Preparing | InFlight, Cancelled) => true,
            (s, Idle) => s.is_terminal(),
            _ => false,
        }
    }
}

/// 取消原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CancelReason {
    User,
    ConversationSwitch,
    Disabled,
    Superseded,
}

/// 一次任务的最终结果
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum JobOutcome {
    Succeeded { count: usize },
    /// 提取失败或解析为空
    Empty,
    Cancelled(CancelReason),
    Failed(String),
}

/// 生成的触发来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// 宿主对话出现新消息
    NewInput,
    /// 用户显式请求
    Manual,
    /// 链式播放结束后自动触发
    Chain,
}

impl Trigger {
    /// 外部触发在播放进行中需要延后
    pub fn is_external(self) -> bool {
        !matches!(self, Trigger::Chain)
    }
}

/// 未启动生成的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Paused,
    EmptyTranscript,
    /// 当前模式不响应该触发
    ModeIgnoresTrigger,
    Detached,
}

/// start() 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started(JobId),
    /// 播放进行中，外部触发被忽略
    Deferred,
    Skipped(SkipReason),
}

/// 会话事件（观察者 / 测试订阅）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent {
    JobFinished {
        conversation_id: String,
        job_id: JobId,
        outcome: JobOutcome,
    },
    Revealed {
        conversation_id: String,
        displayed: usize,
        remaining: usize,
    },
    PlaybackComplete {
        conversation_id: String,
    },
    PlaybackStopped {
        conversation_id: String,
    },
}
