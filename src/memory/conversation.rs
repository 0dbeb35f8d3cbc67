//! 对话记录：发往后端的消息与宿主对话的轮次
//!
//! Message 是 BackendAdapter 的请求单元；ChatTurn 是宿主对话中的一轮（可能被隐藏），
//! Transcript 保留最近若干轮，供生成时截取上下文窗口。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条请求消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 宿主对话中的一轮
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub is_user: bool,
    pub content: String,
    /// 被宿主隐藏的轮次不参与上下文
    #[serde(default)]
    pub hidden: bool,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            is_user: true,
            content: content.into(),
            hidden: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            is_user: false,
            content: content.into(),
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn role(&self) -> Role {
        if self.is_user {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

/// 宿主对话记录：最多保留 max_turns 轮，超出时丢弃最旧的部分
///
/// 轮次下标（index）是绝对值，剪枝后仍然单调递增，用于关联历史反应（commentaries）。
#[derive(Clone, Debug)]
pub struct Transcript {
    turns: Vec<ChatTurn>,
    /// 已被剪掉的轮数
    offset: usize,
    max_turns: usize,
}

impl Transcript {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            offset: 0,
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
        self.prune();
    }

    /// (绝对下标, 轮次)
    pub fn indexed(&self) -> impl Iterator<Item = (usize, &ChatTurn)> {
        self.turns
            .iter()
            .enumerate()
            .map(move |(i, t)| (self.offset + i, t))
    }

    /// 最后一轮的绝对下标
    pub fn last_index(&self) -> Option<usize> {
        if self.turns.is_empty() {
            None
        } else {
            Some(self.offset + self.turns.len() - 1)
        }
    }

    pub fn clear(&mut self) {
        self.offset += self.turns.len();
        self.turns.clear();
    }

    fn prune(&mut self) {
        if self.turns.len() > self.max_turns {
            let drop = self.turns.len() - self.max_turns;
            self.turns.drain(..drop);
            self.offset += drop;
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
