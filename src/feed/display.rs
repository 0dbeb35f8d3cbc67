//! 展示端契约
//!
//! 核心只把已解析（已剥离标记）的消息交给 DisplaySink：立即模式整批，节奏模式逐条并附带插入位置。
//! 渲染、样式与弹出窗口同步由宿主实现。

use std::sync::Mutex;

use crate::feed::ParsedMessage;

/// 逐条展示时新消息的插入位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPosition {
    /// 插到最前（最新在上）
    Top,
    /// 追加到末尾
    Bottom,
}

/// 状态提示：任何一次生成最终都会落到一个非 Generating 的提示上
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusNotice {
    Generating,
    Finished,
    Cancelled,
    Failed(String),
    NothingGenerated,
}

/// 展示端
pub trait DisplaySink: Send + Sync {
    /// 立即模式：整批替换展示
    fn show_batch(&self, conversation_id: &str, messages: &[ParsedMessage]);

    /// 节奏模式：展示一条
    fn reveal(&self, conversation_id: &str, message: &ParsedMessage, position: RevealPosition);

    /// 重新挂载会话时恢复已展示快照（按渲染顺序）
    fn restore(&self, conversation_id: &str, displayed: &[ParsedMessage]);

    fn clear(&self, conversation_id: &str);

    fn status(&self, conversation_id: &str, notice: StatusNotice);
}

/// 记录型展示端：保存收到的全部调用，测试与无界面运行时使用
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

/// RecordingSink 当前看到的内容
#[derive(Debug, Default, Clone)]
pub struct Recorded {
    /// 当前可见内容（按渲染顺序）
    pub visible: Vec<ParsedMessage>,
    /// 所有逐条展示过的消息（按展示时间）
    pub reveals: Vec<ParsedMessage>,
    pub batches: usize,
    pub notices: Vec<StatusNotice>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Recorded {
        self.inner.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn with<F: FnOnce(&mut Recorded)>(&self, f: F) {
        if let Ok(mut r) = self.inner.lock() {
            f(&mut r);
        }
    }
}

impl DisplaySink for RecordingSink {
    fn show_batch(&self, _conversation_id: &str, messages: &[ParsedMessage]) {
        self.with(|r| {
            r.visible = messages.to_vec();
            r.batches += 1;
        });
    }

    fn reveal(&self, _conversation_id: &str, message: &ParsedMessage, position: RevealPosition) {
        self.with(|r| {
            match position {
                RevealPosition::Top => r.visible.insert(0, message.clone()),
                RevealPosition::Bottom => r.visible.push(message.clone()),
            }
            r.reveals.push(message.clone());
        });
    }

    fn restore(&self, _conversation_id: &str, displayed: &[ParsedMessage]) {
        self.with(|r| r.visible = displayed.to_vec());
    }

    fn clear(&self, _conversation_id: &str) {
        self.with(|r| r.visible.clear());
    }

    fn status(&self, _conversation_id: &str, notice: StatusNotice) {
        self.with(|r| r.notices.push(notice));
    }
}

/// 终端展示端（二进制入口使用）
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl DisplaySink for ConsoleSink {
    fn show_batch(&self, conversation_id: &str, messages: &[ParsedMessage]) {
        println!("── [{}] {} messages ──", conversation_id, messages.len());
        for m in messages {
            println!("  {}: {}", m.author, m.content);
        }
    }

    fn reveal(&self, conversation_id: &str, message: &ParsedMessage, _position: RevealPosition) {
        println!("[{}] ● {}: {}", conversation_id, message.author, message.content);
    }

    fn restore(&self, conversation_id: &str, displayed: &[ParsedMessage]) {
        println!("── [{}] restored {} messages ──", conversation_id, displayed.len());
        for m in displayed {
            println!("  {}: {}", m.author, m.content);
        }
    }

    fn clear(&self, conversation_id: &str) {
        println!("── [{}] cleared ──", conversation_id);
    }

    fn status(&self, conversation_id: &str, notice: StatusNotice) {
        match notice {
            StatusNotice::Generating => println!("[{}] generating…", conversation_id),
            StatusNotice::Finished => {}
            StatusNotice::Cancelled => println!("[{}] generation cancelled", conversation_id),
            StatusNotice::Failed(msg) => eprintln!("[{}] generation failed: {}", conversation_id, msg),
            StatusNotice::NothingGenerated => println!("[{}] no valid chat lines generated", conversation_id),
        }
    }
}
