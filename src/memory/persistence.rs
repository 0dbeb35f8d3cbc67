//! 会话状态持久化
//!
//! ConversationState 是「恢复」的唯一依据：已展示快照 + 完整消息集 + 播放是否完成。
//! PersistenceStore 按 conversation id 存取；保存是尽力而为，失败只记日志，不打断生成与播放。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::feed::ParsedMessage;

/// 持久化的会话状态（每个会话一份，每次生成完成与每个播放步骤都会整体覆盖）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    /// 已展示的消息，按界面渲染顺序排列
    pub displayed: Vec<ParsedMessage>,
    /// 本批次完整消息集，按生成顺序排列
    pub full_set: Vec<ParsedMessage>,
    pub livestream_complete: bool,
    /// 宿主对话轮次下标 -> 当时生成的反应原文（用于下一轮提示）
    #[serde(default)]
    pub commentaries: BTreeMap<usize, String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationState {
    /// 立即模式：整批展示完毕
    pub fn shown(
        conversation_id: impl Into<String>,
        messages: Vec<ParsedMessage>,
        commentaries: BTreeMap<usize, String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            displayed: messages.clone(),
            full_set: messages,
            livestream_complete: true,
            commentaries,
            timestamp: Utc::now(),
        }
    }

    /// 节奏模式：尚未展示任何消息
    pub fn pending(
        conversation_id: impl Into<String>,
        messages: Vec<ParsedMessage>,
        commentaries: BTreeMap<usize, String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            displayed: Vec::new(),
            full_set: messages,
            livestream_complete: false,
            commentaries,
            timestamp: Utc::now(),
        }
    }

    /// 完整消息集中尚未出现在已展示快照里的部分，保持生成顺序
    ///
    /// 按消息本身比对而非按数量，快照顺序（最新在前或在后）不影响结果。
    pub fn remaining(&self) -> Vec<ParsedMessage> {
        self.full_set
            .iter()
            .filter(|m| !self.displayed.contains(m))
            .cloned()
            .collect()
    }

    /// 是否还有未展示的节奏播放消息
    pub fn needs_resume(&self) -> bool {
        !self.livestream_complete && !self.remaining().is_empty()
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }
}

/// 持久化错误（调用方只记录，不向上传播）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Backend(String),
}

/// 会话状态存储接口
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError>;

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> Result<(), StoreError>;

    /// 重置或删除会话时清除
    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError>;
}

/// 保存并只记录失败
pub async fn save_best_effort(store: &dyn PersistenceStore, state: &ConversationState) {
    if let Err(e) = store.save(&state.conversation_id, state).await {
        tracing::warn!("Failed to save state for {}: {}", state.conversation_id, e);
    }
}

/// 内存存储（测试与无盘运行）
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<String, ConversationState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for MemoryStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.states.read().await.get(conversation_id).cloned())
    }

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> Result<(), StoreError> {
        self.states
            .write()
            .await
            .insert(conversation_id.to_string(), state.clone());
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.states.write().await.remove(conversation_id);
        Ok(())
    }
}

/// 文件存储：每个会话一个 JSON 文件，目录不存在时自动创建
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 会话 id 可能含路径分隔符等字符，只保留安全字符
    fn path_for(&self, conversation_id: &str) -> PathBuf {
        let safe: String = conversation_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationState>, StoreError> {
        let path = self.path_for(conversation_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, conversation_id: &str, state: &ConversationState) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(conversation_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(conversation_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 创建状态存储
///
/// 提供了 data_dir 则使用 JSON 文件存储，否则使用内存存储
pub fn create_store(data_dir: Option<&Path>) -> Arc<dyn PersistenceStore> {
    match data_dir {
        Some(dir) => {
            tracing::info!("Using JSON file state store: {:?}", dir);
            Arc::new(JsonFileStore::new(dir))
        }
        None => {
            tracing::info!("Using in-memory state store");
            Arc::new(MemoryStore::new())
        }
    }
}
