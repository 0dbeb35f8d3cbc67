//! 记忆层：宿主对话记录与会话状态持久化

pub mod conversation;
pub mod persistence;

pub use conversation::{ChatTurn, Message, Role, Transcript};
pub use persistence::{
    create_store, save_best_effort, ConversationState, JsonFileStore, MemoryStore, PersistenceStore,
    StoreError,
};
