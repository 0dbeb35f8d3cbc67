//! Chorus - 反应流生成与节奏播放核心
//!
//! 根据宿主对话生成一批「观众反应」消息，立即整批展示或按随机间隔逐条播放，
//! 每个会话的进度持久化，切换回来时可以从断点继续。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与校验后的 FeedSettings
//! - **core**: 生成任务状态机、节奏播放、会话、会话切换、命令循环
//! - **feed**: 消息解析、请求准备、风格库、展示端契约
//! - **llm**: 后端契约、响应归一化、Mock 后端
//! - **memory**: 宿主对话记录与会话状态持久化
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod feed;
pub mod llm;
pub mod memory;
pub mod observability;
