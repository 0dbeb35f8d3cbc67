//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CHORUS__*` 覆盖（双下划线表示嵌套，如 `CHORUS__PLAYBACK__MODE=paced_manual`）。
//! 核心只消费经过校验/截断的 FeedSettings，原始 AppConfig 的数值可以越界。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub feed: FeedSection,
    #[serde(default)]
    pub playback: PlaybackSection,
    #[serde(default)]
    pub budget: BudgetSection,
}

/// [app] 段：应用名、状态目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 会话状态 JSON 目录，未设置时使用内存存储
    pub data_dir: Option<PathBuf>,
    /// 每个会话保留的宿主对话轮数上限
    #[serde(default = "default_max_transcript_turns")]
    pub max_transcript_turns: usize,
}

fn default_max_transcript_turns() -> usize {
    600
}

/// [feed] 段：生成相关
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default = "default_style")]
    pub style: String,
    /// 自定义风格目录（<id>.md 覆盖内置风格）
    pub styles_dir: Option<PathBuf>,
    /// 节奏模式下的不同用户数
    #[serde(default = "default_user_count")]
    pub user_count: i64,
    /// 立即模式下的消息条数
    #[serde(default = "default_message_count")]
    pub message_count: i64,
    /// 立即模式下宿主新消息是否自动触发生成
    #[serde(default = "default_true")]
    pub auto_update_on_messages: bool,
    /// 是否带上多轮上下文（否则只带最后一条）
    #[serde(default)]
    pub include_user_input: bool,
    #[serde(default = "default_context_depth")]
    pub context_depth: i64,
    #[serde(default)]
    pub include_past_commentary: bool,
    #[serde(default)]
    pub include_persona: bool,
    #[serde(default)]
    pub include_character_description: bool,
    #[serde(default)]
    pub include_summary: bool,
    #[serde(default)]
    pub include_world_info: bool,
    /// 新消息触发的防抖时间（毫秒）
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            enabled: true,
            paused: false,
            style: default_style(),
            styles_dir: None,
            user_count: default_user_count(),
            message_count: default_message_count(),
            auto_update_on_messages: true,
            include_user_input: false,
            context_depth: default_context_depth(),
            include_past_commentary: false,
            include_persona: false,
            include_character_description: false,
            include_summary: false,
            include_world_info: false,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_style() -> String {
    "twitch".to_string()
}

fn default_user_count() -> i64 {
    5
}

fn default_message_count() -> i64 {
    5
}

fn default_context_depth() -> i64 {
    4
}

fn default_debounce_ms() -> u64 {
    500
}

/// [playback] 段：播放模式与节奏
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackSection {
    #[serde(default)]
    pub mode: PlaybackMode,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_min_wait")]
    pub min_wait_secs: f64,
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: f64,
    /// 最新展示的消息插到最前面
    #[serde(default = "default_true")]
    pub newest_first: bool,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::default(),
            batch_size: default_batch_size(),
            min_wait_secs: default_min_wait(),
            max_wait_secs: default_max_wait(),
            newest_first: true,
        }
    }
}

fn default_batch_size() -> i64 {
    20
}

fn default_min_wait() -> f64 {
    5.0
}

fn default_max_wait() -> f64 {
    60.0
}

/// [budget] 段：max_tokens = max(floor, per_message * count + base)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BudgetSection {
    #[serde(default = "default_budget_floor")]
    pub floor: u32,
    #[serde(default = "default_per_message")]
    pub per_message: u32,
    #[serde(default = "default_budget_base")]
    pub base: u32,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            floor: default_budget_floor(),
            per_message: default_per_message(),
            base: default_budget_base(),
        }
    }
}

fn default_budget_floor() -> u32 {
    2048
}

fn default_per_message() -> u32 {
    200
}

fn default_budget_base() -> u32 {
    1024
}

/// 播放模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// 整批立即展示
    #[default]
    Immediate,
    /// 节奏播放，只由用户手动触发生成
    PacedManual,
    /// 节奏播放，播完自动生成下一批
    PacedChainOnCompletion,
    /// 节奏播放，宿主新消息触发生成（播放中则忽略）
    PacedChainOnNewInput,
}

impl PlaybackMode {
    pub fn is_paced(self) -> bool {
        !matches!(self, PlaybackMode::Immediate)
    }
}

impl std::str::FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "paced_manual" | "manual" => Ok(Self::PacedManual),
            "paced_chain_on_completion" | "oncomplete" => Ok(Self::PacedChainOnCompletion),
            "paced_chain_on_new_input" | "onmessage" => Ok(Self::PacedChainOnNewInput),
            other => Err(format!("unknown playback mode: {}", other)),
        }
    }
}

pub const MESSAGE_COUNT_RANGE: (i64, i64) = (1, 50);
pub const BATCH_SIZE_RANGE: (i64, i64) = (5, 50);
pub const USER_COUNT_RANGE: (i64, i64) = (1, 20);
pub const CONTEXT_DEPTH_RANGE: (i64, i64) = (2, 500);

fn clamp_range(value: i64, (lo, hi): (i64, i64)) -> usize {
    value.clamp(lo, hi) as usize
}

pub fn clamp_message_count(value: i64) -> usize {
    clamp_range(value, MESSAGE_COUNT_RANGE)
}

pub fn clamp_batch_size(value: i64) -> usize {
    clamp_range(value, BATCH_SIZE_RANGE)
}

pub fn clamp_user_count(value: i64) -> usize {
    clamp_range(value, USER_COUNT_RANGE)
}

pub fn clamp_context_depth(value: i64) -> usize {
    clamp_range(value, CONTEXT_DEPTH_RANGE)
}

/// 校验后的运行时设置（核心只读这一份）
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub enabled: bool,
    pub paused: bool,
    pub style: String,
    pub styles_dir: Option<PathBuf>,
    pub user_count: usize,
    pub message_count: usize,
    pub auto_update_on_messages: bool,
    pub include_user_input: bool,
    pub context_depth: usize,
    pub include_past_commentary: bool,
    pub include_persona: bool,
    pub include_character_description: bool,
    pub include_summary: bool,
    pub include_world_info: bool,
    pub debounce_ms: u64,
    pub mode: PlaybackMode,
    pub batch_size: usize,
    pub min_wait_secs: f64,
    pub max_wait_secs: f64,
    pub newest_first: bool,
    pub budget: BudgetSection,
}

impl FeedSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let feed = &cfg.feed;
        let playback = &cfg.playback;
        let min_wait = sanitize_wait(playback.min_wait_secs);
        let max_wait = sanitize_wait(playback.max_wait_secs).max(min_wait);
        Self {
            enabled: feed.enabled,
            paused: feed.paused,
            style: feed.style.clone(),
            styles_dir: feed.styles_dir.clone(),
            user_count: clamp_user_count(feed.user_count),
            message_count: clamp_message_count(feed.message_count),
            auto_update_on_messages: feed.auto_update_on_messages,
            include_user_input: feed.include_user_input,
            context_depth: clamp_context_depth(feed.context_depth),
            include_past_commentary: feed.include_past_commentary,
            include_persona: feed.include_persona,
            include_character_description: feed.include_character_description,
            include_summary: feed.include_summary,
            include_world_info: feed.include_world_info,
            debounce_ms: feed.debounce_ms,
            mode: playback.mode,
            batch_size: clamp_batch_size(playback.batch_size),
            min_wait_secs: min_wait,
            max_wait_secs: max_wait,
            newest_first: playback.newest_first,
            budget: cfg.budget,
        }
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

fn sanitize_wait(secs: f64) -> f64 {
    if secs.is_finite() && secs > 0.0 {
        secs
    } else {
        0.0
    }
}

/// 从 config 目录加载配置，环境变量 CHORUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CHORUS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHORUS")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（调用方决定是否把新设置推给各会话）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
