//! 反应流：消息解析、请求准备、风格库与展示端契约

pub mod display;
pub mod parser;
pub mod prompt;
pub mod styles;

pub use display::{ConsoleSink, DisplaySink, Recorded, RecordingSink, RevealPosition, StatusNotice};
pub use parser::{clean_text, parse_messages, ParsedMessage, FALLBACK_AUTHOR, MAX_AUTHOR_CHARS};
pub use prompt::{build_request, history_window, token_budget, GenerationRequest, PromptExtras};
pub use styles::{Style, StyleLibrary, DEFAULT_STYLE};
