//! 生成错误类型
//!
//! GenerationJob 是唯一的边界：后端与解析中的任何失败都在这里被归类为 FeedError，
//! 再由会话转换成 JobOutcome 与对应的 StatusNotice，不会以未处理的错误形式到达展示端。

use thiserror::Error;

use crate::llm::{BackendError, ExtractionError};
use crate::memory::StoreError;

/// 生成 / 播放过程中的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("No extractable text")]
    Extraction,

    /// 解析后没有任何有效消息
    #[error("Nothing generated")]
    ParseEmpty,

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl FeedError {
    /// 空结果（提取失败或解析为空）按「未生成任何内容」处理，而不是失败
    pub fn is_empty_result(&self) -> bool {
        matches!(self, FeedError::Extraction | FeedError::ParseEmpty)
    }
}

impl From<BackendError> for FeedError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Network(msg) => FeedError::Network(msg),
            BackendError::Http { status, message } => FeedError::Http { status, message },
            BackendError::Cancelled => FeedError::Cancelled,
        }
    }
}

impl From<ExtractionError> for FeedError {
    fn from(_: ExtractionError) -> Self {
        FeedError::Extraction
    }
}

impl From<StoreError> for FeedError {
    fn from(e: StoreError) -> Self {
        FeedError::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_mapping() {
        assert_eq!(FeedError::from(BackendError::Cancelled), FeedError::Cancelled);
        let http = FeedError::from(BackendError::Http {
            status: 503,
            message: "overloaded".into(),
        });
        assert_eq!(http.to_string(), "HTTP 503: overloaded");
    }

    #[test]
    fn test_empty_result_kinds() {
        assert!(FeedError::from(ExtractionError).is_empty_result());
        assert!(FeedError::ParseEmpty.is_empty_result());
        assert!(!FeedError::Network("down".into()).is_empty_result());
    }
}
