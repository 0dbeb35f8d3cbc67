//! 后端层：适配器契约、响应归一化与 Mock 实现

pub mod mock;
pub mod normalize;
pub mod traits;

pub use mock::MockBackend;
pub use normalize::{extract_text, ExtractionError};
pub use traits::{BackendAdapter, BackendError, RawResponse};
