//! LLM 层：客户端抽象与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::MockLlmClient;
pub use traits::{Completion, CompletionOptions, LlmClient, ModelComplexity};
