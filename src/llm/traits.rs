//! LLM 客户端抽象
//!
//! 引擎把补全服务当作不透明黑盒：单一 complete(prompt, opts) 返回文本与成本。
//! 围绕它的重试与超时由引擎负责，而不是客户端。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 模型复杂度档位：由客户端映射到具体模型，引擎只透传
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelComplexity {
    Low,
    #[default]
    Medium,
    High,
}

impl ModelComplexity {
    /// 从配置字符串解析，未知值回落到 Medium
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }
}

/// 单次补全请求参数
#[derive(Clone, Debug, Default)]
pub struct CompletionOptions {
    pub complexity: ModelComplexity,
    pub temperature: f64,
    pub system_prompt: Option<String>,
}

/// 补全结果：文本与本次调用成本
#[derive(Clone, Debug)]
pub struct Completion {
    pub content: String,
    pub cost: f64,
}

/// LLM 客户端 trait：非流式单次补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, opts: &CompletionOptions) -> Result<Completion, String>;
}
