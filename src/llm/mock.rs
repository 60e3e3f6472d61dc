//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序返回预置响应，脚本耗尽时返回错误；记录收到的 prompt 便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{Completion, CompletionOptions, LlmClient};

/// 脚本化 Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    cost_per_call: f64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以固定响应脚本创建
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            cost_per_call: 0.0,
        }
    }

    /// 设置每次调用计入的成本
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    /// 追加一条脚本响应
    pub fn push_response(&self, resp: impl Into<String>) {
        self.lock_responses().push_back(resp.into());
    }

    /// 已收到的 prompt（按调用顺序）
    pub fn received_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, prompt: &str, _opts: &CompletionOptions) -> Result<Completion, String> {
        self.prompts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(prompt.to_string());
        match self.lock_responses().pop_front() {
            Some(content) => Ok(Completion {
                content,
                cost: self.cost_per_call,
            }),
            None => Err("mock script exhausted".to_string()),
        }
    }
}
