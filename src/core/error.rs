//! 引擎错误类型
//!
//! 传播策略：步内错误（工具校验/执行/超时）被吸收进 trace，并作为「不要重复」
//! 上下文反馈给模型；运行级错误（总超时、综合失败、LLM 传输失败、取消）中止
//! 本次运行，由 run 折叠为 success=false 的结果信封，绝不越过引擎边界抛出。

use thiserror::Error;

/// 引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool validation failed: {0}")]
    ToolValidation(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 总墙钟超时：每轮迭代顶部检查，并对所有挂起调用做竞速
    #[error("Total timeout after {0} ms")]
    TotalTimeout(u64),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// 是否为步内可吸收错误（记入 trace 后继续迭代）
    pub fn is_step_level(&self) -> bool {
        matches!(
            self,
            EngineError::ToolValidation(_)
                | EngineError::ToolExecutionFailed(_)
                | EngineError::ToolTimeout(_)
        )
    }
}
