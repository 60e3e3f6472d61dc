//! Hive - Rust ReAct 推理引擎
//!
//! 调用方提供提示词、输出校验器与工具注册表，引擎执行
//! 规划 -> 步循环 -> 综合 -> 自检，返回带完整推理轨迹的结果信封。
//!
//! 模块划分：
//! - **config**: 引擎配置加载（TOML + 环境变量）
//! - **core**: 错误类型与传播策略
//! - **llm**: LLM 客户端抽象与 Mock 实现
//! - **observability**: tracing 初始化
//! - **parser**: 结构化响应解析（近似 JSON 的提取与修复）
//! - **react**: 规划、步循环、记忆、综合、自检与置信度
//! - **tools**: 工具注册表、参数校验、结果缓存与调用 Schema

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod parser;
pub mod react;
pub mod tools;

pub use config::{load_config, AppConfig, EngineConfig};
pub use core::EngineError;
pub use llm::{Completion, CompletionOptions, LlmClient, MockLlmClient, ModelComplexity};
pub use react::{
    AgentPrompts, ConfidenceScore, OutputValidator, ReactEngine, ReactEvent, ReactOutput,
    ReasoningTrace, ScoredFinding,
};
pub use tools::{
    ExecuteOptions, ExecutionContext, ParamType, TimedToolResult, ToolDefinition, ToolHandler,
    ToolParam, ToolRegistry,
};
