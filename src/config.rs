//! 引擎配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `HIVE__ENGINE__MAX_ITERATIONS=10`）。未提供文件时全部取默认值。
//! 运行期类型 EngineConfig 也可由调用方直接构造，逐次 run 传入。

use std::path::Path;

use serde::Deserialize;

use crate::core::EngineError;
use crate::llm::ModelComplexity;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub tools: ToolsSection,
}

/// [engine] 段：迭代边界、置信度阈值、超时与模型参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_iterations: usize,
    pub min_iterations: usize,
    pub confidence_threshold: f64,
    pub early_stop_confidence: f64,
    pub total_timeout_ms: u64,
    pub tool_timeout_ms: u64,
    pub enable_self_critique: bool,
    pub self_critique_threshold: f64,
    pub temperature: f64,
    /// low / medium / high，未知值回落 medium
    pub model_complexity: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            min_iterations: 2,
            confidence_threshold: 70.0,
            early_stop_confidence: 85.0,
            total_timeout_ms: 120_000,
            tool_timeout_ms: 30_000,
            enable_self_critique: true,
            self_critique_threshold: 70.0,
            temperature: 0.3,
            model_complexity: "medium".to_string(),
        }
    }
}

impl EngineSection {
    /// 转为运行期配置
    pub fn into_config(self) -> EngineConfig {
        EngineConfig {
            max_iterations: self.max_iterations,
            min_iterations: self.min_iterations,
            confidence_threshold: self.confidence_threshold,
            early_stop_confidence: self.early_stop_confidence,
            total_timeout_ms: self.total_timeout_ms,
            tool_timeout_ms: self.tool_timeout_ms,
            enable_self_critique: self.enable_self_critique,
            self_critique_threshold: self.self_critique_threshold,
            temperature: self.temperature,
            model_complexity: ModelComplexity::parse(&self.model_complexity),
        }
        .normalized()
    }
}

/// [tools] 段：缓存 TTL、重试与退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub cache_ttl_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 300_000,
            retries: 2,
            backoff_ms: 250,
        }
    }
}

impl ToolsSection {
    /// 转为注册表执行选项（timeout_ms 由引擎按 [engine].tool_timeout_ms 覆盖）
    pub fn into_execute_options(self) -> crate::tools::ExecuteOptions {
        crate::tools::ExecuteOptions {
            retries: self.retries,
            cache_ttl_ms: self.cache_ttl_ms,
            ..crate::tools::ExecuteOptions::default()
        }
    }
}

/// 单次引擎运行的配置（调用方接口的一部分）
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 迭代上限（不含规划步）
    pub max_iterations: usize,
    /// 满足停止条件前的最小迭代数
    pub min_iterations: usize,
    /// 洞见注入综合阶段的置信度阈值（0-100）
    pub confidence_threshold: f64,
    /// 达到即提前终止迭代的置信度（0-100）
    pub early_stop_confidence: f64,
    /// 整次运行的墙钟超时
    pub total_timeout_ms: u64,
    /// 单次工具调用超时
    pub tool_timeout_ms: u64,
    pub enable_self_critique: bool,
    /// 综合置信度低于该值时触发自检
    pub self_critique_threshold: f64,
    pub temperature: f64,
    pub model_complexity: ModelComplexity,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineSection::default().into_config()
    }
}

impl EngineConfig {
    /// 约束修正：min_iterations 不得超过 max_iterations
    pub fn normalized(mut self) -> Self {
        if self.min_iterations > self.max_iterations {
            self.min_iterations = self.max_iterations;
        }
        self
    }
}

/// 加载配置；path 为 None 时尝试 config/default.toml（可缺省）
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, EngineError> {
    let mut builder = config::Config::builder();
    builder = match path {
        Some(p) => builder.add_source(config::File::from(p)),
        None => builder.add_source(config::File::with_name("config/default").required(false)),
    };
    let cfg = builder
        .add_source(
            config::Environment::with_prefix("HIVE")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .map_err(|e| EngineError::Config(e.to_string()))?;
    cfg.try_deserialize()
        .map_err(|e| EngineError::Config(e.to_string()))
}
