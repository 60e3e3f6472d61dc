//! 工具注册表
//!
//! 工具以声明式 ToolDefinition 注册：名称、描述（供 prompt）、带类型的参数表
//! （必填/可选/枚举/默认值）与异步 handler。execute 统一做参数校验、缓存查询、
//! 超时竞速与线性退避重试；失败以结构化 TimedToolResult 返回而非抛错，供外层
//! 循环据此回退。每次调用输出一行 JSON 审计日志。注册表实例由构造方显式注入
//! 引擎，不存在全局单例。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, timeout};

use crate::tools::cache::ToolCache;

/// 工具执行上下文：会话标识 + 调用方附加数据，所有工具共享同一只读视图
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    /// 逻辑工作单元标识（如一次会话/交易），用作缓存标签
    pub session_id: String,
    /// 调用方附加数据（业务内容，引擎不解释）
    pub data: Value,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// 参数类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, v: &Value) -> bool {
        match self {
            ParamType::String => v.is_string(),
            ParamType::Number => v.is_number(),
            ParamType::Boolean => v.is_boolean(),
            ParamType::Object => v.is_object(),
            ParamType::Array => v.is_array(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// 单个参数声明
#[derive(Clone, Debug)]
pub struct ToolParam {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    /// 枚举取值限制（对 string 参数生效）
    pub allowed: Option<Vec<String>>,
}

impl ToolParam {
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            allowed: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_allowed(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// 工具 handler：接收校验后的参数与共享执行上下文
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: &ExecutionContext) -> Result<Value, String>;
}

/// 声明式工具定义
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParam>,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ToolParam>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }
}

/// execute 选项：单次调用超时、重试与缓存 TTL
#[derive(Clone, Debug)]
pub struct ExecuteOptions {
    pub timeout_ms: u64,
    /// 失败后的额外尝试次数（线性退避）
    pub retries: u32,
    pub cache_ttl_ms: u64,
    /// 为 true 时跳过缓存读写
    pub bypass_cache: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            retries: 2,
            cache_ttl_ms: 300_000,
            bypass_cache: false,
        }
    }
}

/// 工具调用结果（含耗时与缓存命中标记）
#[derive(Clone, Debug, Serialize)]
pub struct TimedToolResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub from_cache: bool,
}

impl TimedToolResult {
    fn ok(value: Value, execution_time_ms: u64, from_cache: bool) -> Self {
        Self {
            success: true,
            result: Some(value),
            error: None,
            execution_time_ms,
            from_cache,
        }
    }

    fn fail(error: String, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            execution_time_ms,
            from_cache: false,
        }
    }
}

/// 工具注册表：按名称存储定义，统一校验、缓存、超时与重试
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    cache: ToolCache,
    /// 线性退避基数：第 n 次重试前等待 n * backoff
    backoff: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            cache: ToolCache::new(),
            backoff: Duration::from_millis(250),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// 按名注册；重复注册时告警，后注册者生效
    pub fn register(&mut self, def: ToolDefinition) {
        if self.tools.contains_key(&def.name) {
            tracing::warn!(tool = %def.name, "tool re-registered, last registration wins");
        }
        self.tools.insert(def.name.clone(), def);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 已注册工具名（升序）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    /// 渲染供 prompt 使用的工具目录；按名排序保证可复现
    pub fn tool_descriptions(&self) -> String {
        let mut out = String::new();
        for name in self.tool_names() {
            let def = &self.tools[&name];
            out.push_str(&format!("### {}\n{}\n", def.name, def.description));
            if !def.parameters.is_empty() {
                out.push_str("Parameters:\n");
                for p in &def.parameters {
                    let mut attrs = vec![
                        p.param_type.label().to_string(),
                        if p.required { "required".into() } else { "optional".into() },
                    ];
                    if let Some(d) = &p.default {
                        attrs.push(format!("default: {}", d));
                    }
                    if let Some(allowed) = &p.allowed {
                        attrs.push(format!("one of: {}", allowed.join("|")));
                    }
                    out.push_str(&format!(
                        "- {} ({}): {}\n",
                        p.name,
                        attrs.join(", "),
                        p.description
                    ));
                }
            }
            out.push('\n');
        }
        out
    }

    /// 校验 + 缓存 + 超时竞速 + 线性退避重试的统一执行入口。
    /// 校验失败的工具不会被调用；handler 报错或超时返回结构化失败。
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ExecutionContext,
        opts: &ExecuteOptions,
    ) -> TimedToolResult {
        let start = Instant::now();

        let Some(def) = self.tools.get(name) else {
            let result = TimedToolResult::fail(
                format!("unknown_tool: {}", name),
                start.elapsed().as_millis() as u64,
            );
            self.audit(name, &result, 0);
            return result;
        };

        let params = match validate_params(def, params) {
            Ok(p) => p,
            Err(e) => {
                let result = TimedToolResult::fail(e, start.elapsed().as_millis() as u64);
                self.audit(name, &result, 0);
                return result;
            }
        };

        let key = ToolCache::key_for(name, &params);
        if !opts.bypass_cache {
            if let Some(hit) = self.cache.get(&key) {
                let result = TimedToolResult::ok(hit, start.elapsed().as_millis() as u64, true);
                self.audit(name, &result, 0);
                return result;
            }
        }

        let mut last_error = String::new();
        for attempt in 0..=opts.retries {
            if attempt > 0 {
                sleep(self.backoff * attempt).await;
            }
            match timeout(
                Duration::from_millis(opts.timeout_ms),
                def.handler.call(params.clone(), ctx),
            )
            .await
            {
                Ok(Ok(value)) => {
                    if !opts.bypass_cache {
                        let mut tags = Vec::new();
                        if !ctx.session_id.is_empty() {
                            tags.push(ctx.session_id.clone());
                        }
                        self.cache.put(
                            key,
                            value.clone(),
                            Duration::from_millis(opts.cache_ttl_ms),
                            tags,
                        );
                    }
                    let result =
                        TimedToolResult::ok(value, start.elapsed().as_millis() as u64, false);
                    self.audit(name, &result, attempt);
                    return result;
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = format!("timeout after {} ms", opts.timeout_ms),
            }
        }

        let result = TimedToolResult::fail(last_error, start.elapsed().as_millis() as u64);
        self.audit(name, &result, opts.retries);
        result
    }

    fn audit(&self, tool: &str, result: &TimedToolResult, attempts: u32) {
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "ok": result.success,
            "from_cache": result.from_cache,
            "duration_ms": result.execution_time_ms,
            "attempts": attempts,
            "error": result.error,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
    }
}

/// 按声明校验参数：必填缺失、类型不符、枚举越界都在执行前拦截；
/// 可选参数缺失时填充默认值；未声明的多余字段原样透传。
fn validate_params(def: &ToolDefinition, params: Value) -> Result<Value, String> {
    let mut map = match params {
        Value::Object(m) => m,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(format!(
                "type_mismatch: parameters must be an object, got {}",
                type_name(&other)
            ))
        }
    };

    for p in &def.parameters {
        match map.get(&p.name) {
            None | Some(Value::Null) => {
                if let Some(default) = &p.default {
                    map.insert(p.name.clone(), default.clone());
                } else if p.required {
                    return Err(format!("missing_parameter: {}", p.name));
                }
            }
            Some(v) => {
                if !p.param_type.matches(v) {
                    return Err(format!(
                        "type_mismatch: {} expects {}, got {}",
                        p.name,
                        p.param_type.label(),
                        type_name(v)
                    ));
                }
                if let (Some(allowed), Some(s)) = (&p.allowed, v.as_str()) {
                    if !allowed.iter().any(|a| a == s) {
                        return Err(format!(
                            "invalid_enum: {} must be one of [{}], got {:?}",
                            p.name,
                            allowed.join(", "),
                            s
                        ));
                    }
                }
            }
        }
    }

    Ok(Value::Object(map))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
