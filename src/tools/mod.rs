//! 工具层：注册表、参数校验、结果缓存与调用 Schema

pub mod cache;
pub mod registry;
pub mod schema;

pub use cache::{canonical_json, ToolCache};
pub use registry::{
    ExecuteOptions, ExecutionContext, ParamType, TimedToolResult, ToolDefinition, ToolHandler,
    ToolParam, ToolRegistry,
};
pub use schema::step_decision_schema_json;
