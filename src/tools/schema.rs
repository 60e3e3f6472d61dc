//! 步决策 JSON Schema 生成（schemars 自动生成，拼入 system prompt）
//!
//! 把「合法单步决策」的 JSON 结构注入提示词，减少模型输出格式错误。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

/// 步决策格式：与 ReAct 解析的结构一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct StepDecisionFormat {
    /// 本步思考内容
    pub thought: String,
    /// 思考类型：planning / analysis / hypothesis / evaluation / synthesis / self_critique
    pub thought_type: String,
    /// 可选动作；不需要调用工具时省略
    pub action: Option<ActionFormat>,
    /// 证据足够、可以进入综合阶段时置 true
    pub ready_to_synthesize: bool,
    /// 当前对结论的置信度（0-100）
    pub confidence: f64,
}

/// 动作格式
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionFormat {
    /// 工具名
    pub tool: String,
    /// 工具参数，依工具声明而定
    pub parameters: HashMap<String, serde_json::Value>,
    /// 选择该动作的理由
    pub reasoning: String,
}

/// 返回步决策的 JSON Schema 字符串，可拼入 system prompt
pub fn step_decision_schema_json() -> String {
    let schema = schema_for!(StepDecisionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
