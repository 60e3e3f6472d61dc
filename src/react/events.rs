//! ReAct 过程事件：供 UI / 日志观察阶段切换、步进度与工具调用

use serde::Serialize;
use serde_json::Value;

/// 引擎阶段（状态机状态）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Planning,
    Iterating,
    Synthesizing,
    Critiquing,
    Improving,
    Done,
    Failed,
}

/// 过程事件（可序列化为 JSON 供前端展示）
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// 状态机阶段切换
    PhaseChange { phase: EnginePhase },
    /// 迭代步数更新
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用 LLM 思考
    Thinking,
    /// 调用工具
    ToolCall { tool: String, args: Value },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 工具执行失败
    ToolFailure { tool: String, reason: String },
    /// 已知失败的动作被跳过（未触达工具层）
    ActionSkipped { tool: String },
    /// 失败后入队的备选动作
    AlternativeQueued { tool: String, priority: f64 },
    /// 综合完成（声明置信度）
    SynthesisDone { confidence: f64 },
    /// 自检结论
    CritiqueVerdict { verdict: String },
    /// 错误
    Error { text: String },
}
