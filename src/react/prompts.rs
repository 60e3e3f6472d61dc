//! 提示词装配
//!
//! 引擎侧的机制模板：把调用方提供的 AgentPrompts 与运行态（计划、步历史、
//! 洞见、失败账本、工具目录、决策 Schema）拼成各阶段的完整 prompt。
//! 业务文案完全来自调用方，这里只负责结构。

use serde_json::Value;

use crate::react::memory::MemoryManager;
use crate::react::planner::Plan;
use crate::react::synthesis::ScoredFinding;
use crate::react::trace::ReasoningTrace;
use crate::tools::{canonical_json, step_decision_schema_json};

/// 调用方提供的提示词集合
#[derive(Clone, Debug, Default)]
pub struct AgentPrompts {
    /// system prompt（整段透传给 LLM 客户端）
    pub system: String,
    pub task_description: String,
    /// 工具目录文本，通常来自 ToolRegistry::tool_descriptions
    pub available_tools_text: String,
    /// 期望输出结构的文字描述
    pub output_schema_text: String,
    pub constraints: Vec<String>,
}

/// 洞见注入步决策 prompt 的置信度阈值
const STEP_INSIGHT_THRESHOLD: f64 = 0.5;
/// 历史步观察预览长度
const OBSERVATION_PREVIEW_CHARS: usize = 240;

fn preview(text: &str, max: usize) -> String {
    let p: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        format!("{}...", p)
    } else {
        p
    }
}

fn constraints_section(p: &AgentPrompts) -> String {
    if p.constraints.is_empty() {
        return String::new();
    }
    let mut s = String::from("## Constraints\n");
    for c in &p.constraints {
        s.push_str(&format!("- {}\n", c));
    }
    s.push('\n');
    s
}

/// 步历史段落：每步的思考、动作与观察预览
fn history_section(trace: &ReasoningTrace) -> String {
    if trace.steps.is_empty() {
        return String::new();
    }
    let mut s = String::from("## Steps So Far\n");
    for step in &trace.steps {
        s.push_str(&format!(
            "[{}] ({:?}) {}\n",
            step.step_number,
            step.thought.thought_type,
            preview(&step.thought.content, OBSERVATION_PREVIEW_CHARS)
        ));
        if let Some(action) = &step.action {
            s.push_str(&format!(
                "    action: {} {}\n",
                action.tool_name,
                canonical_json(&action.parameters)
            ));
        }
        if let Some(obs) = &step.observation {
            let outcome = if obs.success {
                obs.result
                    .as_ref()
                    .map(|v| preview(&v.to_string(), OBSERVATION_PREVIEW_CHARS))
                    .unwrap_or_default()
            } else {
                format!("ERROR: {}", obs.error.as_deref().unwrap_or("unknown"))
            };
            s.push_str(&format!("    observation: {}\n", outcome));
        }
    }
    s.push('\n');
    s
}

/// 规划阶段 prompt
pub fn planning_prompt(p: &AgentPrompts) -> String {
    format!(
        "## Task\n{}\n\n{}## Available Tools\n{}\n\
        Decompose the task into concrete goals before taking any action.\n\
        Respond with a single JSON object:\n\
        {{\"main_goal\": string, \"goals\": [{{\"id\": string, \"description\": string, \
        \"subgoals\": [string], \"required_tools\": [string]}}], \
        \"estimated_steps\": number, \"critical_paths\": [string]}}\n\
        Output only the JSON object.",
        p.task_description,
        constraints_section(p),
        p.available_tools_text,
    )
}

/// 迭代步 prompt：历史 + 记忆 + 失败账本 + 决策 Schema
pub fn step_prompt(
    p: &AgentPrompts,
    plan: &Plan,
    trace: &ReasoningTrace,
    memory: &MemoryManager,
    note: Option<&str>,
) -> String {
    let mut s = format!(
        "## Task\n{}\n\n{}## Plan\n{}\n",
        p.task_description,
        constraints_section(p),
        plan.summary(),
    );
    s.push_str(&history_section(trace));
    s.push_str(&memory.insights_section(STEP_INSIGHT_THRESHOLD));
    s.push_str(&memory.failures_section());
    if let Some(note) = note {
        s.push_str(note);
        s.push('\n');
    }
    s.push_str(&format!(
        "## Available Tools\n{}\nDecide the next step. Use a tool only when it adds new \
        evidence; set ready_to_synthesize to true once the gathered evidence is sufficient.\n\
        Respond with a single JSON object matching this schema:\n{}\n\
        Output only the JSON object.",
        p.available_tools_text,
        step_decision_schema_json(),
    ));
    s
}

/// 失败后的轻量备选建议 prompt
pub fn alternatives_prompt(tool: &str, params: &Value, error: &str) -> String {
    format!(
        "The tool call {} {} failed with: {}\n\
        Suggest up to 3 alternative tool calls that could obtain similar evidence. \
        Do not repeat the failed call.\n\
        Respond with a single JSON object:\n\
        {{\"alternatives\": [{{\"tool\": string, \"parameters\": object, \
        \"reasoning\": string, \"priority\": number}}]}}\n\
        Output only the JSON object.",
        tool,
        canonical_json(params),
        error,
    )
}

/// 综合阶段 prompt：完整轨迹 + 高置信度洞见 + 输出 schema 文本
pub fn synthesis_prompt(
    p: &AgentPrompts,
    trace: &ReasoningTrace,
    memory: &MemoryManager,
    insight_threshold: f64,
) -> String {
    format!(
        "## Task\n{}\n\n{}{}{}## Output Schema\n{}\n\
        Synthesize the evidence above into the final answer.\n\
        Respond with a single JSON object:\n\
        {{\"data\": <object matching the output schema>, \
        \"findings\": [{{\"category\": string, \"description\": string, \
        \"confidence\": number, \"evidence\": [string]}}], \
        \"confidence\": number, \"supporting_evidence\": [string], \
        \"uncertainties\": [string]}}\n\
        Output only the JSON object.",
        p.task_description,
        constraints_section(p),
        history_section(trace),
        memory.insights_section(insight_threshold),
        p.output_schema_text,
    )
}

/// 自检阶段 prompt
pub fn critique_prompt(
    p: &AgentPrompts,
    data: &Value,
    findings: &[ScoredFinding],
    confidence: f64,
) -> String {
    let findings_block = findings
        .iter()
        .map(|f| format!("- [{}] {} (confidence {:.0})", f.category, f.description, f.confidence))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "## Task\n{}\n\n## Synthesized Result\n{}\n\n## Findings\n{}\n\n\
        Declared confidence: {:.0}\n\
        Review this result adversarially: look for unsupported claims, missing \
        evidence and internal contradictions.\n\
        Respond with a single JSON object:\n\
        {{\"verdict\": \"acceptable\" | \"needs_improvement\" | \"requires_revision\", \
        \"confidence_adjustment\": number, \"issues\": [string]}}\n\
        Output only the JSON object.",
        p.task_description, data, findings_block, confidence,
    )
}

/// 改进步附加段落：把评审问题带进下一次步决策
pub fn improvement_note(issues: &[String]) -> String {
    let mut s = String::from("## Reviewer Issues (address these before synthesizing again)\n");
    if issues.is_empty() {
        s.push_str("- strengthen the weakest evidence\n");
    }
    for issue in issues {
        s.push_str(&format!("- {}\n", issue));
    }
    s
}
