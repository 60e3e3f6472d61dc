//! 规划阶段与步决策解析
//!
//! 规划在任何动作之前把任务分解为目标/子目标；每轮迭代由模型产出
//! StepDecision（思考 + 可选动作 + 终止信号）。解析都走 parser 的修复路径。
//! 规划解析失败时回落为单目标计划，保证 trace 总能记录下第 0 步；
//! 备选建议解析失败只告警并返回空列表（轻量调用，失败不致命）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;
use crate::parser;
use crate::react::memory::AlternativeAction;
use crate::react::trace::ThoughtType;

/// 目标状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Abandoned,
}

/// 带子目标与依赖工具的单个目标
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub subgoals: Vec<String>,
    #[serde(default)]
    pub status: GoalStatus,
    #[serde(default)]
    pub required_tools: Vec<String>,
}

/// 运行开始时创建一次的计划；此后只读
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub main_goal: String,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default = "default_estimated_steps")]
    pub estimated_steps: usize,
    #[serde(default)]
    pub critical_paths: Vec<String>,
}

fn default_estimated_steps() -> usize {
    4
}

impl Plan {
    /// 规划解析失败时的回落：单目标计划
    pub fn fallback(task: &str) -> Self {
        Self {
            main_goal: task.to_string(),
            goals: vec![Goal {
                id: "g1".to_string(),
                description: task.to_string(),
                subgoals: Vec::new(),
                status: GoalStatus::Pending,
                required_tools: Vec::new(),
            }],
            estimated_steps: default_estimated_steps(),
            critical_paths: Vec::new(),
        }
    }

    /// 拼入 prompt 与规划步思考的计划摘要
    pub fn summary(&self) -> String {
        let mut s = format!("Plan: {}\n", self.main_goal);
        for (i, g) in self.goals.iter().enumerate() {
            s.push_str(&format!("{}. {}", i + 1, g.description));
            if !g.required_tools.is_empty() {
                s.push_str(&format!(" [tools: {}]", g.required_tools.join(", ")));
            }
            s.push('\n');
        }
        s
    }
}

/// 模型提出的动作
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposedAction {
    pub tool: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub reasoning: String,
}

/// 单轮迭代的模型决策
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDecision {
    pub thought: String,
    #[serde(default = "default_thought_type")]
    pub thought_type: ThoughtType,
    #[serde(default)]
    pub action: Option<ProposedAction>,
    #[serde(default)]
    pub ready_to_synthesize: bool,
    #[serde(default = "default_decision_confidence")]
    pub confidence: f64,
}

fn default_thought_type() -> ThoughtType {
    ThoughtType::Analysis
}

fn default_decision_confidence() -> f64 {
    30.0
}

/// 解析规划响应；失败回落为单目标计划
pub fn parse_plan(text: &str, task: &str) -> Plan {
    match parser::parse_as::<Plan>(text) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!(error = %e, "plan response unparseable, using fallback plan");
            Plan::fallback(task)
        }
    }
}

/// 解析步决策；修复后仍失败视为运行级解析错误
pub fn parse_step_decision(text: &str) -> Result<StepDecision, EngineError> {
    Ok(parser::parse_as::<StepDecision>(text)?)
}

#[derive(Debug, Deserialize)]
struct AlternativeList {
    #[serde(default)]
    alternatives: Vec<AlternativeItem>,
}

#[derive(Debug, Deserialize)]
struct AlternativeItem {
    tool: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    reasoning: String,
    #[serde(default = "default_priority")]
    priority: f64,
}

fn default_priority() -> f64 {
    1.0
}

/// 解析备选建议列表；失败返回空列表
pub fn parse_alternatives(text: &str) -> Vec<AlternativeAction> {
    match parser::parse_as::<AlternativeList>(text) {
        Ok(list) => list
            .alternatives
            .into_iter()
            .map(|a| AlternativeAction {
                tool_name: a.tool,
                parameters: a.parameters,
                reasoning: a.reasoning,
                priority: a.priority,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "alternative suggestions unparseable, ignoring");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plan_full() {
        let text = r#"{
            "main_goal": "assess the company",
            "goals": [
                {"id": "g1", "description": "fetch filings", "required_tools": ["edgar"]},
                {"id": "g2", "description": "compare peers", "subgoals": ["pick peers"]}
            ],
            "estimated_steps": 5,
            "critical_paths": ["g1"]
        }"#;
        let plan = parse_plan(text, "assess the company");
        assert_eq!(plan.goals.len(), 2);
        assert_eq!(plan.estimated_steps, 5);
        assert_eq!(plan.goals[0].status, GoalStatus::Pending);
        assert!(plan.summary().contains("fetch filings"));
    }

    #[test]
    fn test_parse_plan_fallback_on_garbage() {
        let plan = parse_plan("I cannot produce a plan right now", "original task");
        assert_eq!(plan.main_goal, "original task");
        assert_eq!(plan.goals.len(), 1);
    }

    #[test]
    fn test_parse_step_decision_with_action() {
        let text = r#"```json
        {
            "thought": "need filings first",
            "thought_type": "hypothesis",
            "action": {"tool": "edgar", "parameters": {"cik": "320193"}, "reasoning": "primary source"},
            "ready_to_synthesize": false,
            "confidence": 40
        }
        ```"#;
        let d = parse_step_decision(text).unwrap();
        assert_eq!(d.thought_type, ThoughtType::Hypothesis);
        assert_eq!(d.action.as_ref().unwrap().tool, "edgar");
        assert!(!d.ready_to_synthesize);
    }

    #[test]
    fn test_parse_step_decision_minimal_defaults() {
        let d = parse_step_decision(r#"{"thought": "done"}"#).unwrap();
        assert_eq!(d.thought_type, ThoughtType::Analysis);
        assert!(d.action.is_none());
        assert_eq!(d.confidence, 30.0);
    }

    #[test]
    fn test_parse_step_decision_rejects_garbage() {
        assert!(parse_step_decision("no structure here").is_err());
    }

    #[test]
    fn test_parse_alternatives() {
        let text = r#"{"alternatives": [
            {"tool": "backup_search", "parameters": {"q": "x"}, "reasoning": "mirror", "priority": 8},
            {"tool": "cached_lookup"}
        ]}"#;
        let alts = parse_alternatives(text);
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[0].tool_name, "backup_search");
        assert_eq!(alts[1].priority, 1.0);
        assert_eq!(alts[1].parameters, json!(null));
    }

    #[test]
    fn test_parse_alternatives_garbage_is_empty() {
        assert!(parse_alternatives("sorry, nothing comes to mind").is_empty());
    }
}
