//! 推理轨迹数据模型
//!
//! Thought / Action / Observation / ReasoningStep 一经创建不可变；
//! 步按 step_number 追加，0 保留给规划步。trace 随结果信封返回用于审计，
//! 返回后不再修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 跳过已知失败动作时写入 Observation 的固定标记
pub const SKIPPED_MARKER: &str = "skipped: previously failed with identical parameters";

/// 思考类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Planning,
    Analysis,
    Hypothesis,
    Evaluation,
    Synthesis,
    SelfCritique,
}

/// 单步思考；每轮迭代创建一次
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,
    pub content: String,
    pub thought_type: ThoughtType,
    pub timestamp: DateTime<Utc>,
}

impl Thought {
    pub fn new(content: impl Into<String>, thought_type: ThoughtType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            thought_type,
            timestamp: Utc::now(),
        }
    }
}

/// 工具动作；仅在模型选择行动时创建
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub tool_name: String,
    pub parameters: Value,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, parameters: Value, reasoning: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            parameters,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 观察：动作执行（或跳过）的结果，由工具层产出
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub action_id: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn success(action_id: &str, result: Value, execution_time_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_id: action_id.to_string(),
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(action_id: &str, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_id: action_id.to_string(),
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time_ms,
            timestamp: Utc::now(),
        }
    }

    /// 合成观察：动作与既往失败完全一致时跳过执行，只留固定标记
    pub fn skipped(action_id: &str) -> Self {
        Self::failure(action_id, SKIPPED_MARKER, 0)
    }

    pub fn is_skipped(&self) -> bool {
        self.error.as_deref() == Some(SKIPPED_MARKER)
    }
}

/// 推理步：trace 的原子单元
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_number: usize,
    pub thought: Thought,
    pub action: Option<Action>,
    pub observation: Option<Observation>,
    pub confidence_after_step: f64,
}

/// 动作统计：执行数与成功数（跳过计入失败）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionStats {
    pub executed: usize,
    pub succeeded: usize,
}

/// 一次运行的完整轨迹与聚合元数据
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub steps: Vec<ReasoningStep>,
    pub iterations: usize,
    pub final_confidence: f64,
    pub total_time_ms: u64,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// 仅追加；步序即插入序
    pub fn push_step(&mut self, step: ReasoningStep) {
        self.steps.push(step);
    }

    /// 下一个步号
    pub fn next_step_number(&self) -> usize {
        self.steps.len()
    }

    pub fn last_confidence(&self) -> f64 {
        self.steps.last().map(|s| s.confidence_after_step).unwrap_or(0.0)
    }

    pub fn action_stats(&self) -> ActionStats {
        let mut stats = ActionStats::default();
        for step in &self.steps {
            if let Some(obs) = &step.observation {
                stats.executed += 1;
                if obs.success {
                    stats.succeeded += 1;
                }
            }
        }
        stats
    }

    pub fn any_action(&self) -> bool {
        self.steps.iter().any(|s| s.action.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_executed_action_has_one_observation() {
        let action = Action::new("search", json!({"q": "x"}), "gather evidence");
        let obs = Observation::success(&action.id, json!({"hits": 3}), 12);
        assert_eq!(obs.action_id, action.id);
        assert!(obs.success);
    }

    #[test]
    fn test_skipped_observation_marker() {
        let obs = Observation::skipped("a-1");
        assert!(!obs.success);
        assert!(obs.is_skipped());
        assert_eq!(obs.execution_time_ms, 0);
    }

    #[test]
    fn test_action_stats_counts_skipped_as_failed() {
        let mut trace = ReasoningTrace::new();
        let t = || Thought::new("x", ThoughtType::Analysis);
        let a1 = Action::new("search", json!({}), "");
        let a2 = Action::new("search", json!({}), "");

        trace.push_step(ReasoningStep {
            step_number: 0,
            thought: Thought::new("plan", ThoughtType::Planning),
            action: None,
            observation: None,
            confidence_after_step: 10.0,
        });
        trace.push_step(ReasoningStep {
            step_number: 1,
            thought: t(),
            action: Some(a1.clone()),
            observation: Some(Observation::success(&a1.id, json!(1), 5)),
            confidence_after_step: 50.0,
        });
        trace.push_step(ReasoningStep {
            step_number: 2,
            thought: t(),
            action: Some(a2.clone()),
            observation: Some(Observation::skipped(&a2.id)),
            confidence_after_step: 55.0,
        });

        let stats = trace.action_stats();
        assert_eq!(stats, ActionStats { executed: 2, succeeded: 1 });
        assert_eq!(trace.last_confidence(), 55.0);
        assert_eq!(trace.next_step_number(), 3);
    }
}
