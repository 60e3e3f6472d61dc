//! 置信度策略
//!
//! 最终置信度的混合是策略而非机制：全部实现为命名纯函数，用固定输入的单测
//! 锁定输出，便于整体替换而不触碰步循环。
//!
//! 混合：综合声明置信度（权重 0.4）+ 动作成功率（满分 30）+ 步数因子
//! （封顶 10）+ 记忆体量加成（封顶 10）+ 来源可靠性（执行过动作则 10）
//! + 自检调整（已在 critic 处 clamp），结果 clamp 到 0-100。

use serde::{Deserialize, Serialize};

/// 规划步（step 0）的固定低置信度基线
pub const PLANNING_BASELINE: f64 = 10.0;

const SYNTHESIS_WEIGHT: f64 = 0.4;
const SUCCESS_RATE_POINTS: f64 = 30.0;
const STEP_POINTS_EACH: f64 = 2.5;
const STEP_POINTS_CAP: f64 = 10.0;
const MEMORY_POINTS_EACH: f64 = 2.0;
const MEMORY_POINTS_CAP: f64 = 10.0;
const SOURCE_RELIABILITY_POINTS: f64 = 10.0;

/// 置信度档位
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Moderate,
    Low,
    VeryLow,
}

/// 参与混合的单个因子（名称 + 贡献值）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfidenceFactor {
    pub name: String,
    pub value: f64,
}

/// 最终置信度：档位、0-100 分值与构成因子
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub level: ConfidenceLevel,
    pub score: f64,
    pub factors: Vec<ConfidenceFactor>,
}

/// 混合输入：来自 trace 与记忆的统计量
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfidenceInputs {
    /// 综合阶段声明的置信度（0-100）
    pub synthesis_confidence: f64,
    pub actions_executed: usize,
    pub actions_succeeded: usize,
    /// 迭代步数（不含规划步）
    pub step_count: usize,
    pub insight_count: usize,
    /// 自检调整（调用方已 clamp）
    pub critique_adjustment: f64,
}

/// 动作成功率（无动作时为 0）
pub fn action_success_rate(executed: usize, succeeded: usize) -> f64 {
    if executed == 0 {
        0.0
    } else {
        succeeded as f64 / executed as f64
    }
}

/// 步数因子：每步 2.5，封顶 10
pub fn step_count_factor(steps: usize) -> f64 {
    (steps as f64 * STEP_POINTS_EACH).min(STEP_POINTS_CAP)
}

/// 记忆加成：每条洞见 2，封顶 10
pub fn memory_bonus(insights: usize) -> f64 {
    (insights as f64 * MEMORY_POINTS_EACH).min(MEMORY_POINTS_CAP)
}

/// 来源可靠性：只要实际执行过动作即记满，否则为 0（固定因子）
pub fn source_reliability(any_action: bool) -> f64 {
    if any_action {
        SOURCE_RELIABILITY_POINTS
    } else {
        0.0
    }
}

/// 分值到档位
pub fn level_for(score: f64) -> ConfidenceLevel {
    if score >= 85.0 {
        ConfidenceLevel::VeryHigh
    } else if score >= 70.0 {
        ConfidenceLevel::High
    } else if score >= 50.0 {
        ConfidenceLevel::Moderate
    } else if score >= 30.0 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::VeryLow
    }
}

/// 计算最终置信度
pub fn compute(inputs: &ConfidenceInputs) -> ConfidenceScore {
    let synthesis = inputs.synthesis_confidence * SYNTHESIS_WEIGHT;
    let success =
        action_success_rate(inputs.actions_executed, inputs.actions_succeeded) * SUCCESS_RATE_POINTS;
    let steps = step_count_factor(inputs.step_count);
    let memory = memory_bonus(inputs.insight_count);
    let reliability = source_reliability(inputs.actions_executed > 0);

    let score = (synthesis + success + steps + memory + reliability + inputs.critique_adjustment)
        .clamp(0.0, 100.0);

    let factor = |name: &str, value: f64| ConfidenceFactor {
        name: name.to_string(),
        value,
    };
    ConfidenceScore {
        level: level_for(score),
        score,
        factors: vec![
            factor("synthesis_confidence", synthesis),
            factor("action_success_rate", success),
            factor("step_count", steps),
            factor("memory_insights", memory),
            factor("source_reliability", reliability),
            factor("critique_adjustment", inputs.critique_adjustment),
        ],
    }
}

/// 失败运行的零置信度
pub fn zero() -> ConfidenceScore {
    ConfidenceScore {
        level: ConfidenceLevel::VeryLow,
        score: 0.0,
        factors: Vec::new(),
    }
}
