//! 自检阶段
//!
//! 对综合结果做一次对抗性评审：verdict 为 requires_revision 且迭代预算允许时，
//! 触发一步工具改进并重新综合（上限 MAX_IMPROVEMENT_CYCLES 轮以控制成本）；
//! acceptable / needs_improvement 则把数值调整（对称 clamp）落入最终置信度并
//! 结束。评审是可选增强：响应解析失败按 acceptable、零调整处理，不中断运行。

use serde::Deserialize;

use crate::parser;

/// 置信度调整的对称 clamp 范围
pub const MAX_CRITIQUE_ADJUSTMENT: f64 = 10.0;
/// 改进循环上限
pub const MAX_IMPROVEMENT_CYCLES: usize = 2;

/// 评审结论
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CritiqueVerdict {
    Acceptable,
    NeedsImprovement,
    RequiresRevision,
}

impl CritiqueVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            CritiqueVerdict::Acceptable => "acceptable",
            CritiqueVerdict::NeedsImprovement => "needs_improvement",
            CritiqueVerdict::RequiresRevision => "requires_revision",
        }
    }
}

/// 一次自检的结果
#[derive(Clone, Debug, Deserialize)]
pub struct Critique {
    pub verdict: CritiqueVerdict,
    #[serde(default)]
    pub confidence_adjustment: f64,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Critique {
    /// clamp 后的调整量
    pub fn clamped_adjustment(&self) -> f64 {
        self.confidence_adjustment
            .clamp(-MAX_CRITIQUE_ADJUSTMENT, MAX_CRITIQUE_ADJUSTMENT)
    }

    fn accept_as_is() -> Self {
        Self {
            verdict: CritiqueVerdict::Acceptable,
            confidence_adjustment: 0.0,
            issues: Vec::new(),
        }
    }
}

/// 解析评审响应；解析失败视作 acceptable 且零调整
pub fn parse_critique(text: &str) -> Critique {
    match parser::parse_as::<Critique>(text) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "critique response unparseable, treating as acceptable");
            Critique::accept_as_is()
        }
    }
}
