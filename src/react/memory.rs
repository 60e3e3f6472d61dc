//! 记忆管理器
//!
//! 跨迭代积累三类状态：按键的置信度加权洞见（同 key 后写覆盖）、失败尝试
//! 账本（精确参数匹配，阻止重复已知失败的调用）、失败后供回退使用的备选
//! 动作优先队列。洞见抽取按工具名分派，未注册工具走通用兜底（拍平顶层
//! 非空字段），保证任何工具都能贡献信号。每次引擎运行独占一个实例。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::canonical_json;

/// 通用兜底抽取的默认置信度
const DEFAULT_INSIGHT_CONFIDENCE: f64 = 0.6;

/// 单条洞见
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryInsight {
    pub key: String,
    pub value: Value,
    pub source_step: usize,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// 失败尝试：按 (tool_name, 规范化参数) 精确匹配
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub tool_name: String,
    pub parameters: Value,
    pub error: String,
    pub step_number: usize,
}

/// 备选动作：失败后由模型建议，优先级高者先出队
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlternativeAction {
    pub tool_name: String,
    pub parameters: Value,
    pub reasoning: String,
    pub priority: f64,
}

impl PartialEq for AlternativeAction {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for AlternativeAction {}

impl PartialOrd for AlternativeAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AlternativeAction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.total_cmp(&other.priority)
    }
}

/// 洞见抽取器：工具结果 -> (key, value, confidence) 列表
pub type InsightExtractor = Arc<dyn Fn(&Value) -> Vec<(String, Value, f64)> + Send + Sync>;

/// 记忆管理器：洞见、失败账本与备选队列
#[derive(Default)]
pub struct MemoryManager {
    insights: HashMap<String, MemoryInsight>,
    failures: Vec<FailedAttempt>,
    alternatives: BinaryHeap<AlternativeAction>,
    extractors: HashMap<String, InsightExtractor>,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册按工具名分派的洞见抽取器
    pub fn register_extractor(&mut self, tool_name: impl Into<String>, extractor: InsightExtractor) {
        self.extractors.insert(tool_name.into(), extractor);
    }

    /// 写入洞见：同 key 后写覆盖
    pub fn store_insight(
        &mut self,
        key: impl Into<String>,
        value: Value,
        source_step: usize,
        confidence: f64,
    ) {
        let key = key.into();
        let insight = MemoryInsight {
            key: key.clone(),
            value,
            source_step,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
        };
        self.insights.insert(key, insight);
    }

    pub fn get_insight(&self, key: &str) -> Option<&MemoryInsight> {
        self.insights.get(key)
    }

    /// 阈值之上的洞见，按置信度降序
    pub fn high_confidence_insights(&self, threshold: f64) -> Vec<&MemoryInsight> {
        let mut hits: Vec<&MemoryInsight> = self
            .insights
            .values()
            .filter(|i| i.confidence >= threshold)
            .collect();
        hits.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        hits
    }

    pub fn insight_count(&self) -> usize {
        self.insights.len()
    }

    /// 记录失败尝试（追加）
    pub fn record_failure(
        &mut self,
        tool_name: impl Into<String>,
        parameters: Value,
        error: impl Into<String>,
        step_number: usize,
    ) {
        self.failures.push(FailedAttempt {
            tool_name: tool_name.into(),
            parameters,
            error: error.into(),
            step_number,
        });
    }

    /// 精确匹配已知失败：同名工具 + 相同规范化参数。
    /// 已知限制：参数有细微差异的近重复调用不会被去重。
    pub fn has_already_failed(&self, tool_name: &str, parameters: &Value) -> bool {
        let needle = canonical_json(parameters);
        self.failures
            .iter()
            .any(|f| f.tool_name == tool_name && canonical_json(&f.parameters) == needle)
    }

    pub fn failures(&self) -> &[FailedAttempt] {
        &self.failures
    }

    /// 批量入队备选动作
    pub fn queue_alternatives(&mut self, alternatives: Vec<AlternativeAction>) {
        for alt in alternatives {
            self.alternatives.push(alt);
        }
    }

    /// 出队优先级最高的备选动作
    pub fn pop_alternative(&mut self) -> Option<AlternativeAction> {
        self.alternatives.pop()
    }

    pub fn has_alternatives(&self) -> bool {
        !self.alternatives.is_empty()
    }

    /// 从成功的工具结果抽取洞见写入记忆，返回抽取条数
    pub fn extract_insights(&mut self, tool_name: &str, result: &Value, step: usize) -> usize {
        let candidates = match self.extractors.get(tool_name) {
            Some(extractor) => (**extractor)(result),
            None => generic_extract(tool_name, result),
        };
        let count = candidates.len();
        for (key, value, confidence) in candidates {
            self.store_insight(key, value, step, confidence);
        }
        count
    }

    /// prompt 段落：高置信度洞见（降序）
    pub fn insights_section(&self, threshold: f64) -> String {
        let hits = self.high_confidence_insights(threshold);
        if hits.is_empty() {
            return String::new();
        }
        let mut s = String::from("## Known Insights\n");
        for i in hits {
            s.push_str(&format!(
                "- {} = {} (confidence {:.2})\n",
                i.key, i.value, i.confidence
            ));
        }
        s.push('\n');
        s
    }

    /// prompt 段落：已失败调用，明确标注不要重复
    pub fn failures_section(&self) -> String {
        if self.failures.is_empty() {
            return String::new();
        }
        let mut s = String::from("## Failed Attempts (do not repeat these exact calls)\n");
        for f in &self.failures {
            s.push_str(&format!(
                "- {} {} -> {}\n",
                f.tool_name,
                canonical_json(&f.parameters),
                f.error
            ));
        }
        s.push('\n');
        s
    }
}

/// 通用兜底：对象拍平顶层非空字段为 `tool.field`，标量整体作为一条洞见
fn generic_extract(tool_name: &str, result: &Value) -> Vec<(String, Value, f64)> {
    match result {
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                (
                    format!("{}.{}", tool_name, k),
                    v.clone(),
                    DEFAULT_INSIGHT_CONFIDENCE,
                )
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![(
            tool_name.to_string(),
            other.clone(),
            DEFAULT_INSIGHT_CONFIDENCE,
        )],
    }
}
