//! 综合阶段
//!
//! 把完整轨迹 + 记忆转换成调用方 schema 的数据与发现列表。引擎对 schema
//! 不可知：数据经调用方提供的 OutputValidator 转为目标类型；解析/校验失败
//! 按运行级错误上抛，引擎内不做静默兜底。每条发现的置信度由声明值与
//! 证据数量派生，证据先规范化（去空白、滤空）再计数。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::EngineError;
use crate::parser;

/// 输出校验器：调用方提供，把综合数据转换为目标类型
pub trait OutputValidator<T>: Send + Sync {
    fn validate(&self, data: &Value) -> Result<T, String>;
}

impl<T, F> OutputValidator<T> for F
where
    F: Fn(&Value) -> Result<T, String> + Send + Sync,
{
    fn validate(&self, data: &Value) -> Result<T, String> {
        self(data)
    }
}

/// 规范化后的发现：证据支撑的单条论断
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredFinding {
    pub category: String,
    pub description: String,
    /// 派生置信度（0-100）
    pub confidence: f64,
    pub evidence: Vec<String>,
}

/// 一次综合的产出；改进循环重跑综合时被整体替换
#[derive(Debug)]
pub struct SynthesisResult<T> {
    pub data: T,
    /// 综合数据的原始 JSON（供自检 prompt 使用）
    pub data_json: Value,
    pub findings: Vec<ScoredFinding>,
    /// 模型声明的整体置信度（0-100）
    pub confidence: f64,
    pub supporting_evidence: Vec<String>,
    pub uncertainties: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSynthesis {
    data: Value,
    #[serde(default)]
    findings: Vec<RawFinding>,
    #[serde(default = "default_synthesis_confidence")]
    confidence: f64,
    #[serde(default)]
    supporting_evidence: Vec<String>,
    #[serde(default)]
    uncertainties: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default = "default_category")]
    category: String,
    description: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    evidence: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_synthesis_confidence() -> f64 {
    50.0
}

/// 发现置信度派生：声明值 + 证据数量加成（每条 +4，封顶 +20），clamp 到 5-95
pub fn finding_confidence(declared: Option<f64>, evidence_count: usize) -> f64 {
    let base = declared.unwrap_or(50.0);
    let bonus = (evidence_count as f64 * 4.0).min(20.0);
    (base + bonus).clamp(5.0, 95.0)
}

fn normalize_finding(raw: RawFinding) -> ScoredFinding {
    let evidence: Vec<String> = raw
        .evidence
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    ScoredFinding {
        category: raw.category,
        description: raw.description.trim().to_string(),
        confidence: finding_confidence(raw.confidence, evidence.len()),
        evidence,
    }
}

/// 解析综合响应并经校验器得到类型化数据
pub fn parse_synthesis<T>(
    text: &str,
    validator: &dyn OutputValidator<T>,
) -> Result<SynthesisResult<T>, EngineError> {
    let raw: RawSynthesis =
        parser::parse_as(text).map_err(|e| EngineError::SynthesisFailed(e.to_string()))?;
    let data = validator
        .validate(&raw.data)
        .map_err(EngineError::SynthesisFailed)?;
    Ok(SynthesisResult {
        data,
        data_json: raw.data,
        findings: raw.findings.into_iter().map(normalize_finding).collect(),
        confidence: raw.confidence.clamp(0.0, 100.0),
        supporting_evidence: raw.supporting_evidence,
        uncertainties: raw.uncertainties,
    })
}
