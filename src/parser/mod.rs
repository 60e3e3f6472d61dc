//! 结构化响应解析
//!
//! 模型输出往往是「近似 JSON」：带代码围栏、尾逗号、单引号、模板字面量等。
//! parse_json 先对第一个配平的 `{...}` 块做严格解析；失败后按固定顺序应用
//! 一组有界文本修复再重试一次。两次都失败时报 ParseError，附原文截断预览
//! 用于诊断。本模块保持纯文本、无状态，可用字面量夹具独立测试。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::core::EngineError;

/// 诊断预览的最大字符数
const PREVIEW_CHARS: usize = 200;

/// 解析失败：严格解析与修复后重试均未得到合法 JSON
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unable to parse structured response: {reason}; preview: {preview}")]
pub struct ParseError {
    pub reason: String,
    pub preview: String,
}

impl From<ParseError> for EngineError {
    fn from(e: ParseError) -> Self {
        EngineError::Parse(e.to_string())
    }
}

/// 从模型输出中解析出严格 JSON 值
pub fn parse_json(text: &str) -> Result<Value, ParseError> {
    if let Some(block) = first_balanced_block(text) {
        if let Ok(v) = serde_json::from_str::<Value>(block) {
            return Ok(v);
        }
    }

    let repaired = repair(text);
    let candidate = first_balanced_block(&repaired).unwrap_or_else(|| repaired.trim());
    match serde_json::from_str::<Value>(candidate) {
        Ok(v) => Ok(v),
        Err(e) => Err(ParseError {
            reason: e.to_string(),
            preview: preview(text),
        }),
    }
}

/// 解析并反序列化为目标类型
pub fn parse_as<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = parse_json(text)?;
    serde_json::from_value(value).map_err(|e| ParseError {
        reason: e.to_string(),
        preview: preview(text),
    })
}

fn preview(text: &str) -> String {
    let p: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", p)
    } else {
        p
    }
}

/// 找到第一个配平的 `{...}` 块；跨过字符串字面量与转义
fn first_balanced_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// 有界修复序列，按固定顺序执行：
/// 围栏 -> 模板字面量引号 -> 尾逗号 -> 单引号 -> undefined -> 数值区间 -> 占位布尔。
/// 单引号替换是有界启发式，不处理引号嵌套。
fn repair(text: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    static SINGLE_QUOTED: OnceLock<Regex> = OnceLock::new();
    static UNDEFINED: OnceLock<Regex> = OnceLock::new();
    static RANGE_VALUE: OnceLock<Regex> = OnceLock::new();
    static BOOL_PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

    let mut s = regex(&FENCE, r"```(?:json|JSON)?")
        .replace_all(text, "")
        .into_owned();
    s = s.replace('`', "\"");
    s = regex(&TRAILING_COMMA, r",\s*([}\]])")
        .replace_all(&s, "$1")
        .into_owned();
    s = regex(&SINGLE_QUOTED, r"'([^'\\]*)'")
        .replace_all(&s, "\"$1\"")
        .into_owned();
    s = regex(&UNDEFINED, r"\bundefined\b")
        .replace_all(&s, "null")
        .into_owned();
    s = regex(&RANGE_VALUE, r":\s*(-?\d+(?:\.\d+)?)\s*-\s*\d+(?:\.\d+)?")
        .replace_all(&s, ": $1")
        .into_owned();
    s = regex(&BOOL_PLACEHOLDER, r"\btrue/false\b")
        .replace_all(&s, "true")
        .into_owned();
    s
}
