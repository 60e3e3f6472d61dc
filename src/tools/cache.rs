//! 工具结果缓存
//!
//! 缓存键 = 工具名 + 按 key 递归排序的参数序列化；条目带 TTL 与可选标签
//! （如会话标识），支持按键、按工具命名空间、按标签整体失效。条目是不可变
//! 值快照，写入为 last-write-wins；多个引擎运行通过 Arc 共享同一实例，
//! 这也是独立运行之间复用高开销查询的机制。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

struct CacheEntry {
    value: Value,
    expires_at: Instant,
    tags: Vec<String>,
}

/// 跨运行共享的工具结果缓存
#[derive(Default)]
pub struct ToolCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 组合缓存键：`工具名:规范化参数`
    pub fn key_for(tool_name: &str, params: &Value) -> String {
        format!("{}:{}", tool_name, canonical_json(params))
    }

    /// 命中返回值快照；过期条目在读取时剔除
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: Value, ttl: Duration, tags: Vec<String>) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
            tags,
        };
        self.lock().insert(key, entry);
    }

    /// 按键失效
    pub fn invalidate(&self, key: &str) {
        self.lock().remove(key);
    }

    /// 按工具命名空间失效（删除该工具的全部条目）
    pub fn invalidate_tool(&self, tool_name: &str) {
        let prefix = format!("{}:", tool_name);
        self.lock().retain(|k, _| !k.starts_with(&prefix));
    }

    /// 按标签失效（如一个逻辑会话的全部条目）
    pub fn invalidate_tag(&self, tag: &str) {
        self.lock().retain(|_, e| !e.tags.iter().any(|t| t == tag));
    }

    /// 剔除全部过期条目
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.lock().retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// 按 key 递归排序的确定性序列化；缓存键与失败匹配都依赖它保持稳定
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
