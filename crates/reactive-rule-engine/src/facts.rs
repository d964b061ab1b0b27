//! 事实注册表
//!
//! 维护事实名到当前值的映射，按值相等判断变化并产出变更通知。
//! 变更通知在 upsert 调用返回前同步交给调度器，调度器不会观察到
//! 半应用的批次。

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::models::Fact;

/// 保留事实名前缀
///
/// 该命名空间下的事实不出现在对外发布的事实名列表中，
/// 但在求值时与普通事实完全一致。
pub const RESERVED_FACT_PREFIX: &str = "engine.";

/// 内置时钟事实名，值为 epoch 毫秒数，由时钟生产者周期性重发
pub const CURRENT_TIME_FACT: &str = "engine.currentTime";

/// 判断事实名是否属于保留命名空间
pub fn is_reserved_fact(name: &str) -> bool {
    name.starts_with(RESERVED_FACT_PREFIX)
}

/// 事实变更通知
///
/// 删除事实视作变更到"缺失"（`new_value` 为 None）。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactChange {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// 事实注册表
#[derive(Debug, Default)]
pub struct FactRegistry {
    facts: HashMap<String, Value>,
}

impl FactRegistry {
    pub fn new() -> Self {
        Self {
            facts: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    /// 读取事实当前值
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.facts.get(name)
    }

    /// 读取事实值并沿点号路径深入 JSON 结构
    ///
    /// 路径段可以是对象键或数组下标（如 `items.0.price`）。
    pub fn resolve(&self, name: &str, path: Option<&str>) -> Option<&Value> {
        let value = self.facts.get(name)?;
        match path {
            Some(path) => resolve_path(value, path),
            None => Some(value),
        }
    }

    /// 插入或替换事实，返回实际发生变化的事实的变更通知
    ///
    /// 变化按值相等判断：重复写入相同值不产生通知。
    pub fn upsert(&mut self, facts: impl IntoIterator<Item = Fact>) -> Vec<FactChange> {
        let mut changes = Vec::new();

        for fact in facts {
            let old = self.facts.get(&fact.name);
            if old == Some(&fact.value) {
                continue;
            }

            let old_value = self.facts.insert(fact.name.clone(), fact.value.clone());
            debug!(fact = %fact.name, "事实已更新");
            changes.push(FactChange {
                name: fact.name,
                old_value,
                new_value: Some(fact.value),
            });
        }

        changes
    }

    /// 删除事实，返回被删除事实的变更通知
    pub fn remove(&mut self, names: impl IntoIterator<Item = String>) -> Vec<FactChange> {
        let mut changes = Vec::new();

        for name in names {
            if let Some(old_value) = self.facts.remove(&name) {
                debug!(fact = %name, "事实已删除");
                changes.push(FactChange {
                    name,
                    old_value: Some(old_value),
                    new_value: None,
                });
            }
        }

        changes
    }

    /// 对外发布的事实名列表，保留命名空间被过滤
    pub fn registered_fact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .facts
            .keys()
            .filter(|name| !is_reserved_fact(name))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// 沿点号路径在 JSON 值内部取子值
fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_reports_changes() {
        let mut registry = FactRegistry::new();

        let changes = registry.upsert(vec![
            Fact::new("destination", "PAR"),
            Fact::new("cartTotal", 120),
        ]);

        assert_eq!(changes.len(), 2);
        assert_eq!(registry.get("destination"), Some(&json!("PAR")));
    }

    #[test]
    fn test_upsert_same_value_is_silent() {
        let mut registry = FactRegistry::new();
        registry.upsert(vec![Fact::new("destination", "PAR")]);

        // 相同值重复写入不应产生变更通知
        let changes = registry.upsert(vec![Fact::new("destination", "PAR")]);
        assert!(changes.is_empty());

        let changes = registry.upsert(vec![Fact::new("destination", "NYC")]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old_value, Some(json!("PAR")));
        assert_eq!(changes[0].new_value, Some(json!("NYC")));
    }

    #[test]
    fn test_value_equality_not_reference() {
        let mut registry = FactRegistry::new();
        registry.upsert(vec![Fact::new("profile", json!({"tier": "gold"}))]);

        // 结构相同的新对象也视为未变化
        let changes = registry.upsert(vec![Fact::new("profile", json!({"tier": "gold"}))]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_remove_emits_absence_change() {
        let mut registry = FactRegistry::new();
        registry.upsert(vec![Fact::new("destination", "PAR")]);

        let changes = registry.remove(vec!["destination".to_string()]);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new_value, None);
        assert!(!registry.contains("destination"));

        // 删除不存在的事实不产生通知
        let changes = registry.remove(vec!["destination".to_string()]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_resolve_path() {
        let mut registry = FactRegistry::new();
        registry.upsert(vec![Fact::new(
            "cart",
            json!({
                "total": 250,
                "items": [
                    {"sku": "SEAT-01", "price": 50},
                    {"sku": "BAG-02", "price": 200}
                ]
            }),
        )]);

        assert_eq!(
            registry.resolve("cart", Some("total")),
            Some(&json!(250))
        );
        assert_eq!(
            registry.resolve("cart", Some("items.1.sku")),
            Some(&json!("BAG-02"))
        );
        assert_eq!(registry.resolve("cart", Some("items.5.sku")), None);
        assert_eq!(registry.resolve("cart", Some("total.inner")), None);
    }

    #[test]
    fn test_reserved_names_filtered_from_listing() {
        let mut registry = FactRegistry::new();
        registry.upsert(vec![
            Fact::new("destination", "PAR"),
            Fact::new(CURRENT_TIME_FACT, 1_700_000_000_000_i64),
        ]);

        let names = registry.registered_fact_names();
        assert_eq!(names, vec!["destination".to_string()]);

        // 保留事实在求值读取时仍是普通事实
        assert!(registry.get(CURRENT_TIME_FACT).is_some());
    }
}
