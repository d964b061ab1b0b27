//! 引擎调试事件
//!
//! 调试模式下引擎把关键节点（事实变化、规则集启停、规则集求值、
//! 动作分发）记入一个有界环形缓冲，供运维工具随时抓取快照。
//! 缓冲容量由配置的事件栈上限控制，写满后丢弃最旧的事件。

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::facts::FactChange;
use crate::models::Action;

/// 调试事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DebugEvent {
    /// 一批事实发生变化
    FactsChanged {
        timestamp: DateTime<Utc>,
        changes: Vec<FactChange>,
    },
    /// 启用中的规则集集合发生变化
    ActiveRulesets {
        timestamp: DateTime<Utc>,
        rulesets: Vec<String>,
    },
    /// 某个规则集完成一轮求值
    RulesetExecution {
        timestamp: DateTime<Utc>,
        execution_id: String,
        ruleset_id: String,
        rules_evaluated: usize,
    },
    /// 聚合动作集合被分发
    ActionsDispatched {
        timestamp: DateTime<Utc>,
        actions: Vec<Action>,
    },
}

/// 调试事件收集器
///
/// 缓冲在克隆体之间共享：引擎任务写入，句柄侧读取快照。
#[derive(Debug, Clone)]
pub struct EngineDebugger {
    events: Arc<Mutex<VecDeque<DebugEvent>>>,
    stack_limit: usize,
}

impl EngineDebugger {
    pub fn new(stack_limit: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            stack_limit: stack_limit.max(1),
        }
    }

    /// 记录一条事件，超出上限时丢弃最旧的
    pub fn record(&self, event: DebugEvent) {
        let mut events = self.events.lock();
        events.push_back(event);
        while events.len() > self.stack_limit {
            events.pop_front();
        }
    }

    pub fn facts_changed(&self, changes: &[FactChange]) {
        self.record(DebugEvent::FactsChanged {
            timestamp: Utc::now(),
            changes: changes.to_vec(),
        });
    }

    pub fn active_rulesets(&self, rulesets: Vec<String>) {
        self.record(DebugEvent::ActiveRulesets {
            timestamp: Utc::now(),
            rulesets,
        });
    }

    pub fn ruleset_execution(&self, ruleset_id: &str, rules_evaluated: usize) {
        self.record(DebugEvent::RulesetExecution {
            timestamp: Utc::now(),
            execution_id: Uuid::new_v4().to_string(),
            ruleset_id: ruleset_id.to_string(),
            rules_evaluated,
        });
    }

    pub fn actions_dispatched(&self, actions: &[Action]) {
        self.record(DebugEvent::ActionsDispatched {
            timestamp: Utc::now(),
            actions: actions.to_vec(),
        });
    }

    /// 当前缓冲的事件快照（从旧到新）
    pub fn events(&self) -> Vec<DebugEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_limit_drops_oldest() {
        let debugger = EngineDebugger::new(3);

        for i in 0..5 {
            debugger.active_rulesets(vec![format!("rs-{}", i)]);
        }

        let events = debugger.events();
        assert_eq!(events.len(), 3);
        match &events[0] {
            DebugEvent::ActiveRulesets { rulesets, .. } => {
                assert_eq!(rulesets, &vec!["rs-2".to_string()]);
            }
            _ => panic!("expected ActiveRulesets"),
        }
    }

    #[test]
    fn test_shared_between_clones() {
        let debugger = EngineDebugger::new(10);
        let reader = debugger.clone();

        debugger.actions_dispatched(&[]);
        assert_eq!(reader.len(), 1);
    }

    #[test]
    fn test_events_serialize() {
        let debugger = EngineDebugger::new(10);
        debugger.ruleset_execution("rs-1", 2);

        let json = serde_json::to_value(debugger.events()).unwrap();
        assert_eq!(json[0]["type"], "rulesetExecution");
        assert_eq!(json[0]["rulesetId"], "rs-1");
    }
}
