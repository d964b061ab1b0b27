//! 规则引擎门面
//!
//! `RulesEngine` 独占持有事实/操作符注册表、调度器与分发器，
//! 所有变更都经由显式 API 进入，不存在绕过注册表的外部突变。
//! 多个互相独立的引擎实例可以共存，便于测试与隔离。
//!
//! 控制流：事实变化 -> 依赖索引圈定受影响规则 -> 增量重算 ->
//! 重新聚合 -> 与上次聚合比对后分发。

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::debug::EngineDebugger;
use crate::dispatcher::{ActionDispatcher, ActionHandler};
use crate::error::Result;
use crate::facts::{FactChange, FactRegistry};
use crate::models::{Action, Fact, RuleSet};
use crate::operators::{Operator, OperatorRegistry};
use crate::scheduler::{RulesetScheduler, RulesetStatus};

/// 规则引擎
pub struct RulesEngine {
    config: EngineConfig,
    facts: FactRegistry,
    operators: OperatorRegistry,
    scheduler: RulesetScheduler,
    dispatcher: ActionDispatcher,
    debugger: Option<EngineDebugger>,
}

impl RulesEngine {
    /// 以默认配置创建引擎，预装默认操作符目录
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let debugger = config
            .debug
            .enabled
            .then(|| EngineDebugger::new(config.debug.events_stack_limit));

        Self {
            config,
            facts: FactRegistry::new(),
            operators: OperatorRegistry::with_defaults(),
            scheduler: RulesetScheduler::new(),
            dispatcher: ActionDispatcher::new(),
            debugger,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 调试事件收集器；调试模式未开启时为 None
    pub fn debugger(&self) -> Option<&EngineDebugger> {
        self.debugger.as_ref()
    }

    // -- 事实 ----------------------------------------------------------------

    /// 插入或替换事实，并对实际变化同步完成增量重算与分发
    #[instrument(skip_all, fields(instance = %self.config.instance_name))]
    pub fn upsert_facts(&mut self, facts: impl IntoIterator<Item = Fact>) {
        let changes = self.facts.upsert(facts);
        self.react(changes);
    }

    /// 单事实便捷入口
    pub fn upsert_fact(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.upsert_facts(vec![Fact::new(name, value)]);
    }

    /// 删除事实，删除视作变更到"缺失"
    #[instrument(skip_all, fields(instance = %self.config.instance_name))]
    pub fn remove_facts(&mut self, names: impl IntoIterator<Item = String>) {
        let changes = self.facts.remove(names);
        self.react(changes);
    }

    /// 读取事实当前值
    pub fn fact_value(&self, name: &str) -> Option<&Value> {
        self.facts.get(name)
    }

    /// 对外发布的事实名列表（保留命名空间被过滤）
    pub fn registered_fact_names(&self) -> Vec<String> {
        self.facts.registered_fact_names()
    }

    // -- 操作符 --------------------------------------------------------------

    /// 注册或替换操作符（后写覆盖）
    ///
    /// 替换不触发重算：操作符语义变化会在下一次相关事实变化时生效。
    /// 已构造的组合操作符不受替换影响。
    pub fn upsert_operators(&mut self, operators: impl IntoIterator<Item = Operator>) {
        self.operators.upsert(operators);
    }

    /// 按名字查找操作符
    pub fn operator(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    // -- 规则集 --------------------------------------------------------------

    /// 注册或替换规则集定义
    ///
    /// 定义携带 `enabled` 的按定义启用；校验失败的规则集保持禁用并
    /// 记录警告，不影响同批其他规则集。
    #[instrument(skip_all, fields(instance = %self.config.instance_name))]
    pub fn upsert_rulesets(&mut self, rulesets: impl IntoIterator<Item = RuleSet>) {
        for ruleset in rulesets {
            let ruleset_id = ruleset.id.clone();
            if let Err(error) =
                self.scheduler
                    .register(ruleset, &self.facts, &self.operators)
            {
                warn!(%ruleset_id, %error, "规则集注册失败，保持禁用");
            }
        }
        self.record_active_rulesets();
        self.refresh_aggregate();
    }

    /// 从 JSON 字符串装载规则集元数据
    ///
    /// 元数据通常由离线工具产出，形状见领域模型的序列化定义。
    pub fn upsert_rulesets_from_json(&mut self, json: &str) -> Result<()> {
        let rulesets: Vec<RuleSet> = serde_json::from_str(json)?;
        self.upsert_rulesets(rulesets);
        Ok(())
    }

    /// 启用规则集：校验 + 冷启动求值 + 登记依赖
    ///
    /// 校验失败时规则集保持禁用，错误同步返回给调用方。
    #[instrument(skip(self), fields(instance = %self.config.instance_name))]
    pub fn enable_rule_set_for(&mut self, ruleset_id: &str) -> Result<()> {
        self.scheduler
            .enable(ruleset_id, &self.facts, &self.operators)?;
        debug!(ruleset_id, "规则集启用完成");
        self.record_active_rulesets();
        self.refresh_aggregate();
        Ok(())
    }

    /// 禁用规则集：原子撤下其全部动作贡献，不触碰其他规则集
    #[instrument(skip(self), fields(instance = %self.config.instance_name))]
    pub fn disable_rule_set_for(&mut self, ruleset_id: &str) -> Result<()> {
        self.scheduler.disable(ruleset_id)?;
        debug!(ruleset_id, "规则集禁用完成");
        self.record_active_rulesets();
        self.refresh_aggregate();
        Ok(())
    }

    pub fn ruleset_status(&self, ruleset_id: &str) -> Option<RulesetStatus> {
        self.scheduler.status(ruleset_id)
    }

    /// 查询规则最近一次求值的真值（测试与调试用）
    pub fn rule_truth(&self, ruleset_id: &str, rule_id: &str) -> Option<bool> {
        self.scheduler.rule_truth(ruleset_id, rule_id)
    }

    // -- 动作 ----------------------------------------------------------------

    /// 注册动作处理器
    ///
    /// 晚注册的处理器会在下一轮分发中收到当前全量动作，不会被饿死。
    pub fn register_action_handler(&mut self, handler: Arc<dyn ActionHandler>) {
        self.dispatcher.register_handler(handler);
    }

    /// 当前聚合动作快照
    pub fn active_actions(&self) -> &[Action] {
        self.dispatcher.last_aggregate()
    }

    /// 订阅聚合动作快照流
    pub fn watch_actions(&self) -> watch::Receiver<Vec<Action>> {
        self.dispatcher.watch_aggregate()
    }

    // -- 内部流水线 ----------------------------------------------------------

    /// 事实变更后的同步流水线：重算受影响规则并重新聚合分发
    fn react(&mut self, changes: Vec<FactChange>) {
        if changes.is_empty() {
            return;
        }

        if let Some(debugger) = &self.debugger {
            debugger.facts_changed(&changes);
        }

        let summary = self
            .scheduler
            .on_facts_changed(&changes, &self.facts, &self.operators);

        if let Some(debugger) = &self.debugger {
            let mut per_ruleset: std::collections::BTreeMap<&str, usize> =
                std::collections::BTreeMap::new();
            for key in &summary.evaluated {
                *per_ruleset.entry(key.ruleset_id.as_str()).or_default() += 1;
            }
            for (ruleset_id, rules_evaluated) in per_ruleset {
                debugger.ruleset_execution(ruleset_id, rules_evaluated);
            }
        }

        self.refresh_aggregate();
    }

    /// 重新聚合并交给分发器（分发器负责与上次快照比对）
    fn refresh_aggregate(&mut self) {
        let aggregate = self.scheduler.active_actions(&self.facts);
        let dispatched = self.dispatcher.dispatch(aggregate);
        if dispatched {
            if let Some(debugger) = &self.debugger {
                debugger.actions_dispatched(self.dispatcher.last_aggregate());
            }
        }
    }

    fn record_active_rulesets(&self) {
        if let Some(debugger) = &self.debugger {
            debugger.active_rulesets(self.scheduler.enabled_ruleset_ids());
        }
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}
