//! 规则集调度器
//!
//! 维护事实名到受影响规则的依赖索引，在事实变化时只重算受影响的规则。
//! 规则的索引条目在每次（重新）求值后重建：右操作数引用事实时，
//! 依赖集合可能随求值而变化。
//!
//! 规则集状态机：未注册 → 禁用 ⇄ 启用，可任意往复。
//! 启用是冷启动：全量求值并登记依赖；禁用原子地撤下该规则集的
//! 全部索引条目与真值缓存，不触碰其他规则集。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::evaluator::ConditionEvaluator;
use crate::facts::{CURRENT_TIME_FACT, FactChange, FactRegistry};
use crate::models::{Action, Combinator, ConditionNode, RuleSet};
use crate::operators::{OperatorRegistry, builtin};

/// 条件树深度上限，超过视为规则集格式错误
pub const MAX_CONDITION_DEPTH: usize = 64;

/// 依赖索引中的规则定位键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub ruleset_id: String,
    pub rule_id: String,
}

/// 规则集状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesetStatus {
    Disabled,
    Enabled,
}

/// 单个规则集的运行时状态
#[derive(Debug)]
struct RulesetState {
    definition: RuleSet,
    status: RulesetStatus,
    /// 规则 ID -> 最近一次求值的真值
    rule_truth: HashMap<String, bool>,
    /// 规则 ID -> 最近一次求值的依赖集合，用于撤销索引条目
    rule_deps: HashMap<String, HashSet<String>>,
}

/// 一轮增量重算的结果摘要
#[derive(Debug, Default)]
pub struct ReevalSummary {
    /// 本轮重新求值过的规则
    pub evaluated: Vec<RuleKey>,
    /// 是否有规则真值发生翻转
    pub truth_changed: bool,
    /// 时钟变化是否波及了带生效时间窗的规则集
    pub validity_touched: bool,
}

/// 规则集调度器
#[derive(Debug, Default)]
pub struct RulesetScheduler {
    /// 按 ID 有序存放，保证聚合动作集合的顺序确定
    rulesets: BTreeMap<String, RulesetState>,
    /// 事实名 -> 最近一次求值依赖该事实的规则集合
    dependency_index: HashMap<String, HashSet<RuleKey>>,
    /// 启用中且带生效时间窗的规则集，时钟变化时需要重新聚合
    validity_sensitive: HashSet<String>,
}

impl RulesetScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册或替换规则集定义
    ///
    /// 已启用的规则集被替换时保持启用并重新冷启动；新定义校验失败则
    /// 回落为禁用并返回错误，不会出现半启用状态。
    pub fn register(
        &mut self,
        definition: RuleSet,
        facts: &FactRegistry,
        operators: &OperatorRegistry,
    ) -> Result<()> {
        let id = definition.id.clone();
        let was_enabled = self
            .rulesets
            .get(&id)
            .is_some_and(|state| state.status == RulesetStatus::Enabled);

        if was_enabled {
            self.disable(&id)?;
        }

        let want_enabled = definition.enabled || was_enabled;
        self.rulesets.insert(
            id.clone(),
            RulesetState {
                definition,
                status: RulesetStatus::Disabled,
                rule_truth: HashMap::new(),
                rule_deps: HashMap::new(),
            },
        );
        debug!(ruleset_id = %id, "规则集已注册");

        if want_enabled {
            self.enable(&id, facts, operators)?;
        }
        Ok(())
    }

    /// 启用规则集：先校验，再对当前快照冷启动求值并登记依赖
    ///
    /// 校验失败时规则集保持禁用，错误同步返回。
    /// 对已启用的规则集调用是无操作。
    pub fn enable(
        &mut self,
        ruleset_id: &str,
        facts: &FactRegistry,
        operators: &OperatorRegistry,
    ) -> Result<()> {
        let state = self
            .rulesets
            .get_mut(ruleset_id)
            .ok_or_else(|| EngineError::UnknownRuleset(ruleset_id.to_string()))?;

        if state.status == RulesetStatus::Enabled {
            debug!(ruleset_id, "规则集已处于启用状态");
            return Ok(());
        }

        validate_ruleset(&state.definition)?;

        let mut outcomes = Vec::with_capacity(state.definition.rules.len());
        for rule in &state.definition.rules {
            let outcome = ConditionEvaluator::evaluate(&rule.condition, facts, operators);
            for diagnostic in &outcome.diagnostics {
                warn!(ruleset_id, rule_id = %rule.id, ?diagnostic, "条件求值产生诊断");
            }
            outcomes.push((rule.id.clone(), outcome));
        }

        state.status = RulesetStatus::Enabled;
        for (rule_id, outcome) in outcomes {
            let key = RuleKey {
                ruleset_id: ruleset_id.to_string(),
                rule_id: rule_id.clone(),
            };
            for dep in &outcome.depends_on {
                self.dependency_index
                    .entry(dep.clone())
                    .or_default()
                    .insert(key.clone());
            }
            state.rule_truth.insert(rule_id.clone(), outcome.result);
            state.rule_deps.insert(rule_id, outcome.depends_on);
        }

        if state.definition.validity_range.is_some() {
            self.validity_sensitive.insert(ruleset_id.to_string());
        }

        debug!(ruleset_id, rules = state.definition.rules.len(), "规则集已启用");
        Ok(())
    }

    /// 禁用规则集：撤下索引条目与真值缓存，其余规则集不受影响
    ///
    /// 对已禁用的规则集调用是无操作。
    pub fn disable(&mut self, ruleset_id: &str) -> Result<()> {
        let state = self
            .rulesets
            .get_mut(ruleset_id)
            .ok_or_else(|| EngineError::UnknownRuleset(ruleset_id.to_string()))?;

        if state.status == RulesetStatus::Disabled {
            debug!(ruleset_id, "规则集已处于禁用状态");
            return Ok(());
        }

        let removed: Vec<(String, HashSet<String>)> = state.rule_deps.drain().collect();
        state.rule_truth.clear();
        state.status = RulesetStatus::Disabled;

        for (rule_id, deps) in removed {
            let key = RuleKey {
                ruleset_id: ruleset_id.to_string(),
                rule_id,
            };
            for dep in deps {
                let mut now_empty = false;
                if let Some(entries) = self.dependency_index.get_mut(&dep) {
                    entries.remove(&key);
                    now_empty = entries.is_empty();
                }
                if now_empty {
                    self.dependency_index.remove(&dep);
                }
            }
        }

        self.validity_sensitive.remove(ruleset_id);
        debug!(ruleset_id, "规则集已禁用");
        Ok(())
    }

    /// 事实变化后的增量重算：只重新求值依赖索引命中的规则
    pub fn on_facts_changed(
        &mut self,
        changes: &[FactChange],
        facts: &FactRegistry,
        operators: &OperatorRegistry,
    ) -> ReevalSummary {
        let affected: BTreeSet<RuleKey> = changes
            .iter()
            .filter_map(|change| self.dependency_index.get(&change.name))
            .flatten()
            .cloned()
            .collect();

        let validity_touched = !self.validity_sensitive.is_empty()
            && changes.iter().any(|change| change.name == CURRENT_TIME_FACT);

        let mut summary = ReevalSummary {
            validity_touched,
            ..ReevalSummary::default()
        };

        for key in affected {
            let Some(state) = self.rulesets.get_mut(&key.ruleset_id) else {
                continue;
            };
            if state.status != RulesetStatus::Enabled {
                continue;
            }
            let Some(rule) = state
                .definition
                .rules
                .iter()
                .find(|rule| rule.id == key.rule_id)
            else {
                continue;
            };

            let outcome = ConditionEvaluator::evaluate(&rule.condition, facts, operators);
            for diagnostic in &outcome.diagnostics {
                warn!(
                    ruleset_id = %key.ruleset_id,
                    rule_id = %key.rule_id,
                    ?diagnostic,
                    "条件求值产生诊断"
                );
            }

            let previous = state
                .rule_truth
                .insert(key.rule_id.clone(), outcome.result);
            if previous != Some(outcome.result) {
                summary.truth_changed = true;
            }

            // 重建该规则的索引条目：依赖集合可能已经变化
            let old_deps = state
                .rule_deps
                .insert(key.rule_id.clone(), outcome.depends_on.clone())
                .unwrap_or_default();
            for dep in old_deps.difference(&outcome.depends_on) {
                let mut now_empty = false;
                if let Some(entries) = self.dependency_index.get_mut(dep) {
                    entries.remove(&key);
                    now_empty = entries.is_empty();
                }
                if now_empty {
                    self.dependency_index.remove(dep);
                }
            }
            for dep in outcome.depends_on.difference(&old_deps) {
                self.dependency_index
                    .entry(dep.clone())
                    .or_default()
                    .insert(key.clone());
            }

            summary.evaluated.push(key);
        }

        summary
    }

    /// 聚合当前为真的规则贡献的动作集合
    ///
    /// 顺序确定：规则集按 ID、规则与动作按定义顺序。
    /// 带生效时间窗的规则集在窗口之外不贡献动作。
    pub fn active_actions(&self, facts: &FactRegistry) -> Vec<Action> {
        let mut actions = Vec::new();

        for state in self.rulesets.values() {
            if state.status != RulesetStatus::Enabled {
                continue;
            }
            if !validity_active(&state.definition, facts) {
                continue;
            }
            for rule in &state.definition.rules {
                if state.rule_truth.get(&rule.id).copied().unwrap_or(false) {
                    actions.extend(rule.actions.iter().cloned());
                }
            }
        }

        actions
    }

    pub fn status(&self, ruleset_id: &str) -> Option<RulesetStatus> {
        self.rulesets.get(ruleset_id).map(|state| state.status)
    }

    /// 查询规则最近一次求值的真值
    pub fn rule_truth(&self, ruleset_id: &str, rule_id: &str) -> Option<bool> {
        self.rulesets
            .get(ruleset_id)?
            .rule_truth
            .get(rule_id)
            .copied()
    }

    /// 当前启用中的规则集 ID 列表
    pub fn enabled_ruleset_ids(&self) -> Vec<String> {
        self.rulesets
            .iter()
            .filter(|(_, state)| state.status == RulesetStatus::Enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 依赖给定事实的规则列表（测试与调试用）
    pub fn dependents_of(&self, fact: &str) -> Vec<RuleKey> {
        let mut keys: Vec<RuleKey> = self
            .dependency_index
            .get(fact)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

/// 判断规则集当前是否处于生效时间窗内
///
/// 时间基准优先取时钟事实，未注册时钟事实时退回墙上时钟。
fn validity_active(definition: &RuleSet, facts: &FactRegistry) -> bool {
    match &definition.validity_range {
        None => true,
        Some(range) => {
            let now = facts
                .get(CURRENT_TIME_FACT)
                .and_then(builtin::parse_date)
                .unwrap_or_else(Utc::now);
            range.contains(now)
        }
    }
}

/// 启用前的结构校验：规则 ID 唯一、NOT 组恰好一个子节点、
/// AND/OR 组非空、树深不超过上限、叶子字段非空
fn validate_ruleset(definition: &RuleSet) -> Result<()> {
    let mut seen = HashSet::new();
    for rule in &definition.rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(EngineError::malformed(
                &definition.id,
                format!("规则 ID 重复: {}", rule.id),
            ));
        }
        validate_node(&definition.id, &rule.id, &rule.condition, 0)?;
    }
    Ok(())
}

fn validate_node(
    ruleset_id: &str,
    rule_id: &str,
    node: &ConditionNode,
    depth: usize,
) -> Result<()> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(EngineError::malformed(
            ruleset_id,
            format!("规则 {} 的条件树深度超过上限 {}", rule_id, MAX_CONDITION_DEPTH),
        ));
    }

    match node {
        ConditionNode::Condition(leaf) => {
            if leaf.fact.is_empty() {
                return Err(EngineError::malformed(
                    ruleset_id,
                    format!("规则 {} 存在事实名为空的条件", rule_id),
                ));
            }
            if leaf.operator.is_empty() {
                return Err(EngineError::malformed(
                    ruleset_id,
                    format!("规则 {} 存在操作符为空的条件", rule_id),
                ));
            }
        }
        ConditionNode::Group(group) => {
            match group.combinator {
                Combinator::Not => {
                    if group.children.len() != 1 {
                        return Err(EngineError::malformed(
                            ruleset_id,
                            format!(
                                "规则 {} 的 NOT 组必须恰好包含一个子节点，当前 {} 个",
                                rule_id,
                                group.children.len()
                            ),
                        ));
                    }
                }
                Combinator::And | Combinator::Or => {
                    if group.children.is_empty() {
                        return Err(EngineError::malformed(
                            ruleset_id,
                            format!("规则 {} 的 {} 组不能为空", rule_id, group.combinator),
                        ));
                    }
                }
            }
            for child in &group.children {
                validate_node(ruleset_id, rule_id, child, depth + 1)?;
            }
        }
    }

    Ok(())
}
