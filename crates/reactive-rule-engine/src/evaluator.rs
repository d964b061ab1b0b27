//! 条件求值器
//!
//! 对条件树执行短路求值，并静态收集条件依赖的事实名集合。
//! 依赖收集是保守的：宁可多报（短路未触达的分支也计入），绝不漏报，
//! 否则增量重算会错过必要的重新求值。
//!
//! 缺失的事实/操作符与左操作数校验失败都是非致命的：叶子判为 false
//! 并记录一条诊断。

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::facts::FactRegistry;
use crate::models::{Combinator, ConditionLeaf, ConditionNode, Operand};
use crate::operators::{OperatorContext, OperatorRegistry};

/// 求值过程中产生的非致命诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalDiagnostic {
    /// 条件引用了未注册的事实
    MissingFact { fact: String },
    /// 条件引用了未注册的操作符
    MissingOperator { operator: String },
    /// 左操作数未通过操作符的结构校验
    LhsRejected { fact: String, operator: String },
}

/// 单次条件求值的结果
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub result: bool,
    /// 本次求值依赖的事实名集合（含右操作数事实引用与操作符隐式依赖）
    pub depends_on: HashSet<String>,
    pub diagnostics: Vec<EvalDiagnostic>,
}

/// 条件求值器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 对当前事实快照求值条件树
    ///
    /// 对固定的快照与条件树，重复调用返回相同结果。
    pub fn evaluate(
        condition: &ConditionNode,
        facts: &FactRegistry,
        operators: &OperatorRegistry,
    ) -> EvalOutcome {
        let mut pass = EvalPass {
            facts,
            operators,
            lhs_checks: HashMap::new(),
            diagnostics: Vec::new(),
        };

        let result = pass.eval_node(condition);

        EvalOutcome {
            result,
            depends_on: Self::collect_dependencies(condition, operators),
            diagnostics: pass.diagnostics,
        }
    }

    /// 静态收集条件树依赖的事实名
    ///
    /// 包括：叶子左操作数事实、右操作数事实引用、以及当时可解析的
    /// 操作符声明的隐式事实依赖。
    pub fn collect_dependencies(
        condition: &ConditionNode,
        operators: &OperatorRegistry,
    ) -> HashSet<String> {
        let mut deps = HashSet::new();
        Self::collect_into(condition, operators, &mut deps);
        deps
    }

    fn collect_into(
        condition: &ConditionNode,
        operators: &OperatorRegistry,
        deps: &mut HashSet<String>,
    ) {
        match condition {
            ConditionNode::Condition(leaf) => {
                deps.insert(leaf.fact.clone());
                if let Some(Operand::Fact { value, .. }) = &leaf.rhs {
                    deps.insert(value.clone());
                }
                if let Some(operator) = operators.get(&leaf.operator) {
                    for dep in operator.fact_dependencies() {
                        deps.insert(dep.clone());
                    }
                }
            }
            ConditionNode::Group(group) => {
                for child in &group.children {
                    Self::collect_into(child, operators, deps);
                }
            }
        }
    }
}

/// 一次求值的内部状态
struct EvalPass<'a> {
    facts: &'a FactRegistry,
    operators: &'a OperatorRegistry,
    /// (事实名, 操作符名) -> 左操作数校验结果，每个组合只校验一次
    lhs_checks: HashMap<(String, String), bool>,
    diagnostics: Vec<EvalDiagnostic>,
}

impl EvalPass<'_> {
    fn eval_node(&mut self, node: &ConditionNode) -> bool {
        match node {
            ConditionNode::Condition(leaf) => self.eval_leaf(leaf),
            ConditionNode::Group(group) => match group.combinator {
                // AND: 遇到 false 短路
                Combinator::And => group.children.iter().all(|child| self.eval_node(child)),
                // OR: 遇到 true 短路
                Combinator::Or => group.children.iter().any(|child| self.eval_node(child)),
                // NOT: 恰好一个子节点，启用时已校验
                Combinator::Not => match group.children.first() {
                    Some(child) => !self.eval_node(child),
                    None => false,
                },
            },
        }
    }

    fn eval_leaf(&mut self, leaf: &ConditionLeaf) -> bool {
        let Some(lhs) = self.facts.resolve(&leaf.fact, leaf.path.as_deref()) else {
            self.push_diagnostic(EvalDiagnostic::MissingFact {
                fact: leaf.fact.clone(),
            });
            return false;
        };

        let Some(operator) = self.operators.get(&leaf.operator) else {
            self.push_diagnostic(EvalDiagnostic::MissingOperator {
                operator: leaf.operator.clone(),
            });
            return false;
        };

        // 左操作数结构校验：每个 (事实, 操作符) 组合在一次求值内只做一次
        let key = (leaf.fact.clone(), leaf.operator.clone());
        let lhs_ok = match self.lhs_checks.get(&key) {
            Some(cached) => *cached,
            None => {
                let ok = operator.validate_lhs(lhs);
                self.lhs_checks.insert(key, ok);
                if !ok {
                    self.push_diagnostic(EvalDiagnostic::LhsRejected {
                        fact: leaf.fact.clone(),
                        operator: leaf.operator.clone(),
                    });
                }
                ok
            }
        };
        if !lhs_ok {
            return false;
        }

        let rhs = match &leaf.rhs {
            Some(Operand::Literal { value }) => Some(value),
            Some(Operand::Fact { value, path }) => {
                let Some(resolved) = self.facts.resolve(value, path.as_deref()) else {
                    self.push_diagnostic(EvalDiagnostic::MissingFact {
                        fact: value.clone(),
                    });
                    return false;
                };
                Some(resolved)
            }
            None => None,
        };

        operator.evaluate(lhs, rhs, &OperatorContext::new(self.facts))
    }

    fn push_diagnostic(&mut self, diagnostic: EvalDiagnostic) {
        // 同一诊断在一次求值内去重，避免同一缺失事实刷屏
        if !self.diagnostics.contains(&diagnostic) {
            self.diagnostics.push(diagnostic);
        }
    }
}
