//! 操作符定义与注册表
//!
//! 操作符是命名谓词：求值闭包 + 可选的左操作数校验闭包 + 隐式事实依赖列表。
//! 同名重复注册为后写覆盖，以支持元数据热重载。
//! 组合操作符在构造期捕获内层操作符的闭包引用（词法捕获），之后替换
//! 注册表中的内层操作符不会回溯影响已构造的组合体。

pub mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::facts::FactRegistry;

/// 求值闭包签名：左操作数、可选右操作数、隐式事实上下文
pub type EvaluatorFn = dyn Fn(&Value, Option<&Value>, &OperatorContext<'_>) -> bool + Send + Sync;

/// 左操作数结构校验闭包签名
pub type LhsValidatorFn = dyn Fn(&Value) -> bool + Send + Sync;

/// 隐式事实上下文
///
/// 只有声明了 `fact_dependencies` 的操作符才应读取它，
/// 典型用例是时间窗操作符读取内置时钟事实。
pub struct OperatorContext<'a> {
    facts: &'a FactRegistry,
}

impl<'a> OperatorContext<'a> {
    pub fn new(facts: &'a FactRegistry) -> Self {
        Self { facts }
    }

    /// 读取隐式依赖事实的当前值
    pub fn fact(&self, name: &str) -> Option<&Value> {
        self.facts.get(name)
    }
}

/// 操作符：命名谓词定义
#[derive(Clone)]
pub struct Operator {
    name: String,
    evaluator: Arc<EvaluatorFn>,
    validate_lhs: Option<Arc<LhsValidatorFn>>,
    fact_dependencies: Vec<String>,
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("name", &self.name)
            .field("has_lhs_validator", &self.validate_lhs.is_some())
            .field("fact_dependencies", &self.fact_dependencies)
            .finish()
    }
}

impl Operator {
    /// 二元操作符：右操作数缺失时直接判为 false
    pub fn binary(
        name: impl Into<String>,
        evaluator: impl Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            evaluator: Arc::new(move |lhs, rhs, _ctx| match rhs {
                Some(rhs) => evaluator(lhs, rhs),
                None => false,
            }),
            validate_lhs: None,
            fact_dependencies: Vec::new(),
        }
    }

    /// 一元操作符：忽略右操作数
    pub fn unary(
        name: impl Into<String>,
        evaluator: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            evaluator: Arc::new(move |lhs, _rhs, _ctx| evaluator(lhs)),
            validate_lhs: None,
            fact_dependencies: Vec::new(),
        }
    }

    /// 带隐式事实依赖的二元操作符
    ///
    /// `fact_dependencies` 会并入依赖该操作符的规则的依赖集合，
    /// 使这些事实的变化也触发规则重新求值。
    pub fn binary_with_facts(
        name: impl Into<String>,
        fact_dependencies: &[&str],
        evaluator: impl Fn(&Value, &Value, &OperatorContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            evaluator: Arc::new(move |lhs, rhs, ctx| match rhs {
                Some(rhs) => evaluator(lhs, rhs, ctx),
                None => false,
            }),
            validate_lhs: None,
            fact_dependencies: fact_dependencies.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 附加左操作数结构校验
    pub fn with_lhs_validator(
        mut self,
        validator: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validate_lhs = Some(Arc::new(validator));
        self
    }

    /// 组合：固定内层二元操作符的右操作数，得到一元操作符
    ///
    /// 构造期捕获 `inner` 当时的求值与校验闭包，而不是按名字延迟查找。
    pub fn bind_rhs(name: impl Into<String>, inner: &Operator, rhs: Value) -> Self {
        let inner_eval = Arc::clone(&inner.evaluator);
        Self {
            name: name.into(),
            evaluator: Arc::new(move |lhs, _rhs, ctx| inner_eval(lhs, Some(&rhs), ctx)),
            validate_lhs: inner.validate_lhs.clone(),
            fact_dependencies: inner.fact_dependencies.clone(),
        }
    }

    /// 组合：对内层操作符的求值结果取反
    ///
    /// 与 [`Operator::bind_rhs`] 一样采用构造期捕获语义。
    pub fn negate(name: impl Into<String>, inner: &Operator) -> Self {
        let inner_eval = Arc::clone(&inner.evaluator);
        Self {
            name: name.into(),
            evaluator: Arc::new(move |lhs, rhs, ctx| !inner_eval(lhs, rhs, ctx)),
            validate_lhs: inner.validate_lhs.clone(),
            fact_dependencies: inner.fact_dependencies.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fact_dependencies(&self) -> &[String] {
        &self.fact_dependencies
    }

    pub fn has_lhs_validator(&self) -> bool {
        self.validate_lhs.is_some()
    }

    /// 执行左操作数校验；未配置校验器时视为通过
    pub fn validate_lhs(&self, lhs: &Value) -> bool {
        match &self.validate_lhs {
            Some(validator) => validator(lhs),
            None => true,
        }
    }

    /// 调用求值闭包
    pub fn evaluate(&self, lhs: &Value, rhs: Option<&Value>, ctx: &OperatorContext<'_>) -> bool {
        (self.evaluator)(lhs, rhs, ctx)
    }
}

/// 操作符注册表
#[derive(Debug)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
}

impl OperatorRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// 预装默认操作符目录的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.upsert(builtin::default_operators());
        registry
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Operator> {
        self.operators.get(name)
    }

    /// 注册或替换操作符（后写覆盖）
    pub fn upsert(&mut self, operators: impl IntoIterator<Item = Operator>) {
        for operator in operators {
            debug!(operator = %operator.name, "操作符已注册");
            self.operators.insert(operator.name.clone(), operator);
        }
    }

    /// 已注册操作符名列表
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
