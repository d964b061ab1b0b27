//! 响应式规则求值引擎
//!
//! 给定一组随时间变化的命名事实、一个命名谓词（操作符）目录，
//! 以及按规则集组织的声明式规则，持续判定哪些规则当前为真，
//! 并把对应动作路由给已注册的处理器。用于在不重新发版的前提下
//! 驱动运行时界面个性化。提供：
//! - 事实/操作符注册表与按值相等的变更通知
//! - 条件树短路求值与保守的依赖收集
//! - 事实名 -> 受影响规则的依赖索引，变更时只重算受影响规则
//! - 规则集启用/禁用生命周期（禁用 ⇄ 启用，可任意往复）
//! - 聚合动作按类型分发给覆盖式处理器
//! - 单命令队列的 tokio 运行器与内置时钟事实生产者

pub mod config;
pub mod debug;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod facts;
pub mod models;
pub mod operators;
pub mod runner;
pub mod scheduler;

pub use config::{ClockConfig, DebugConfig, EngineConfig};
pub use debug::{DebugEvent, EngineDebugger};
pub use dispatcher::{ActionDispatcher, ActionHandler};
pub use engine::RulesEngine;
pub use error::{EngineError, Result};
pub use evaluator::{ConditionEvaluator, EvalDiagnostic, EvalOutcome};
pub use facts::{CURRENT_TIME_FACT, FactChange, FactRegistry, RESERVED_FACT_PREFIX};
pub use models::{
    Action, Combinator, ConditionGroup, ConditionLeaf, ConditionNode, Fact, Operand, Rule,
    RuleSet, ValidityRange,
};
pub use operators::{Operator, OperatorContext, OperatorRegistry};
pub use runner::{EngineHandle, EngineRunner};
pub use scheduler::{RuleKey, RulesetScheduler, RulesetStatus};
