//! 引擎运行器
//!
//! 把 `RulesEngine` 移入单个 tokio 任务，所有注册表变更与求值工作
//! 经由一条命令队列串行执行：两次事实更新绝不会并发求值，
//! 启用/禁用也不会与同一规则集的求值过程交错。
//!
//! 内置时钟事实生产者与外部 upsert 走同一条命令队列，节拍来自配置。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::debug::{DebugEvent, EngineDebugger};
use crate::dispatcher::ActionHandler;
use crate::engine::RulesEngine;
use crate::error::{EngineError, Result};
use crate::facts::CURRENT_TIME_FACT;
use crate::models::{Action, Fact, RuleSet};
use crate::operators::Operator;

/// 引擎任务消费的命令
enum EngineCommand {
    UpsertFacts(Vec<Fact>),
    RemoveFacts(Vec<String>),
    UpsertOperators(Vec<Operator>),
    UpsertRulesets(Vec<RuleSet>),
    EnableRuleset {
        ruleset_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    DisableRuleset {
        ruleset_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    RegisterHandler(Arc<dyn ActionHandler>),
    Shutdown,
}

/// 引擎句柄
///
/// 可克隆，供多个生产者并发投递命令；命令在引擎任务上串行生效。
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    actions_rx: watch::Receiver<Vec<Action>>,
    debugger: Option<EngineDebugger>,
}

impl EngineHandle {
    fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::EngineStopped)
    }

    pub fn upsert_facts(&self, facts: Vec<Fact>) -> Result<()> {
        self.send(EngineCommand::UpsertFacts(facts))
    }

    pub fn upsert_fact(
        &self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Result<()> {
        self.upsert_facts(vec![Fact::new(name, value)])
    }

    pub fn remove_facts(&self, names: Vec<String>) -> Result<()> {
        self.send(EngineCommand::RemoveFacts(names))
    }

    pub fn upsert_operators(&self, operators: Vec<Operator>) -> Result<()> {
        self.send(EngineCommand::UpsertOperators(operators))
    }

    pub fn upsert_rulesets(&self, rulesets: Vec<RuleSet>) -> Result<()> {
        self.send(EngineCommand::UpsertRulesets(rulesets))
    }

    /// 启用规则集并等待结果；校验错误同步返回给调用方
    pub async fn enable_rule_set_for(&self, ruleset_id: &str) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(EngineCommand::EnableRuleset {
            ruleset_id: ruleset_id.to_string(),
            reply,
        })?;
        response.await.map_err(|_| EngineError::EngineStopped)?
    }

    /// 禁用规则集并等待生效
    ///
    /// 返回时禁用已生效：后续轮次不会再求值该规则集的规则。
    pub async fn disable_rule_set_for(&self, ruleset_id: &str) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(EngineCommand::DisableRuleset {
            ruleset_id: ruleset_id.to_string(),
            reply,
        })?;
        response.await.map_err(|_| EngineError::EngineStopped)?
    }

    pub fn register_action_handler(&self, handler: Arc<dyn ActionHandler>) -> Result<()> {
        self.send(EngineCommand::RegisterHandler(handler))
    }

    /// 订阅聚合动作快照流
    pub fn watch_actions(&self) -> watch::Receiver<Vec<Action>> {
        self.actions_rx.clone()
    }

    /// 当前聚合动作快照
    pub fn current_actions(&self) -> Vec<Action> {
        self.actions_rx.borrow().clone()
    }

    /// 调试事件快照；调试模式未开启时为空
    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.debugger
            .as_ref()
            .map(|debugger| debugger.events())
            .unwrap_or_default()
    }

    /// 请求引擎任务退出；已投递的命令会先处理完
    pub fn shutdown(&self) {
        let _ = self.send(EngineCommand::Shutdown);
    }
}

/// 引擎运行器
pub struct EngineRunner;

impl EngineRunner {
    /// 把引擎移入独立任务并返回句柄
    ///
    /// 配置启用时钟时同时启动时钟事实生产者。
    pub fn spawn(mut engine: RulesEngine) -> EngineHandle {
        let actions_rx = engine.watch_actions();
        let debugger = engine.debugger().cloned();
        let clock = engine.config().clock.clone();
        let instance_name = engine.config().instance_name.clone();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<EngineCommand>();

        if clock.enabled {
            // 弱引用投递：所有句柄与引擎任务退出后时钟任务随之结束
            let tick_tx = command_tx.downgrade();
            let period = Duration::from_millis(clock.interval_ms.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let Some(tx) = tick_tx.upgrade() else {
                        break;
                    };
                    let now = Fact::new(CURRENT_TIME_FACT, Utc::now().timestamp_millis());
                    if tx.send(EngineCommand::UpsertFacts(vec![now])).is_err() {
                        break;
                    }
                }
                debug!("时钟事实生产者退出");
            });
        }

        tokio::spawn(async move {
            info!(instance = %instance_name, "规则引擎任务启动");
            while let Some(command) = command_rx.recv().await {
                match command {
                    EngineCommand::UpsertFacts(facts) => engine.upsert_facts(facts),
                    EngineCommand::RemoveFacts(names) => engine.remove_facts(names),
                    EngineCommand::UpsertOperators(operators) => {
                        engine.upsert_operators(operators)
                    }
                    EngineCommand::UpsertRulesets(rulesets) => engine.upsert_rulesets(rulesets),
                    EngineCommand::EnableRuleset { ruleset_id, reply } => {
                        let result = engine.enable_rule_set_for(&ruleset_id);
                        let _ = reply.send(result);
                    }
                    EngineCommand::DisableRuleset { ruleset_id, reply } => {
                        let result = engine.disable_rule_set_for(&ruleset_id);
                        let _ = reply.send(result);
                    }
                    EngineCommand::RegisterHandler(handler) => {
                        engine.register_action_handler(handler)
                    }
                    EngineCommand::Shutdown => break,
                }
            }
            info!(instance = %instance_name, "规则引擎任务退出");
        });

        EngineHandle {
            command_tx,
            actions_rx,
            debugger,
        }
    }
}
