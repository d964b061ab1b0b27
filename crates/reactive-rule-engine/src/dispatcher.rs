//! 动作分发器
//!
//! 每轮重算后聚合当前为真的规则贡献的动作，按动作类型路由给声明
//! 支持该类型的处理器。处理器是覆盖式消费者：每次收到的是该类型
//! 动作的当前全量集合，而不是相对上次的增量；某类型从聚合中消失时，
//! 其处理器会收到一次空集合以清空覆盖。
//!
//! 处理器调用以独立任务派发，单个处理器的失败或延迟不会阻塞其他
//! 处理器，也不会回溯否定本次分发决策。

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::Action;

/// 动作处理器
///
/// 由外部子系统实现并注册（如本地化覆盖存储、资源路径覆盖存储）。
/// 实现应当是幂等的覆盖式消费："将覆盖设为 X"，而不是"切换覆盖"。
/// 分发依赖 tokio 运行时派发任务。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// 声明支持的动作类型集合
    fn supported_actions(&self) -> Vec<String>;

    /// 执行某一动作类型的当前全量动作集合
    async fn execute_actions(&self, actions: Vec<Action>) -> anyhow::Result<()>;
}

/// 动作分发器
pub struct ActionDispatcher {
    handlers: Vec<Arc<dyn ActionHandler>>,
    /// 上一次分发的聚合快照，用于跳过无变化的分发
    last_aggregate: Vec<Action>,
    /// 有新处理器注册后置位，强制下一轮分发即使聚合未变化
    pending_redispatch: bool,
    aggregate_tx: watch::Sender<Vec<Action>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        let (aggregate_tx, _) = watch::channel(Vec::new());
        Self {
            handlers: Vec::new(),
            last_aggregate: Vec::new(),
            pending_redispatch: false,
            aggregate_tx,
        }
    }

    /// 注册动作处理器
    ///
    /// 晚注册的处理器不会立即收到回放，但下一轮分发会强制执行，
    /// 即使聚合没有变化。
    pub fn register_handler(&mut self, handler: Arc<dyn ActionHandler>) {
        info!(supported = ?handler.supported_actions(), "动作处理器已注册");
        self.handlers.push(handler);
        self.pending_redispatch = true;
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// 当前聚合快照
    pub fn last_aggregate(&self) -> &[Action] {
        &self.last_aggregate
    }

    /// 订阅聚合快照流
    pub fn watch_aggregate(&self) -> watch::Receiver<Vec<Action>> {
        self.aggregate_tx.subscribe()
    }

    /// 分发新的聚合动作集合
    ///
    /// 聚合与上次相同且没有待补发的处理器时跳过。
    /// 返回本轮是否实际执行了分发。
    pub fn dispatch(&mut self, aggregate: Vec<Action>) -> bool {
        if aggregate == self.last_aggregate && !self.pending_redispatch {
            return false;
        }
        self.pending_redispatch = false;

        // 上一轮出现过、本轮消失的动作类型要补一次空集合
        let withdrawn_types: Vec<String> = distinct_types(&self.last_aggregate)
            .into_iter()
            .filter(|ty| !aggregate.iter().any(|action| &action.action_type == ty))
            .collect();

        self.last_aggregate = aggregate.clone();
        self.aggregate_tx.send_replace(aggregate.clone());

        let mut grouped: Vec<(String, Vec<Action>)> = Vec::new();
        for action in aggregate {
            match grouped
                .iter_mut()
                .find(|(ty, _)| *ty == action.action_type)
            {
                Some((_, actions)) => actions.push(action),
                None => grouped.push((action.action_type.clone(), vec![action])),
            }
        }
        for ty in withdrawn_types {
            grouped.push((ty, Vec::new()));
        }

        for (action_type, actions) in grouped {
            let mut handled = false;
            for handler in &self.handlers {
                if !handler
                    .supported_actions()
                    .iter()
                    .any(|ty| ty == &action_type)
                {
                    continue;
                }
                handled = true;

                let handler = Arc::clone(handler);
                let batch = actions.clone();
                let action_type = action_type.clone();
                tokio::spawn(async move {
                    if let Err(error) = handler.execute_actions(batch).await {
                        warn!(%action_type, %error, "动作处理器执行失败");
                    }
                });
            }
            // 没有处理器的动作类型静默丢弃，容忍处理器异步晚注册
            if !handled && !actions.is_empty() {
                debug!(%action_type, count = actions.len(), "动作类型无处理器，暂不分发");
            }
        }

        true
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn distinct_types(actions: &[Action]) -> Vec<String> {
    let mut types: Vec<String> = Vec::new();
    for action in actions {
        if !types.contains(&action.action_type) {
            types.push(action.action_type.clone());
        }
    }
    types
}
