//! 规则引擎集成测试
//!
//! 覆盖完整工作流：元数据装载、规则集启停、事实驱动的增量重算、
//! 动作聚合与处理器分发。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use rules_engine::{
    Action, ActionHandler, ClockConfig, ConditionNode, EngineConfig, EngineRunner, Fact,
    Operand, Operator, Rule, RuleSet, RulesEngine, RulesetStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// 把每次调用转发到通道的测试处理器
struct ForwardingHandler {
    supported: Vec<String>,
    calls_tx: mpsc::UnboundedSender<Vec<Action>>,
}

#[async_trait]
impl ActionHandler for ForwardingHandler {
    fn supported_actions(&self) -> Vec<String> {
        self.supported.clone()
    }

    async fn execute_actions(&self, actions: Vec<Action>) -> anyhow::Result<()> {
        let _ = self.calls_tx.send(actions);
        Ok(())
    }
}

fn forwarding_handler(
    supported: &[&str],
) -> (Arc<ForwardingHandler>, mpsc::UnboundedReceiver<Vec<Action>>) {
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ForwardingHandler {
            supported: supported.iter().map(|s| s.to_string()).collect(),
            calls_tx,
        }),
        calls_rx,
    )
}

fn no_clock_config() -> EngineConfig {
    EngineConfig {
        clock: ClockConfig {
            enabled: false,
            interval_ms: 30_000,
        },
        ..EngineConfig::default()
    }
}

/// 带 duringSummer 组合操作符的引擎：从 inRangeDate 派生一元操作符
fn engine_with_summer_operator() -> RulesEngine {
    let mut engine = RulesEngine::with_config(no_clock_config());
    let during_summer = Operator::bind_rhs(
        "duringSummer",
        engine.operator("inRangeDate").unwrap(),
        json!(["2024-06-01", "2024-08-31"]),
    );
    engine.upsert_operators(vec![during_summer]);
    engine
}

fn summer_ruleset() -> RuleSet {
    RuleSet::new(
        "R1",
        "夏季横幅",
        vec![Rule::new(
            "r-summer",
            "summer_highlight",
            ConditionNode::leaf("date", "duringSummer"),
        )
        .with_actions(vec![Action::new("highlight", "summer-banner")])],
    )
}

// ==================== 同步引擎完整工作流 ====================

#[test]
fn test_full_workflow_from_metadata_json() {
    let metadata = r#"
    [
        {
            "id": "rs-destination",
            "name": "目的地个性化",
            "enabled": true,
            "rules": [
                {
                    "id": "r-paris",
                    "name": "paris_assets",
                    "condition": {
                        "type": "group",
                        "combinator": "AND",
                        "children": [
                            {
                                "type": "condition",
                                "fact": "destination",
                                "operator": "equals",
                                "rhs": { "type": "LITERAL", "value": "PAR" }
                            },
                            {
                                "type": "group",
                                "combinator": "NOT",
                                "children": [
                                    {
                                        "type": "condition",
                                        "fact": "cartTotal",
                                        "operator": "lessThan",
                                        "rhs": { "type": "LITERAL", "value": 100 }
                                    }
                                ]
                            }
                        ]
                    },
                    "actions": [
                        { "actionType": "UPDATE_ASSET", "value": "paris.jpg" },
                        { "actionType": "UPDATE_LOCALISATION", "value": "fr-FR" }
                    ]
                }
            ]
        }
    ]
    "#;

    init_tracing();
    let mut engine = RulesEngine::with_config(no_clock_config());

    engine.upsert_facts(vec![
        Fact::new("destination", "PAR"),
        Fact::new("cartTotal", 250),
    ]);
    engine.upsert_rulesets_from_json(metadata).unwrap();

    assert_eq!(
        engine.ruleset_status("rs-destination"),
        Some(RulesetStatus::Enabled)
    );
    assert_eq!(engine.active_actions().len(), 2);

    // 购物车金额跌破阈值：NOT 组翻转，动作被撤下
    engine.upsert_fact("cartTotal", 50);
    assert!(engine.active_actions().is_empty());

    engine.upsert_fact("cartTotal", 300);
    assert_eq!(engine.active_actions().len(), 2);
}

#[test]
fn test_summer_scenario_aggregate() {
    let mut engine = engine_with_summer_operator();
    engine.upsert_fact("date", "2024-07-01");
    engine.upsert_rulesets(vec![summer_ruleset()]);

    engine.enable_rule_set_for("R1").unwrap();
    assert_eq!(
        engine.active_actions(),
        &[Action::new("highlight", "summer-banner")]
    );

    // 日期移出夏季窗口：无需禁用/重启规则集
    engine.upsert_fact("date", "2024-12-25");
    assert!(engine.active_actions().is_empty());
}

#[test]
fn test_disable_isolation_between_rulesets() {
    let mut engine = engine_with_summer_operator();
    engine.upsert_facts(vec![
        Fact::new("date", "2024-07-01"),
        Fact::new("destination", "PAR"),
    ]);

    let paris = RuleSet::new(
        "R2",
        "巴黎资源",
        vec![Rule::new(
            "r-paris",
            "paris_assets",
            ConditionNode::binary("destination", "equals", Operand::literal("PAR")),
        )
        .with_actions(vec![Action::new("UPDATE_ASSET", "paris.jpg")])],
    );
    engine.upsert_rulesets(vec![summer_ruleset(), paris]);
    engine.enable_rule_set_for("R1").unwrap();
    engine.enable_rule_set_for("R2").unwrap();
    assert_eq!(engine.active_actions().len(), 2);

    // 禁用 R1 只撤下它自己的贡献
    engine.disable_rule_set_for("R1").unwrap();
    assert_eq!(
        engine.active_actions(),
        &[Action::new("UPDATE_ASSET", "paris.jpg")]
    );
}

#[test]
fn test_idempotent_reenable() {
    let mut engine = engine_with_summer_operator();
    engine.upsert_fact("date", "2024-07-01");
    engine.upsert_rulesets(vec![summer_ruleset()]);

    engine.enable_rule_set_for("R1").unwrap();
    let first = engine.active_actions().to_vec();
    let first_truth = engine.rule_truth("R1", "r-summer");

    engine.disable_rule_set_for("R1").unwrap();
    engine.enable_rule_set_for("R1").unwrap();

    assert_eq!(engine.active_actions(), first.as_slice());
    assert_eq!(engine.rule_truth("R1", "r-summer"), first_truth);
}

#[test]
fn test_rhs_fact_reference_drives_reeval() {
    let mut engine = RulesEngine::with_config(no_clock_config());
    engine.upsert_facts(vec![
        Fact::new("destination", "PAR"),
        Fact::new("preferredDestination", "NYC"),
    ]);

    let ruleset = RuleSet::new(
        "R-pref",
        "偏好目的地",
        vec![Rule::new(
            "r-match",
            "preferred_match",
            ConditionNode::binary(
                "destination",
                "equals",
                Operand::fact("preferredDestination"),
            ),
        )
        .with_actions(vec![Action::new("highlight", "preferred")])],
    )
    .enabled();
    engine.upsert_rulesets(vec![ruleset]);
    assert!(engine.active_actions().is_empty());

    // 只改右操作数引用的事实也要触发重算
    engine.upsert_fact("preferredDestination", "PAR");
    assert_eq!(engine.active_actions().len(), 1);
}

// ==================== 运行器与处理器分发 ====================

#[tokio::test]
async fn test_handler_receives_and_clears_actions() {
    let engine = engine_with_summer_operator();
    let handle = EngineRunner::spawn(engine);
    let (handler, mut calls) = forwarding_handler(&["highlight"]);

    handle.register_action_handler(handler).unwrap();
    handle.upsert_fact("date", "2024-07-01").unwrap();
    handle.upsert_rulesets(vec![summer_ruleset()]).unwrap();
    handle.enable_rule_set_for("R1").await.unwrap();

    let batch = calls.recv().await.unwrap();
    assert_eq!(batch, vec![Action::new("highlight", "summer-banner")]);

    // 日期移出窗口：覆盖式处理器收到空集合以清空覆盖
    handle.upsert_fact("date", "2024-12-25").unwrap();
    let batch = calls.recv().await.unwrap();
    assert!(batch.is_empty());

    handle.shutdown();
}

#[tokio::test]
async fn test_late_handler_not_starved() {
    let engine = engine_with_summer_operator();
    let handle = EngineRunner::spawn(engine);
    let mut actions = handle.watch_actions();

    handle.upsert_fact("date", "2024-07-01").unwrap();
    handle.upsert_rulesets(vec![summer_ruleset()]).unwrap();
    handle.enable_rule_set_for("R1").await.unwrap();
    actions.changed().await.unwrap();
    assert_eq!(actions.borrow().len(), 1);

    // 规则已为真之后才注册处理器
    let (handler, mut calls) = forwarding_handler(&["highlight"]);
    handle.register_action_handler(handler).unwrap();

    // 下一次触发分发的事实变化必须把当前全量动作带给晚注册的处理器
    handle.upsert_fact("date", "2024-08-01").unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(2), calls.recv())
        .await
        .expect("晚注册的处理器未在期限内收到动作")
        .unwrap();
    assert_eq!(batch, vec![Action::new("highlight", "summer-banner")]);

    handle.shutdown();
}

#[tokio::test]
async fn test_handlers_by_action_type() {
    let mut engine = RulesEngine::with_config(no_clock_config());
    engine.upsert_facts(vec![
        Fact::new("destination", "PAR"),
        Fact::new("language", "fr"),
    ]);

    let ruleset = RuleSet::new(
        "R-multi",
        "多动作类型",
        vec![
            Rule::new(
                "r-asset",
                "paris_asset",
                ConditionNode::binary("destination", "equals", Operand::literal("PAR")),
            )
            .with_actions(vec![Action::new("UPDATE_ASSET", "paris.jpg")]),
            Rule::new(
                "r-loc",
                "french_localisation",
                ConditionNode::binary("language", "equals", Operand::literal("fr")),
            )
            .with_actions(vec![Action::new("UPDATE_LOCALISATION", "fr-FR")]),
        ],
    )
    .enabled();
    engine.upsert_rulesets(vec![ruleset]);

    let handle = EngineRunner::spawn(engine);
    let (asset_handler, mut asset_calls) = forwarding_handler(&["UPDATE_ASSET"]);
    let (loc_handler, mut loc_calls) = forwarding_handler(&["UPDATE_LOCALISATION"]);
    handle.register_action_handler(asset_handler).unwrap();
    handle.register_action_handler(loc_handler).unwrap();

    // 触发一次分发：每个处理器只收到自己类型的动作
    handle.upsert_fact("destination", "NYC").unwrap();
    handle.upsert_fact("destination", "PAR").unwrap();

    let asset_batch = asset_calls.recv().await.unwrap();
    assert!(asset_batch
        .iter()
        .all(|action| action.action_type == "UPDATE_ASSET"));

    let loc_batch = loc_calls.recv().await.unwrap();
    assert!(loc_batch
        .iter()
        .all(|action| action.action_type == "UPDATE_LOCALISATION"));

    handle.shutdown();
}

#[tokio::test]
async fn test_unhandled_action_types_are_dropped_silently() {
    let engine = engine_with_summer_operator();
    let handle = EngineRunner::spawn(engine);
    let mut actions = handle.watch_actions();

    // 没有注册任何处理器：聚合仍然更新，不报错
    handle.upsert_fact("date", "2024-07-01").unwrap();
    handle.upsert_rulesets(vec![summer_ruleset()]).unwrap();
    handle.enable_rule_set_for("R1").await.unwrap();

    actions.changed().await.unwrap();
    assert_eq!(actions.borrow().len(), 1);

    handle.shutdown();
}

// ==================== 调试与元数据可见性 ====================

#[tokio::test]
async fn test_debug_events_via_handle() {
    let config = EngineConfig {
        clock: ClockConfig {
            enabled: false,
            interval_ms: 30_000,
        },
        debug: rules_engine::DebugConfig {
            enabled: true,
            events_stack_limit: 50,
        },
        ..EngineConfig::default()
    };
    let mut engine = RulesEngine::with_config(config);
    let during_summer = Operator::bind_rhs(
        "duringSummer",
        engine.operator("inRangeDate").unwrap(),
        json!(["2024-06-01", "2024-08-31"]),
    );
    engine.upsert_operators(vec![during_summer]);

    let handle = EngineRunner::spawn(engine);
    let mut actions = handle.watch_actions();

    handle.upsert_fact("date", "2024-07-01").unwrap();
    handle.upsert_rulesets(vec![summer_ruleset()]).unwrap();
    handle.enable_rule_set_for("R1").await.unwrap();
    actions.changed().await.unwrap();

    let events = handle.debug_events();
    assert!(!events.is_empty());

    handle.shutdown();
}
