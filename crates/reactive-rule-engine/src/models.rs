//! 规则引擎领域模型
//!
//! 定义事实、操作数、条件树、规则、规则集与动作的序列化结构。
//! 规则集元数据由外部工具离线产出，这里只约定 JSON 形状，不关心其来源。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Fact — 命名事实
// ---------------------------------------------------------------------------

/// 事实：一个随时间变化的命名值
///
/// 事实名在单个引擎实例内全局唯一，更新是整体替换而不是合并。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub name: String,
    pub value: Value,
}

impl Fact {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Operand — 条件右操作数
// ---------------------------------------------------------------------------

/// 条件操作数：字面量或事实引用
///
/// 事实引用可携带可选的点号路径（如 `profile.membership.level`），
/// 在事实的 JSON 值内部取子字段参与比较。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operand {
    /// 引用另一个事实的当前值
    Fact {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// 规则中内联的字面量
    Literal { value: Value },
}

impl Operand {
    pub fn fact(name: impl Into<String>) -> Self {
        Self::Fact {
            value: name.into(),
            path: None,
        }
    }

    pub fn fact_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Fact {
            value: name.into(),
            path: Some(path.into()),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Condition — 条件树
// ---------------------------------------------------------------------------

/// 布尔组合子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
    Not,
}

impl std::fmt::Display for Combinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Not => write!(f, "NOT"),
        }
    }
}

/// 条件节点（叶子条件或布尔组合组）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionNode {
    Condition(ConditionLeaf),
    Group(ConditionGroup),
}

impl ConditionNode {
    /// 一元叶子条件（无右操作数）
    pub fn leaf(fact: impl Into<String>, operator: impl Into<String>) -> Self {
        Self::Condition(ConditionLeaf {
            fact: fact.into(),
            path: None,
            operator: operator.into(),
            rhs: None,
        })
    }

    /// 二元叶子条件
    pub fn binary(fact: impl Into<String>, operator: impl Into<String>, rhs: Operand) -> Self {
        Self::Condition(ConditionLeaf {
            fact: fact.into(),
            path: None,
            operator: operator.into(),
            rhs: Some(rhs),
        })
    }
}

/// 叶子条件：事实 / 操作符 / 可选右操作数 三元组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionLeaf {
    /// 左操作数引用的事实名
    pub fact: String,
    /// 在事实 JSON 值内部取值的点号路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// 操作符名，求值时在操作符注册表中解析
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs: Option<Operand>,
}

/// 组合组节点
///
/// NOT 组必须恰好包含一个子节点，AND/OR 组不允许为空，均在启用规则集时校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub combinator: Combinator,
    pub children: Vec<ConditionNode>,
}

impl ConditionGroup {
    pub fn new(combinator: Combinator, children: Vec<ConditionNode>) -> Self {
        Self {
            combinator,
            children,
        }
    }

    pub fn and(children: Vec<ConditionNode>) -> ConditionNode {
        ConditionNode::Group(Self::new(Combinator::And, children))
    }

    pub fn or(children: Vec<ConditionNode>) -> ConditionNode {
        ConditionNode::Group(Self::new(Combinator::Or, children))
    }

    pub fn not(child: ConditionNode) -> ConditionNode {
        ConditionNode::Group(Self::new(Combinator::Not, vec![child]))
    }
}

// ---------------------------------------------------------------------------
// Action — 动作
// ---------------------------------------------------------------------------

/// 动作：规则为真时产出的不透明指令
///
/// 引擎不解释 `value`，只按 `action_type` 路由给声明支持该类型的处理器。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub action_type: String,
    pub value: Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            action_type: action_type.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule / RuleSet — 规则与规则集
// ---------------------------------------------------------------------------

/// 规则：条件为真时贡献全部动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub condition: ConditionNode,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: ConditionNode) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            condition,
            actions: Vec::new(),
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }
}

/// 规则集生效时间窗
///
/// 窗口之外规则集不贡献任何动作；边界闭区间。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl ValidityRange {
    /// 判断给定时刻是否落在窗口内
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if at > to {
                return false;
            }
        }
        true
    }
}

/// 规则集：可独立启用/禁用的一组规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    pub id: String,
    pub name: String,
    pub rules: Vec<Rule>,
    /// 注册时的初始启用状态
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_range: Option<ValidityRange>,
}

impl RuleSet {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rules,
            enabled: false,
            validity_range: None,
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    pub fn with_validity_range(mut self, range: ValidityRange) -> Self {
        self.validity_range = Some(range);
        self
    }
}
