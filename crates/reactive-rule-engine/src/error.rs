//! 规则引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("规则集格式错误 [{ruleset_id}]: {reason}")]
    MalformedRuleset { ruleset_id: String, reason: String },

    #[error("规则集未注册: {0}")]
    UnknownRuleset(String),

    #[error("配置加载失败: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("引擎已停止，命令无法投递")]
    EngineStopped,
}

impl EngineError {
    /// 构造规则集格式错误
    pub fn malformed(ruleset_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRuleset {
            ruleset_id: ruleset_id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
