//! 引擎配置
//!
//! 支持 TOML 配置文件加载与环境变量覆盖，所有字段都有合理默认值，
//! 零配置即可启动。

use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

fn default_instance_name() -> String {
    "rules-engine".to_string()
}

fn default_clock_enabled() -> bool {
    true
}

fn default_clock_interval_ms() -> u64 {
    30_000
}

fn default_events_stack_limit() -> usize {
    100
}

/// 时钟事实生产者配置
///
/// 时钟事实与外部 upsert 走同一条事实变更通道，节拍是配置项而不是硬编码。
#[derive(Debug, Clone, Deserialize)]
pub struct ClockConfig {
    /// 是否启动内置时钟事实生产者
    #[serde(default = "default_clock_enabled")]
    pub enabled: bool,
    /// 时钟事实重发间隔（毫秒）
    #[serde(default = "default_clock_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            enabled: default_clock_enabled(),
            interval_ms: default_clock_interval_ms(),
        }
    }
}

/// 调试配置
#[derive(Debug, Clone, Deserialize)]
pub struct DebugConfig {
    /// 是否记录调试事件
    #[serde(default)]
    pub enabled: bool,
    /// 调试事件环形缓冲容量
    #[serde(default = "default_events_stack_limit")]
    pub events_stack_limit: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            events_stack_limit: default_events_stack_limit(),
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// 引擎实例名，用于日志标识
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            clock: ClockConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的覆盖先加载的同名配置项）：
    /// 1. 指定的 TOML 文件（可缺失）
    /// 2. 环境变量（RULES_ENGINE_ 前缀，如 RULES_ENGINE_CLOCK__INTERVAL_MS -> clock.interval_ms）
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("RULES_ENGINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
