//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TRIPWISE__*` 覆盖（双下划线表示嵌套，
//! 如 `TRIPWISE__COORDINATOR__MAX_PARALLEL_AGENTS=8`、`TRIPWISE__AGENTS__FLIGHTS__TIMEOUT_MS=3000`）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::agents::{AgentConfig, ManagerSettings, TravelAgent};
use crate::coordinator::{CoordinatorSettings, CostRates};
use crate::resilience::BulkheadConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub cache: CacheSection,
    pub coordinator: CoordinatorSection,
    pub resilience: ResilienceSection,
    /// [agents.<id>] 段：按 Agent id 覆盖默认 AgentConfig
    pub agents: HashMap<String, AgentOverride>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// RUST_LOG 未设置时的默认日志级别
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "tripwise".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// [cache] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// 行程缓存容量
    pub max_entries: usize,
    /// Agent 响应缓存容量
    pub agent_response_capacity: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 100,
            agent_response_capacity: 256,
            cleanup_interval_secs: 60,
        }
    }
}

/// [coordinator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub plan_cache_ttl_secs: u64,
    pub health_check_interval_secs: u64,
    pub max_parallel_agents: usize,
    /// 保留的请求指标条数
    pub metrics_retention: usize,
    pub max_trip_nights: i64,
    pub meal_rate_per_day: f64,
    pub activity_rate_per_day: f64,
    pub insurance_rate: f64,
    pub currency: String,
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            plan_cache_ttl_secs: 15 * 60,
            health_check_interval_secs: 60,
            max_parallel_agents: 4,
            metrics_retention: 1000,
            max_trip_nights: 60,
            meal_rate_per_day: 45.0,
            activity_rate_per_day: 30.0,
            insurance_rate: 0.05,
            currency: "USD".to_string(),
        }
    }
}

/// [resilience] 段：所有 Agent 共享的重试、熔断恢复与舱壁参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceSection {
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
    /// 半开状态下连续成功多少次后闭合
    pub circuit_success_threshold: u32,
    pub bulkhead_max_concurrency: usize,
    pub bulkhead_queue_size: usize,
    pub bulkhead_queue_timeout_ms: u64,
}

impl Default for ResilienceSection {
    fn default() -> Self {
        Self {
            retry_multiplier: 2.0,
            retry_max_delay_ms: 5000,
            retry_jitter: true,
            circuit_success_threshold: 2,
            bulkhead_max_concurrency: 4,
            bulkhead_queue_size: 16,
            bulkhead_queue_timeout_ms: 10_000,
        }
    }
}

/// [agents.<id>] 段；未设置的字段沿用 Agent 自带的默认配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentOverride {
    pub enabled: bool,
    pub timeout_ms: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub circuit_breaker_threshold: Option<u32>,
    pub circuit_breaker_reset_secs: Option<u64>,
    /// 0 表示关闭响应缓存
    pub cache_ttl_secs: Option<u64>,
    pub priority: Option<u8>,
}

impl Default for AgentOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: None,
            retry_attempts: None,
            retry_delay_ms: None,
            circuit_breaker_threshold: None,
            circuit_breaker_reset_secs: None,
            cache_ttl_secs: None,
            priority: None,
        }
    }
}

impl AgentOverride {
    pub fn apply(&self, mut config: AgentConfig) -> AgentConfig {
        if let Some(ms) = self.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(threshold) = self.circuit_breaker_threshold {
            config.circuit_breaker_threshold = threshold;
        }
        if let Some(secs) = self.circuit_breaker_reset_secs {
            config.circuit_breaker_reset = Duration::from_secs(secs);
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(priority) = self.priority {
            config.priority = priority;
        }
        config
    }
}

impl AppConfig {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        let c = &self.coordinator;
        CoordinatorSettings {
            plan_cache_ttl: Duration::from_secs(c.plan_cache_ttl_secs),
            plan_cache_capacity: self.cache.max_entries,
            cache_cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs.max(1)),
            health_check_interval: Duration::from_secs(c.health_check_interval_secs.max(1)),
            max_parallel_agents: c.max_parallel_agents.max(1),
            metrics_retention: c.metrics_retention,
            max_trip_nights: c.max_trip_nights,
            rates: CostRates {
                meal_per_day: c.meal_rate_per_day,
                activity_per_day: c.activity_rate_per_day,
                insurance_rate: c.insurance_rate,
                currency: c.currency.clone(),
            },
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        let r = &self.resilience;
        ManagerSettings {
            retry_multiplier: r.retry_multiplier,
            retry_max_delay: Duration::from_millis(r.retry_max_delay_ms),
            retry_jitter: r.retry_jitter,
            circuit_success_threshold: r.circuit_success_threshold,
            bulkhead: BulkheadConfig {
                max_concurrency: r.bulkhead_max_concurrency,
                queue_size: r.bulkhead_queue_size,
                queue_timeout: Duration::from_millis(r.bulkhead_queue_timeout_ms),
            },
            response_cache_capacity: self.cache.agent_response_capacity,
        }
    }

    /// 对 Agent 列表应用 [agents.<id>] 覆盖，并去掉 enabled = false 的 Agent
    pub fn configure_agents(
        &self,
        agents: Vec<(Arc<dyn TravelAgent>, AgentConfig)>,
    ) -> Vec<(Arc<dyn TravelAgent>, AgentConfig)> {
        agents
            .into_iter()
            .filter_map(|(agent, config)| match self.agents.get(agent.id()) {
                Some(over) if !over.enabled => {
                    tracing::info!(agent = %agent.id(), "agent disabled by configuration");
                    None
                }
                Some(over) => {
                    let config = over.apply(config);
                    Some((agent, config))
                }
                None => Some((agent, config)),
            })
            .collect()
    }
}

/// 从 config 目录加载配置，环境变量 TRIPWISE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，追加该文件（可覆盖前面的键；文件必须存在）
/// 3. 最后叠加环境变量 TRIPWISE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TRIPWISE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
