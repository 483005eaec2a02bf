//! Agent 管理器
//!
//! 负责注册 Agent 与其 AgentConfig，并为每个 Agent 建一套独立的韧性包装（超时、熔断、舱壁、重试）。
//! execute_agent 不会因为下游失败而返回 Err：失败被记录进统计并转成 success = false 的 AgentResponse；
//! 只有未注册这类调用方错误才返回 AgentError。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{AgentConfig, AgentRequest, AgentResponse, TravelAgent};
use crate::core::{AgentError, ResilienceError};
use crate::resilience::{
    BulkheadConfig, CacheStats, CircuitBreakerConfig, CircuitState, ResiliencePolicy,
    ResilienceStats, ResilienceWrapper, RetryConfig, TtlCache,
};

/// 各 Agent 共享的韧性默认值（AgentConfig 未覆盖的部分）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerSettings {
    pub retry_multiplier: f64,
    pub retry_max_delay: Duration,
    pub retry_jitter: bool,
    pub circuit_success_threshold: u32,
    pub bulkhead: BulkheadConfig,
    pub response_cache_capacity: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            retry_multiplier: 2.0,
            retry_max_delay: Duration::from_secs(5),
            retry_jitter: true,
            circuit_success_threshold: 2,
            bulkhead: BulkheadConfig::default(),
            response_cache_capacity: 256,
        }
    }
}

/// 健康分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// 单个 Agent 的调用统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    /// 含重试在内的总尝试次数
    pub attempts: u64,
    pub cache_hits: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
    pub last_error: Option<String>,
}

impl AgentMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.failures as f64 / self.invocations as f64
        }
    }

    fn record(&mut self, response: &AgentResponse, attempts: u32) {
        self.invocations += 1;
        self.attempts += attempts as u64;
        self.total_latency_ms += response.processing_time_ms;
        self.avg_latency_ms = self.total_latency_ms as f64 / self.invocations as f64;
        if response.success {
            self.successes += 1;
        } else {
            self.failures += 1;
            self.last_error = response.error.clone();
        }
    }
}

/// Agent 健康报告
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub status: HealthStatus,
    pub error_rate: f64,
    pub circuit_state: CircuitState,
    pub invocations: u64,
    pub avg_latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
}

/// 熔断打开或错误率 > 50% 为 Unhealthy；半开或错误率 > 20% 为 Degraded
pub fn classify_health(error_rate: f64, circuit_state: CircuitState) -> HealthStatus {
    match circuit_state {
        CircuitState::Open => HealthStatus::Unhealthy,
        _ if error_rate > 0.5 => HealthStatus::Unhealthy,
        CircuitState::HalfOpen => HealthStatus::Degraded,
        _ if error_rate > 0.2 => HealthStatus::Degraded,
        CircuitState::Closed => HealthStatus::Healthy,
    }
}

/// 一次待执行的调用
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub agent_id: String,
    pub request: AgentRequest,
}

struct RegisteredAgent {
    agent: Arc<dyn TravelAgent>,
    config: AgentConfig,
    resilience: ResilienceWrapper,
}

/// Agent 注册表 + 韧性执行
pub struct AgentManager {
    settings: ManagerSettings,
    agents: RwLock<HashMap<String, Arc<RegisteredAgent>>>,
    metrics: Mutex<HashMap<String, AgentMetrics>>,
    response_cache: TtlCache<AgentResponse>,
}

impl AgentManager {
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            response_cache: TtlCache::new(
                "agent-responses",
                settings.response_cache_capacity,
                Duration::from_secs(300),
            ),
            settings,
            agents: RwLock::new(HashMap::new()),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    fn metrics_lock(&self) -> MutexGuard<'_, HashMap<String, AgentMetrics>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn policy_for(&self, config: &AgentConfig) -> ResiliencePolicy {
        ResiliencePolicy {
            timeout: config.timeout,
            retry: RetryConfig {
                max_attempts: config.retry_attempts.max(1),
                base_delay: config.retry_delay,
                multiplier: self.settings.retry_multiplier,
                max_delay: self.settings.retry_max_delay,
                jitter: self.settings.retry_jitter,
            },
            circuit: CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_threshold,
                success_threshold: self.settings.circuit_success_threshold,
                recovery_timeout: config.circuit_breaker_reset,
            },
            bulkhead: self.settings.bulkhead,
        }
    }

    /// 注册 Agent；AgentConfig 指定的能力必须在 Agent 的能力集合内
    pub async fn register(&self, agent: Arc<dyn TravelAgent>, config: AgentConfig) -> Result<(), AgentError> {
        let id = agent.id().to_string();
        if !agent.supports(config.capability) {
            return Err(AgentError::UnsupportedCapability {
                agent: id,
                capability: config.capability.to_string(),
            });
        }

        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return Err(AgentError::DuplicateAgent(id));
        }

        let resilience = ResilienceWrapper::new(id.clone(), self.policy_for(&config));
        agents.insert(
            id.clone(),
            Arc::new(RegisteredAgent {
                agent,
                config,
                resilience,
            }),
        );
        self.metrics_lock().entry(id.clone()).or_default();
        tracing::info!(agent = %id, capability = %config.capability, priority = config.priority, "agent registered");
        Ok(())
    }

    async fn entry(&self, agent_id: &str) -> Result<Arc<RegisteredAgent>, AgentError> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AgentError::NotRegistered(agent_id.to_string()))
    }

    /// 已注册 Agent 的 (id, config)，按 id 排序
    pub async fn agent_configs(&self) -> Vec<(String, AgentConfig)> {
        let agents = self.agents.read().await;
        let mut configs: Vec<_> = agents
            .iter()
            .map(|(id, entry)| (id.clone(), entry.config))
            .collect();
        configs.sort_by(|a, b| a.0.cmp(&b.0));
        configs
    }

    /// 执行一个 Agent：先查响应缓存，再经 timeout → 熔断 → 舱壁 → 重试 调用
    pub async fn execute_agent(&self, agent_id: &str, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let entry = self.entry(agent_id).await?;
        let capability = entry.config.capability;
        let start = Instant::now();

        let cache_key = (!entry.config.cache_ttl.is_zero())
            .then(|| format!("{agent_id}:{capability}:{}", request.cache_key()));
        if let Some(key) = &cache_key {
            if let Some(mut hit) = self.response_cache.get(key).await {
                self.metrics_lock().entry(agent_id.to_string()).or_default().cache_hits += 1;
                tracing::debug!(agent = %agent_id, "agent response cache hit");
                hit.cached = true;
                hit.processing_time_ms = start.elapsed().as_millis() as u64;
                hit.retry_count = 0;
                hit.timestamp = Utc::now();
                return Ok(hit);
            }
        }

        let agent = Arc::clone(&entry.agent);
        let (result, attempts) = entry
            .resilience
            .execute_counted(|attempt| {
                let agent = Arc::clone(&agent);
                async move {
                    if attempt > 1 {
                        tracing::debug!(agent = %agent.id(), attempt, "retrying agent call");
                    }
                    agent
                        .invoke(capability, request)
                        .await
                        .map_err(ResilienceError::Operation)
                }
            })
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let retry_count = attempts.saturating_sub(1);

        let response = match result {
            Ok(output) => AgentResponse::succeeded(agent_id, output, elapsed_ms, retry_count),
            Err(err) => {
                tracing::warn!(agent = %agent_id, attempts, error = %err, "agent call failed");
                AgentResponse::failed(agent_id, err.to_string(), elapsed_ms, retry_count)
            }
        };

        self.metrics_lock()
            .entry(agent_id.to_string())
            .or_default()
            .record(&response, attempts);

        if let (Some(key), true) = (cache_key, response.success) {
            self.response_cache
                .set(key, response.clone(), entry.config.cache_ttl)
                .await;
        }

        Ok(response)
    }

    /// 受限并发执行一组调用，结果与输入顺序一致；未注册的 Agent 转为失败响应
    pub async fn execute_parallel(&self, invocations: Vec<AgentInvocation>, max_concurrency: usize) -> Vec<AgentResponse> {
        stream::iter(invocations)
            .map(|invocation| async move {
                match self.execute_agent(&invocation.agent_id, &invocation.request).await {
                    Ok(response) => response,
                    Err(err) => AgentResponse::failed(invocation.agent_id.clone(), err.to_string(), 0, 0),
                }
            })
            .buffered(max_concurrency.max(1))
            .collect()
            .await
    }

    pub fn metrics(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.metrics_lock().get(agent_id).cloned()
    }

    pub async fn agent_health(&self, agent_id: &str) -> Result<AgentHealth, AgentError> {
        let entry = self.entry(agent_id).await?;
        Ok(self.health_of(agent_id, &entry))
    }

    fn health_of(&self, agent_id: &str, entry: &RegisteredAgent) -> AgentHealth {
        let metrics = self.metrics(agent_id).unwrap_or_default();
        let circuit_state = entry.resilience.breaker().state();
        let error_rate = metrics.error_rate();
        AgentHealth {
            agent_id: agent_id.to_string(),
            status: classify_health(error_rate, circuit_state),
            error_rate,
            circuit_state,
            invocations: metrics.invocations,
            avg_latency_ms: metrics.avg_latency_ms,
            probe_error: None,
        }
    }

    /// 所有 Agent 的健康状况（仅基于统计，不调用 Agent）
    pub async fn all_health(&self) -> Vec<AgentHealth> {
        let entries = self.entries().await;
        entries
            .iter()
            .map(|(id, entry)| self.health_of(id, entry))
            .collect()
    }

    /// 在统计之外再调用每个 Agent 的 health 自检；自检失败至少降为 Degraded
    pub async fn probe_health(&self) -> Vec<AgentHealth> {
        let entries = self.entries().await;
        let mut reports = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            let mut report = self.health_of(&id, &entry);
            let probe = tokio::time::timeout(entry.config.timeout.max(Duration::from_millis(1)), entry.agent.health()).await;
            let probe_error = match probe {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(_) => Some(format!("health probe timed out after {:?}", entry.config.timeout)),
            };
            if probe_error.is_some() {
                report.status = report.status.max(HealthStatus::Degraded);
                report.probe_error = probe_error;
            }
            reports.push(report);
        }
        reports
    }

    async fn entries(&self) -> Vec<(String, Arc<RegisteredAgent>)> {
        let agents = self.agents.read().await;
        let mut entries: Vec<_> = agents
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn resilience_stats(&self) -> Vec<ResilienceStats> {
        self.entries()
            .await
            .iter()
            .map(|(_, entry)| entry.resilience.stats())
            .collect()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.response_cache.stats().await
    }

    /// 清掉过期的响应缓存
    pub async fn sweep_cache(&self) -> usize {
        self.response_cache.cleanup().await
    }
}
