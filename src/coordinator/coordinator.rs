//! 行程规划协调器
//!
//! plan_trip 流程：校验 → 查行程缓存 → 按优先级分三阶段调用 Agent（阶段内并行，阶段间串行，
//! 后续阶段能看到之前阶段得到的片段）→ 合成行程与费用 → 写缓存 → 定稿指标。
//! 单个 Agent 失败只会成为行程上的告警；只有请求校验失败才返回错误。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::metrics::{AgentTiming, MetricsStore, ProcessingMetrics};
use super::synthesis::{compute_cost, synthesize};
use super::{CoordinatorSettings, ExecutionPlan, TripPlan, TripRequest};
use crate::agents::{
    AgentConfig, AgentHealth, AgentInvocation, AgentManager, AgentResponse, HealthStatus, ManagerSettings,
    TravelAgent,
};
use crate::core::{PlanError, ShutdownCleanup};
use crate::resilience::{CacheStats, ResilienceStats, TtlCache};

/// 系统健康汇总
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub agents: Vec<AgentHealth>,
    pub plan_cache: CacheStats,
    pub agent_cache: CacheStats,
    pub resilience: Vec<ResilienceStats>,
    pub tracked_requests: usize,
    pub checked_at: DateTime<Utc>,
}

/// 行程规划协调器
pub struct TravelCoordinator {
    settings: CoordinatorSettings,
    agents: Arc<AgentManager>,
    plan_cache: Arc<TtlCache<TripPlan>>,
    metrics: MetricsStore,
    shutdown_token: CancellationToken,
    closed: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TravelCoordinator {
    pub fn new(agents: Arc<AgentManager>, settings: CoordinatorSettings) -> Self {
        Self {
            plan_cache: Arc::new(TtlCache::new(
                "trip-plans",
                settings.plan_cache_capacity,
                settings.plan_cache_ttl,
            )),
            metrics: MetricsStore::new(settings.metrics_retention),
            settings,
            agents,
            shutdown_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }
    }

    /// 新建 AgentManager 并注册给定 Agent
    pub async fn with_agents(
        settings: CoordinatorSettings,
        manager_settings: ManagerSettings,
        agents: Vec<(Arc<dyn TravelAgent>, AgentConfig)>,
    ) -> Result<Self, PlanError> {
        let manager = Arc::new(AgentManager::new(manager_settings));
        for (agent, config) in agents {
            manager.register(agent, config).await?;
        }
        Ok(Self::new(manager, settings))
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn agent_manager(&self) -> &Arc<AgentManager> {
        &self.agents
    }

    /// 规划一次行程
    pub async fn plan_trip(&self, request: &TripRequest) -> Result<TripPlan, PlanError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PlanError::ShutDown);
        }
        request.validate(self.settings.max_trip_nights)?;

        let start = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        self.metrics.begin(&request_id);

        let cache_key = request.cache_key();
        if let Some(mut plan) = self.plan_cache.get(&cache_key).await {
            plan.cached = true;
            plan.request_id = request_id.clone();
            plan.processing_time_ms = start.elapsed().as_millis() as u64;
            self.metrics
                .finish(&request_id, true, plan.warnings.len(), plan.processing_time_ms);
            tracing::info!(request_id = %request_id, plan_id = %plan.id, "trip plan served from cache");
            return Ok(plan);
        }

        tracing::info!(
            request_id = %request_id,
            destination = %request.destination.trim(),
            start = %request.start_date,
            end = %request.end_date,
            travelers = request.family.members.len(),
            "planning trip"
        );

        let execution = ExecutionPlan::from_configs(&self.agents.agent_configs().await);
        let responses = self.run_phases(&request_id, request, &execution).await;

        let mut synthesis = synthesize(&responses);
        let travelers = request.family.members.len();
        let cost = compute_cost(&synthesis.segments, travelers, request.nights(), &self.settings.rates);
        if let Some(budget) = request.effective_budget() {
            if cost.total > budget {
                synthesis.warnings.push(format!(
                    "Estimated total {:.2} {} exceeds budget {:.2}",
                    cost.total, cost.currency, budget
                ));
            }
        }

        let processing_time_ms = start.elapsed().as_millis() as u64;
        let plan = TripPlan {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request_id.clone(),
            destination: request.destination.trim().to_string(),
            origin: request.effective_origin().map(str::to_string),
            start_date: request.start_date,
            end_date: request.end_date,
            travelers,
            segments: synthesis.segments,
            advisories: synthesis.advisories,
            warnings: synthesis.warnings,
            cost,
            confidence: synthesis.confidence,
            agents_consulted: synthesis.agents_consulted,
            processing_time_ms,
            cached: false,
            created_at: Utc::now(),
        };

        self.plan_cache
            .set(cache_key, plan.clone(), self.settings.plan_cache_ttl)
            .await;
        self.metrics
            .finish(&request_id, false, plan.warnings.len(), processing_time_ms);

        if plan.warnings.is_empty() {
            tracing::info!(request_id = %request_id, plan_id = %plan.id, total = plan.cost.total, elapsed_ms = processing_time_ms, "trip planned");
        } else {
            tracing::warn!(
                request_id = %request_id,
                plan_id = %plan.id,
                warnings = plan.warnings.len(),
                elapsed_ms = processing_time_ms,
                "trip planned with warnings"
            );
        }
        Ok(plan)
    }

    /// 逐阶段执行；每个阶段的请求携带之前所有成功片段作为上下文
    async fn run_phases(&self, request_id: &str, request: &TripRequest, plan: &ExecutionPlan) -> Vec<AgentResponse> {
        let base = request.to_agent_request(request_id);
        let mut context = Vec::new();
        let mut all = Vec::with_capacity(plan.agent_count());

        for (index, agent_ids) in plan.phases().into_iter().enumerate() {
            if agent_ids.is_empty() {
                continue;
            }
            let phase = index as u8 + 1;
            tracing::debug!(request_id, phase, agents = ?agent_ids, "running phase");

            let invocations = agent_ids
                .iter()
                .map(|agent_id| {
                    let mut request = base.clone();
                    request.context = context.clone();
                    AgentInvocation {
                        agent_id: agent_id.clone(),
                        request,
                    }
                })
                .collect();
            let responses = self
                .agents
                .execute_parallel(invocations, self.settings.max_parallel_agents)
                .await;

            for response in &responses {
                self.metrics.record_agent(
                    request_id,
                    AgentTiming {
                        agent_id: response.agent_id.clone(),
                        phase,
                        duration_ms: response.processing_time_ms,
                        success: response.success,
                        retry_count: response.retry_count,
                        cached: response.cached,
                    },
                );
                if let (true, Some(data)) = (response.success, &response.data) {
                    context.extend(data.segments.iter().cloned());
                }
            }
            all.extend(responses);
        }
        all
    }

    pub fn metrics(&self, request_id: &str) -> Option<ProcessingMetrics> {
        self.metrics.get(request_id)
    }

    pub async fn plan_cache_stats(&self) -> CacheStats {
        self.plan_cache.stats().await
    }

    pub async fn clear_plan_cache(&self) {
        self.plan_cache.clear().await;
    }

    /// 汇总 Agent 健康、缓存与韧性统计；整体状态取最差的 Agent
    pub async fn system_health(&self) -> SystemHealth {
        let agents = self.agents.all_health().await;
        let status = agents
            .iter()
            .map(|h| h.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        SystemHealth {
            status,
            agents,
            plan_cache: self.plan_cache.stats().await,
            agent_cache: self.agents.cache_stats().await,
            resilience: self.agents.resilience_stats().await,
            tracked_requests: self.metrics.len(),
            checked_at: Utc::now(),
        }
    }

    /// 启动缓存清理与健康巡检；重复调用无效果
    pub fn start_background_tasks(&self) {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if !background.is_empty() || self.shutdown_token.is_cancelled() {
            return;
        }
        background.push(
            self.plan_cache
                .spawn_cleanup(self.settings.cache_cleanup_interval, self.shutdown_token.child_token()),
        );
        background.push(spawn_health_monitor(
            Arc::clone(&self.agents),
            self.settings.health_check_interval,
            self.shutdown_token.child_token(),
        ));
        tracing::info!(
            health_interval_secs = self.settings.health_check_interval.as_secs(),
            "background tasks started"
        );
    }

    pub fn background_task_count(&self) -> usize {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 停止后台任务并等待其退出；之后的 plan_trip 返回 ShutDown
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_token.cancel();
        let handles = std::mem::take(&mut *self.background.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("background task ended abnormally: {}", e);
            }
        }
        tracing::info!("travel coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// 周期性探测 Agent 健康，对非 Healthy 的 Agent 打 warn，并顺带清理 Agent 响应缓存
fn spawn_health_monitor(agents: Arc<AgentManager>, every: Duration, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    for health in agents.probe_health().await {
                        if health.status != HealthStatus::Healthy {
                            tracing::warn!(
                                agent = %health.agent_id,
                                status = ?health.status,
                                error_rate = health.error_rate,
                                circuit = ?health.circuit_state,
                                probe_error = health.probe_error.as_deref().unwrap_or(""),
                                "agent not healthy"
                            );
                        }
                    }
                    agents.sweep_cache().await;
                }
            }
        }
        tracing::debug!("health monitor stopped");
    })
}

#[async_trait::async_trait]
impl ShutdownCleanup for TravelCoordinator {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.shutdown().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TravelCoordinator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::default_agents;
    use crate::coordinator::{FamilyMember, FamilyProfile};
    use crate::core::AgentError;
    use chrono::NaiveDate;

    async fn coordinator() -> TravelCoordinator {
        TravelCoordinator::with_agents(CoordinatorSettings::default(), ManagerSettings::default(), default_agents())
            .await
            .unwrap()
    }

    fn request() -> TripRequest {
        TripRequest {
            destination: "Lisbon".into(),
            origin: Some("Boston".into()),
            start_date: NaiveDate::from_ymd_opt(2026, 4, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 4, 16).unwrap(),
            family: FamilyProfile {
                family_name: "Silva".into(),
                members: vec![
                    FamilyMember { name: "Ana".into(), age: 41 },
                    FamilyMember { name: "Leo".into(), age: 9 },
                ],
                budget: None,
                home_address: None,
            },
            budget: None,
            preferences: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_trip_runs_all_phases() {
        let coordinator = coordinator().await;
        let plan = coordinator.plan_trip(&request()).await.unwrap();

        assert!(!plan.cached);
        assert!(plan.warnings.is_empty(), "{:?}", plan.warnings);
        assert_eq!(plan.agents_consulted, vec!["flights", "hotels", "weather", "cruises", "deals"]);
        assert!(plan.segments.iter().any(|s| s.kind == crate::agents::SegmentKind::Deal));
        assert!(plan.cost.discounts > 0.0);
        assert!(plan.segments.windows(2).all(|w| w[0].start_date <= w[1].start_date));

        let metrics = coordinator.metrics(&plan.request_id).unwrap();
        assert!(!metrics.cache_hit);
        assert_eq!(metrics.agent_timings.len(), 5);
        assert_eq!(metrics.agent_timings.last().unwrap().phase, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_returns_same_plan_id() {
        let coordinator = coordinator().await;
        let first = coordinator.plan_trip(&request()).await.unwrap();

        let mut again = request();
        again.destination = " lisbon ".into();
        let second = coordinator.plan_trip(&again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.cached);
        assert_eq!(second.processing_time_ms, 0);
        assert_ne!(first.request_id, second.request_id);
        assert!(coordinator.metrics(&second.request_id).unwrap().cache_hit);

        tokio::time::advance(Duration::from_secs(15 * 60 + 1)).await;
        let third = coordinator.plan_trip(&request()).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_budget_warning() {
        let coordinator = coordinator().await;
        let mut req = request();
        req.budget = Some(100.0);
        let plan = coordinator.plan_trip(&req).await.unwrap();
        assert!(plan.warnings.iter().any(|w| w.contains("exceeds budget")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_background_tasks() {
        let coordinator = coordinator().await;
        coordinator.start_background_tasks();
        coordinator.start_background_tasks();
        assert_eq!(coordinator.background_task_count(), 2);

        coordinator.shutdown().await;
        assert_eq!(coordinator.background_task_count(), 0);
        assert!(coordinator.is_shut_down());
        assert!(matches!(coordinator.plan_trip(&request()).await, Err(PlanError::ShutDown)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_sweeps_agent_cache() {
        let coordinator = coordinator().await;
        coordinator.plan_trip(&request()).await.unwrap();
        // flights、hotels 缓存 300s，weather 缓存 1800s
        assert_eq!(coordinator.agent_manager().cache_stats().await.size, 3);

        coordinator.start_background_tasks();
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(coordinator.agent_manager().cache_stats().await.expirations, 0);

        // 300s 之后的巡检清掉已过期的 flights 与 hotels
        tokio::time::sleep(Duration::from_secs(62)).await;
        let stats = coordinator.agent_manager().cache_stats().await;
        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.size, 1);

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_cache_hit_recorded_in_timings() {
        let coordinator = coordinator().await;
        let first = coordinator.plan_trip(&request()).await.unwrap();
        coordinator.clear_plan_cache().await;
        let second = coordinator.plan_trip(&request()).await.unwrap();
        assert!(!second.cached);

        let timing = |request_id: &str, agent: &str| {
            coordinator
                .metrics(request_id)
                .unwrap()
                .agent_timings
                .into_iter()
                .find(|t| t.agent_id == agent)
                .unwrap()
        };
        let fresh = timing(&first.request_id, "flights");
        assert!(!fresh.cached);
        assert!(fresh.duration_ms >= 120, "{}", fresh.duration_ms);

        let hit = timing(&second.request_id, "flights");
        assert!(hit.cached);
        assert_eq!(hit.duration_ms, 0);
        assert!(!timing(&second.request_id, "cruises").cached);
    }

    #[tokio::test]
    async fn test_duplicate_agent_rejected() {
        let mut agents = default_agents();
        agents.push(default_agents().remove(0));
        let err = TravelCoordinator::with_agents(CoordinatorSettings::default(), ManagerSettings::default(), agents)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PlanError::Agent(AgentError::DuplicateAgent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_health_after_plan() {
        let coordinator = coordinator().await;
        coordinator.plan_trip(&request()).await.unwrap();
        let health = coordinator.system_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.agents.len(), 5);
        assert_eq!(health.resilience.len(), 5);
        assert_eq!(health.plan_cache.size, 1);
        assert_eq!(health.tracked_requests, 1);
    }
}
