//! 协调器集成测试：阶段顺序、部分失败降级为告警、超时熔断、舱壁拒绝、行程缓存

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::time::Instant;
use tripwise::agents::{
    AgentCapability, AgentConfig, AgentInvocation, AgentManager, AgentOutput, AgentRequest, HealthStatus,
    ManagerSettings, SegmentKind, TravelAgent, TripSegment,
};
use tripwise::coordinator::{CoordinatorSettings, FamilyMember, FamilyProfile, TravelCoordinator, TripRequest};
use tripwise::core::PlanError;
use tripwise::resilience::{BulkheadConfig, CircuitState};

/// 可配置的测试 Agent：记录每次调用看到的上下文片段数量
struct ScriptedAgent {
    id: &'static str,
    kind: SegmentKind,
    delay: Duration,
    fail: bool,
    calls: AtomicU32,
    seen_context: Mutex<Vec<usize>>,
}

impl ScriptedAgent {
    fn new(id: &'static str, kind: SegmentKind) -> Self {
        Self {
            id,
            kind,
            delay: Duration::from_millis(10),
            fail: false,
            calls: AtomicU32::new(0),
            seen_context: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TravelAgent for ScriptedAgent {
    fn id(&self) -> &str {
        self.id
    }

    fn capabilities(&self) -> &[AgentCapability] {
        &[AgentCapability::Search, AgentCapability::FindDeals]
    }

    async fn invoke(&self, _capability: AgentCapability, request: &AgentRequest) -> Result<AgentOutput, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_context.lock().unwrap().push(request.context.len());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(format!("{} backend unavailable", self.id));
        }
        Ok(AgentOutput {
            segments: vec![TripSegment {
                kind: self.kind,
                source_agent: self.id.to_string(),
                provider: format!("{} provider", self.id),
                title: self.id.to_string(),
                start_date: request.start_date,
                end_date: request.end_date,
                price: 100.0,
                details: None,
            }],
            advisories: vec![],
            confidence: 0.9,
        })
    }
}

fn trip(destination: &str) -> TripRequest {
    TripRequest {
        destination: destination.to_string(),
        origin: Some("Boston".into()),
        start_date: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
        family: FamilyProfile {
            family_name: "Okafor".into(),
            members: vec![
                FamilyMember { name: "Ada".into(), age: 38 },
                FamilyMember { name: "Obi".into(), age: 7 },
            ],
            budget: None,
            home_address: None,
        },
        budget: None,
        preferences: vec![],
    }
}

fn quiet_settings() -> ManagerSettings {
    ManagerSettings {
        retry_jitter: false,
        ..ManagerSettings::default()
    }
}

fn fast_config(priority: u8) -> AgentConfig {
    AgentConfig::new(AgentCapability::Search, priority).with_retry(2, Duration::from_millis(10))
}

#[tokio::test(start_paused = true)]
async fn test_phases_run_in_order_with_context() {
    let flights = Arc::new(ScriptedAgent::new("flights", SegmentKind::Flight));
    let hotels = Arc::new(ScriptedAgent::new("hotels", SegmentKind::Hotel));
    let cruises = Arc::new(ScriptedAgent::new("cruises", SegmentKind::Cruise));
    let deals = Arc::new(ScriptedAgent::new("deals", SegmentKind::Deal));

    let manager = Arc::new(AgentManager::new(quiet_settings()));
    manager.register(flights.clone(), fast_config(1)).await.unwrap();
    manager.register(hotels.clone(), fast_config(1)).await.unwrap();
    manager.register(cruises.clone(), fast_config(2)).await.unwrap();
    manager
        .register(deals.clone(), AgentConfig::new(AgentCapability::FindDeals, 3))
        .await
        .unwrap();

    let coordinator = TravelCoordinator::new(manager, CoordinatorSettings::default());
    let plan = coordinator.plan_trip(&trip("Porto")).await.unwrap();

    assert_eq!(*flights.seen_context.lock().unwrap(), vec![0]);
    assert_eq!(*hotels.seen_context.lock().unwrap(), vec![0]);
    assert_eq!(*cruises.seen_context.lock().unwrap(), vec![2]);
    assert_eq!(*deals.seen_context.lock().unwrap(), vec![3]);

    assert_eq!(plan.segments.len(), 4);
    assert_eq!(plan.agents_consulted, vec!["flights", "hotels", "cruises", "deals"]);
    // 三个阶段串行，每阶段 10ms
    assert!((30..33).contains(&plan.processing_time_ms), "{}", plan.processing_time_ms);
}

#[tokio::test(start_paused = true)]
async fn test_failed_agent_becomes_warning() {
    let flights = Arc::new(ScriptedAgent::new("flights", SegmentKind::Flight).failing());
    let hotels = Arc::new(ScriptedAgent::new("hotels", SegmentKind::Hotel));

    let manager = Arc::new(AgentManager::new(quiet_settings()));
    manager.register(flights.clone(), fast_config(1)).await.unwrap();
    manager.register(hotels.clone(), fast_config(1)).await.unwrap();

    let coordinator = TravelCoordinator::new(Arc::clone(&manager), CoordinatorSettings::default());
    let plan = coordinator.plan_trip(&trip("Porto")).await.unwrap();

    assert_eq!(plan.segments.len(), 1);
    assert_eq!(plan.warnings.len(), 1);
    assert!(plan.warnings[0].starts_with("flights: Operation failed after 2 attempts"));
    assert!(plan.warnings[0].contains("backend unavailable"));
    assert_eq!(flights.calls(), 2);

    let metrics = coordinator.metrics(&plan.request_id).unwrap();
    let flight_timing = metrics.agent_timings.iter().find(|t| t.agent_id == "flights").unwrap();
    assert!(!flight_timing.success);
    assert_eq!(flight_timing.retry_count, 1);

    let health = manager.agent_health("flights").await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.error_rate, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_open_circuit_across_requests() {
    let slow = Arc::new(ScriptedAgent::new("slow", SegmentKind::Hotel).slow(Duration::from_secs(1)));
    let manager = Arc::new(AgentManager::new(quiet_settings()));
    manager
        .register(
            slow.clone(),
            fast_config(1)
                .with_timeout(Duration::from_millis(100))
                .with_circuit_breaker(2, Duration::from_secs(30)),
        )
        .await
        .unwrap();
    let coordinator = TravelCoordinator::new(Arc::clone(&manager), CoordinatorSettings::default());

    let first = coordinator.plan_trip(&trip("Porto")).await.unwrap();
    assert!(first.warnings[0].contains("timed out"));
    assert_eq!(slow.calls(), 2);

    // 熔断已打开：不再调用 Agent
    let second = coordinator.plan_trip(&trip("Faro")).await.unwrap();
    assert!(second.warnings[0].contains("Circuit breaker 'slow' is open"));
    assert_eq!(slow.calls(), 2);
    assert_eq!(
        manager.agent_health("slow").await.unwrap().circuit_state,
        CircuitState::Open
    );

    // 恢复期过后放行一次试探调用，再次超时后重新打开
    tokio::time::advance(Duration::from_secs(30)).await;
    coordinator.plan_trip(&trip("Braga")).await.unwrap();
    assert_eq!(slow.calls(), 3);
    assert_eq!(
        manager.agent_health("slow").await.unwrap().circuit_state,
        CircuitState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_rejects_excess_invocations() {
    let slow = Arc::new(ScriptedAgent::new("slow", SegmentKind::Hotel).slow(Duration::from_millis(100)));
    let manager = AgentManager::new(ManagerSettings {
        bulkhead: BulkheadConfig {
            max_concurrency: 1,
            queue_size: 1,
            queue_timeout: Duration::from_secs(10),
        },
        ..quiet_settings()
    });
    manager
        .register(slow.clone(), fast_config(1).with_retry(1, Duration::ZERO))
        .await
        .unwrap();

    let request = trip("Porto").to_agent_request("bulk");
    let invocations = (0..4)
        .map(|_| AgentInvocation {
            agent_id: "slow".into(),
            request: request.clone(),
        })
        .collect();

    let start = Instant::now();
    let responses = manager.execute_parallel(invocations, 4).await;
    assert_eq!(responses.iter().filter(|r| r.success).count(), 2);
    let rejected: Vec<_> = responses.iter().filter(|r| !r.success).collect();
    assert_eq!(rejected.len(), 2);
    assert!(rejected
        .iter()
        .all(|r| r.error.as_deref().unwrap_or("").contains("queue is full")));
    assert_eq!(slow.calls(), 2);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(205), "{elapsed:?}");

    // 舱壁拒绝不计入熔断
    let health = manager.agent_health("slow").await.unwrap();
    assert_eq!(health.circuit_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_cached_plan_skips_agents() {
    let hotels = Arc::new(ScriptedAgent::new("hotels", SegmentKind::Hotel));
    let manager = Arc::new(AgentManager::new(quiet_settings()));
    manager.register(hotels.clone(), fast_config(1)).await.unwrap();
    let coordinator = TravelCoordinator::new(manager, CoordinatorSettings::default());

    let first = coordinator.plan_trip(&trip("Porto")).await.unwrap();
    let second = coordinator.plan_trip(&trip(" PORTO")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(!first.cached);
    assert!(second.cached);
    assert!(second.processing_time_ms < first.processing_time_ms);
    assert_eq!(hotels.calls(), 1);
    assert_eq!(coordinator.plan_cache_stats().await.hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_validation_error_is_fatal() {
    let hotels = Arc::new(ScriptedAgent::new("hotels", SegmentKind::Hotel));
    let manager = Arc::new(AgentManager::new(quiet_settings()));
    manager.register(hotels.clone(), fast_config(1)).await.unwrap();
    let coordinator = TravelCoordinator::new(manager, CoordinatorSettings::default());

    let mut bad = trip("Porto");
    bad.end_date = bad.start_date;
    let err = coordinator.plan_trip(&bad).await.unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));
    assert_eq!(hotels.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_agents_still_returns_plan() {
    let coordinator = TravelCoordinator::new(
        Arc::new(AgentManager::new(quiet_settings())),
        CoordinatorSettings::default(),
    );
    let plan = coordinator.plan_trip(&trip("Porto")).await.unwrap();
    assert!(plan.segments.is_empty());
    assert_eq!(plan.warnings, vec!["No agent returned any itinerary segments".to_string()]);
    // 餐饮与活动仍按固定费率估算：2 人 × 4 天
    assert_eq!(plan.cost.meals, 360.0);
    assert_eq!(plan.cost.activities, 240.0);
}
