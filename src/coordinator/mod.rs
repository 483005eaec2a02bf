//! 行程规划编排：请求模型、三阶段执行计划、合成与费用估算、指标与健康汇总

#[allow(clippy::module_inception)]
pub mod coordinator;
pub mod metrics;
pub mod synthesis;
pub mod types;

pub use coordinator::{SystemHealth, TravelCoordinator};
pub use metrics::{AgentTiming, MetricsStore, ProcessingMetrics};
pub use synthesis::{compute_cost, synthesize, Synthesis};
pub use types::{
    CostBreakdown, CostRates, CoordinatorSettings, ExecutionPlan, FamilyMember, FamilyProfile, TripPlan,
    TripRequest, ADULT_AGE,
};
