//! Tripwise - 家庭出行规划编排内核
//!
//! 模块划分：
//! - **resilience**: TTL 缓存、熔断器、重试、舱壁，以及组合它们的韧性包装器
//! - **agents**: 能力化的出行 Agent trait、Agent 管理器（韧性执行、并行调度、健康）与内置 Agent
//! - **coordinator**: 行程规划协调器（校验、缓存、三阶段执行、合成与费用、指标）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分层与优雅关闭
//! - **observability**: tracing 初始化

pub mod agents;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod observability;
pub mod resilience;

pub use agents::{AgentCapability, AgentConfig, AgentManager, TravelAgent};
pub use coordinator::{TravelCoordinator, TripPlan, TripRequest};
