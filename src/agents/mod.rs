//! 出行 Agent：能力化的 Agent trait、请求/响应类型、带韧性包装的管理器与内置 Agent

pub mod manager;
pub mod mock;
pub mod traits;
pub mod types;

pub use manager::{
    classify_health, AgentHealth, AgentInvocation, AgentManager, AgentMetrics, HealthStatus, ManagerSettings,
};
pub use mock::{default_agents, CruiseAgent, DealsAgent, FlightAgent, HotelAgent, WeatherAgent};
pub use traits::TravelAgent;
pub use types::{AgentCapability, AgentConfig, AgentOutput, AgentRequest, AgentResponse, SegmentKind, TripSegment};
