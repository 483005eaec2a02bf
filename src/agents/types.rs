//! Agent 层数据类型
//!
//! AgentConfig 在协调器构建后不再变化；AgentResponse 每次调用产生一次，返回后不再修改。

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Agent 能力（取代可选方法的鸭子类型接口）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    /// 检索出行选项（航班、酒店、邮轮）
    Search,
    /// 基于已有片段做行程优化
    Optimize,
    /// 天气等预测
    Forecast,
    /// 折扣与优惠
    FindDeals,
}

impl AgentCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Optimize => "optimize",
            Self::Forecast => "forecast",
            Self::FindDeals => "find_deals",
        }
    }
}

impl fmt::Display for AgentCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个 Agent 的执行参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentConfig {
    pub capability: AgentCapability,
    /// 单次尝试超时
    pub timeout: Duration,
    pub retry_attempts: u32,
    /// 首次重试前的退避
    pub retry_delay: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset: Duration,
    /// 响应缓存时长；ZERO 表示不缓存
    pub cache_ttl: Duration,
    /// 执行阶段 1..=3，越小越先执行
    pub priority: u8,
}

impl AgentConfig {
    pub fn new(capability: AgentCapability, priority: u8) -> Self {
        Self {
            capability,
            priority,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_circuit_breaker(mut self, threshold: u32, reset: Duration) -> Self {
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_reset = reset;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capability: AgentCapability::Search,
            timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(200),
            circuit_breaker_threshold: 5,
            circuit_breaker_reset: Duration::from_secs(30),
            cache_ttl: Duration::ZERO,
            priority: 1,
        }
    }
}

/// 行程片段类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Flight,
    Cruise,
    Hotel,
    Activity,
    Weather,
    Deal,
}

/// 行程片段；price 为全家总价，折扣为负数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripSegment {
    pub kind: SegmentKind,
    pub source_agent: String,
    pub provider: String,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// 发给 Agent 的请求；context 为前序阶段已得到的片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: String,
    pub destination: String,
    pub origin: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub adults: usize,
    pub children: usize,
    pub budget: Option<f64>,
    #[serde(default)]
    pub context: Vec<TripSegment>,
}

impl AgentRequest {
    pub fn travelers(&self) -> usize {
        self.adults + self.children
    }

    pub fn nights(&self) -> i64 {
        (self.end_date - self.start_date).num_days().max(0)
    }

    /// 响应缓存键：不含 request_id
    pub fn cache_key(&self) -> String {
        let context: Vec<String> = self
            .context
            .iter()
            .map(|s| format!("{}/{}", s.provider, s.title))
            .collect();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.destination.trim().to_lowercase(),
            self.origin.as_deref().unwrap_or("").trim().to_lowercase(),
            self.start_date,
            self.end_date,
            self.adults,
            self.children,
            self.budget.map(|b| format!("{b:.2}")).unwrap_or_default(),
            context.join(",")
        )
    }
}

/// Agent 成功时的产出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub segments: Vec<TripSegment>,
    #[serde(default)]
    pub advisories: Vec<String>,
    /// 0.0 ~ 1.0
    pub confidence: f64,
}

/// 单次 Agent 调用结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: String,
    pub success: bool,
    pub data: Option<AgentOutput>,
    pub error: Option<String>,
    pub processing_time_ms: u64,
    pub confidence: f64,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    /// 来自响应缓存，未实际调用 Agent
    #[serde(default)]
    pub cached: bool,
}

impl AgentResponse {
    pub fn succeeded(agent_id: impl Into<String>, output: AgentOutput, processing_time_ms: u64, retry_count: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: true,
            confidence: output.confidence.clamp(0.0, 1.0),
            data: Some(output),
            error: None,
            processing_time_ms,
            retry_count,
            timestamp: Utc::now(),
            cached: false,
        }
    }

    pub fn failed(agent_id: impl Into<String>, error: impl Into<String>, processing_time_ms: u64, retry_count: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time_ms,
            confidence: 0.0,
            retry_count,
            timestamp: Utc::now(),
            cached: false,
        }
    }
}
