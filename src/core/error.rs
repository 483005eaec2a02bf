//! 错误分层
//!
//! - ResilienceError：韧性组件（熔断、重试、舱壁、超时）产生的失败
//! - AgentError：Agent 注册与调用层面的配置错误（未注册、能力不支持）
//! - PlanError：行程规划请求级错误，会直接返回给调用方

use std::time::Duration;

use thiserror::Error;

/// 韧性管线中单次调用的失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bulkhead '{name}' queue is full ({queued} pending)")]
    QueueFull { name: String, queued: usize },

    #[error("Bulkhead '{name}' queue wait exceeded {waited:?}")]
    QueueTimeout { name: String, waited: Duration },

    /// 重试耗尽；last_error 为最后一次尝试的错误
    #[error("Operation failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<ResilienceError>,
    },

    /// 被包裹操作自身返回的错误
    #[error("{0}")]
    Operation(String),

    #[error("Cancelled")]
    Cancelled,
}

impl ResilienceError {
    /// 熔断拒绝与取消不进入重试循环
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::CircuitOpen(_) | Self::Cancelled)
    }

    /// 剥掉 RetryExhausted 包装，取最底层原因
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            Self::RetryExhausted { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}

/// Agent 注册 / 调用错误（运行期失败不走这里，而是转成失败的 AgentResponse）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent not registered: {0}")]
    NotRegistered(String),

    #[error("Agent '{agent}' does not support capability {capability}")]
    UnsupportedCapability { agent: String, capability: String },

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),
}

/// 行程规划错误：校验失败等致命错误直接传播给调用方
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Invalid trip request: {0}")]
    Validation(String),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Coordinator is shut down")]
    ShutDown,
}
