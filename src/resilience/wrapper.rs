//! 韧性组合：由内到外 timeout → circuit breaker → bulkhead → retry
//!
//! 重试是最外层循环，每次重试都会重新走一遍完整的受保护管线；熔断拒绝不重试。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{
    Bulkhead, BulkheadConfig, BulkheadStats, CircuitBreaker, CircuitBreakerConfig,
    CircuitBreakerSnapshot, RetryConfig, RetryManager, TtlCache,
};
use crate::core::ResilienceError;

/// 组合策略
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResiliencePolicy {
    /// 单次尝试超时；Duration::ZERO 表示不限
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub circuit: CircuitBreakerConfig,
    pub bulkhead: BulkheadConfig,
}

/// 单个下游的韧性统计
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceStats {
    pub name: String,
    pub circuit: CircuitBreakerSnapshot,
    pub bulkhead: BulkheadStats,
}

/// 对单个 op 施加超时
pub async fn with_timeout<T, Fut>(limit: Duration, op: Fut) -> Result<T, ResilienceError>
where
    Fut: Future<Output = Result<T, ResilienceError>>,
{
    if limit.is_zero() {
        return op.await;
    }
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(ResilienceError::Timeout(limit)),
    }
}

/// 韧性包装器
pub struct ResilienceWrapper {
    name: String,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
    bulkhead: Bulkhead,
    retry: RetryManager,
}

impl ResilienceWrapper {
    pub fn new(name: impl Into<String>, policy: ResiliencePolicy) -> Self {
        let name = name.into();
        Self {
            timeout: policy.timeout,
            breaker: Arc::new(CircuitBreaker::new(name.clone(), policy.circuit)),
            bulkhead: Bulkhead::new(name.clone(), policy.bulkhead),
            retry: RetryManager::new(name.clone(), policy.retry),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.execute_counted(op).await.0
    }

    /// 执行并返回尝试次数；op 收到尝试序号
    pub async fn execute_counted<T, F, Fut>(&self, mut op: F) -> (Result<T, ResilienceError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let timeout = self.timeout;
        let breaker = &self.breaker;
        let bulkhead = &self.bulkhead;
        self.retry
            .execute_counted(|attempt| {
                let guarded = op(attempt);
                async move {
                    bulkhead
                        .execute(breaker.call(with_timeout(timeout, guarded)))
                        .await
                }
            })
            .await
    }

    /// 先查缓存，未命中时执行并写回成功结果
    pub async fn execute_cached<T, F, Fut>(
        &self,
        cache: &TtlCache<T>,
        key: &str,
        ttl: Duration,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        if let Some(hit) = cache.get(key).await {
            tracing::debug!(wrapper = %self.name, key, "resilience cache hit");
            return Ok(hit);
        }
        let value = self.execute(op).await?;
        cache.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            name: self.name.clone(),
            circuit: self.breaker.snapshot(),
            bulkhead: self.bulkhead.stats(),
        }
    }
}
