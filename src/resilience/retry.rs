//! 指数退避重试
//!
//! 第 n 次失败后等待 min(base_delay × multiplier^(n-1), max_delay)，开启 jitter 时再乘以 [0.5, 1.0] 的随机因子。
//! 最后一次尝试失败后不再等待，返回 RetryExhausted（消息中带尝试次数）。

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::core::ResilienceError;

/// 重试参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次（从 1 开始）失败后的确定性退避时长，不含抖动
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(nanos.round() as u64)
    }

    /// 实际等待时长（按配置叠加抖动）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        let nanos = (backoff.as_nanos() as f64 * factor).round() as u64;
        Duration::from_nanos(nanos).clamp(backoff / 2, backoff)
    }
}

/// 重试执行器
#[derive(Debug, Clone)]
pub struct RetryManager {
    name: String,
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行 op，op 收到当前尝试序号（从 1 开始）
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ResilienceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.execute_counted(op).await.0
    }

    /// 同 execute，同时返回实际尝试次数
    pub async fn execute_counted<T, F, Fut>(&self, mut op: F) -> (Result<T, ResilienceError>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if !err.is_retryable() => return (Err(err), attempt),
                Err(err) if attempt >= max_attempts => {
                    tracing::warn!(
                        target_name = %self.name,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                    return (
                        Err(ResilienceError::RetryExhausted {
                            attempts: attempt,
                            last_error: Box::new(err),
                        }),
                        attempt,
                    );
                }
                Err(err) => {
                    let delay = self.config.delay_for(attempt);
                    tracing::debug!(
                        target_name = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
