//! 韧性组件：TTL 缓存、熔断器、重试、舱壁，以及把它们组合在一起的包装器

pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod retry;
pub mod wrapper;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadStats};
pub use cache::{CacheEntry, CacheStats, TtlCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use retry::{RetryConfig, RetryManager};
pub use wrapper::{with_timeout, ResiliencePolicy, ResilienceStats, ResilienceWrapper};
