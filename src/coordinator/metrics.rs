//! 每次规划请求的处理指标
//!
//! 请求开始时创建、结束时定稿；存储有上限，超出后按插入顺序淘汰最旧的记录。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 单个 Agent 在一次请求中的耗时
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentTiming {
    pub agent_id: String,
    pub phase: u8,
    pub duration_ms: u64,
    pub success: bool,
    pub retry_count: u32,
    /// 命中 Agent 响应缓存
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingMetrics {
    pub request_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cache_hit: bool,
    pub agent_timings: Vec<AgentTiming>,
    pub warnings: usize,
    pub total_ms: Option<u64>,
}

impl ProcessingMetrics {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            cache_hit: false,
            agent_timings: Vec::new(),
            warnings: 0,
            total_ms: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, ProcessingMetrics>,
    order: VecDeque<String>,
}

/// 有界指标存储
pub struct MetricsStore {
    retention: usize,
    inner: Mutex<StoreInner>,
}

impl MetricsStore {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 开始记录一个请求
    pub fn begin(&self, request_id: &str) {
        let mut inner = self.lock();
        if inner.entries.contains_key(request_id) {
            return;
        }
        while inner.order.len() >= self.retention {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.order.push_back(request_id.to_string());
        inner
            .entries
            .insert(request_id.to_string(), ProcessingMetrics::new(request_id));
    }

    pub fn record_agent(&self, request_id: &str, timing: AgentTiming) {
        if let Some(metrics) = self.lock().entries.get_mut(request_id) {
            metrics.agent_timings.push(timing);
        }
    }

    /// 定稿；已被淘汰的请求忽略
    pub fn finish(&self, request_id: &str, cache_hit: bool, warnings: usize, total_ms: u64) {
        if let Some(metrics) = self.lock().entries.get_mut(request_id) {
            metrics.cache_hit = cache_hit;
            metrics.warnings = warnings;
            metrics.total_ms = Some(total_ms);
            metrics.finished_at = Some(Utc::now());
        }
    }

    pub fn get(&self, request_id: &str) -> Option<ProcessingMetrics> {
        self.lock().entries.get(request_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_evicts_oldest() {
        let store = MetricsStore::new(2);
        store.begin("a");
        store.begin("b");
        store.begin("c");
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_finish_records_totals() {
        let store = MetricsStore::new(10);
        store.begin("miss");
        store.record_agent(
            "miss",
            AgentTiming {
                agent_id: "hotels".into(),
                phase: 1,
                duration_ms: 90,
                success: true,
                retry_count: 0,
                cached: false,
            },
        );
        store.finish("miss", false, 1, 120);
        store.begin("hit");
        store.finish("hit", true, 0, 0);
        store.begin("pending");

        let miss = store.get("miss").unwrap();
        assert!(miss.is_finished());
        assert_eq!(miss.agent_timings.len(), 1);
        assert_eq!(miss.total_ms, Some(120));
        assert!(store.get("hit").unwrap().cache_hit);
        assert!(!store.get("pending").unwrap().is_finished());

        // 未开始的请求不会被创建
        store.finish("unknown", true, 0, 0);
        assert!(store.get("unknown").is_none());
    }
}
