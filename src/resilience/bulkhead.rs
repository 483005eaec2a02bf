//! 舱壁：限制同时在途的调用数
//!
//! running < max_concurrency 时直接放行；否则排队（最多 queue_size 个），再多则 QueueFull。
//! 每次入队与释放都会顺带清理等待超过 queue_timeout 的排队者；
//! 释放许可时把槽位直接交给队首仍在等待的调用，running 计数不变。
//! 交接的是一个真正的 BulkheadPermit：等待方在取走之前被 drop，许可随之 drop，槽位照常归还。

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::core::ResilienceError;

/// 舱壁参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulkheadConfig {
    pub max_concurrency: usize,
    pub queue_size: usize,
    pub queue_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            queue_size: 16,
            queue_timeout: Duration::from_secs(10),
        }
    }
}

/// 舱壁统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BulkheadStats {
    pub running: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub queue_size: usize,
    pub completed: u64,
    /// 队列已满被拒绝
    pub rejected: u64,
    /// 排队超时被移除
    pub timed_out: u64,
}

struct Waiter {
    id: u64,
    enqueued_at: Instant,
    grant: oneshot::Sender<BulkheadPermit>,
}

struct BulkheadState {
    running: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
    completed: u64,
    rejected: u64,
    timed_out: u64,
}

struct Shared {
    name: String,
    config: BulkheadConfig,
    state: Mutex<BulkheadState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BulkheadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, waiter: &Waiter, now: Instant) -> bool {
        now.saturating_duration_since(waiter.enqueued_at) > self.config.queue_timeout
    }

    fn purge_expired(&self, state: &mut BulkheadState, now: Instant) {
        // 已放弃等待的调用直接移除，不计入超时
        state.queue.retain(|waiter| !waiter.grant.is_closed());
        let before = state.queue.len();
        state.queue.retain(|waiter| !self.is_expired(waiter, now));
        state.timed_out += (before - state.queue.len()) as u64;
    }

    /// 释放一个槽位：优先交给队首仍在等待的调用
    fn release(self: &Arc<Self>) {
        let now = Instant::now();
        let mut state = self.lock();
        state.completed += 1;
        while let Some(waiter) = state.queue.pop_front() {
            if self.is_expired(&waiter, now) {
                state.timed_out += 1;
                continue;
            }
            let permit = BulkheadPermit {
                shared: Some(Arc::clone(self)),
            };
            match waiter.grant.send(permit) {
                Ok(()) => return,
                // 接收端已放弃：退回的许可不能再走 release（锁仍被持有），继续找下一个
                Err(mut unclaimed) => unclaimed.disarm(),
            }
        }
        state.running = state.running.saturating_sub(1);
    }
}

/// 执行许可；drop 时归还槽位
pub struct BulkheadPermit {
    shared: Option<Arc<Shared>>,
}

impl BulkheadPermit {
    fn disarm(&mut self) {
        self.shared = None;
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release();
        }
    }
}

/// 并发舱壁
#[derive(Clone)]
pub struct Bulkhead {
    shared: Arc<Shared>,
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config: BulkheadConfig {
                    max_concurrency: config.max_concurrency.max(1),
                    ..config
                },
                state: Mutex::new(BulkheadState {
                    running: 0,
                    queue: VecDeque::new(),
                    next_id: 0,
                    completed: 0,
                    rejected: 0,
                    timed_out: 0,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.shared.config
    }

    fn permit(&self) -> BulkheadPermit {
        BulkheadPermit {
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    /// 获取执行许可：立即放行、排队等待或拒绝
    pub async fn acquire(&self) -> Result<BulkheadPermit, ResilienceError> {
        let config = self.shared.config;
        let (id, mut granted) = {
            let now = Instant::now();
            let mut state = self.shared.lock();
            self.shared.purge_expired(&mut state, now);

            if state.running < config.max_concurrency {
                state.running += 1;
                return Ok(self.permit());
            }

            if state.queue.len() >= config.queue_size {
                state.rejected += 1;
                tracing::warn!(
                    bulkhead = %self.shared.name,
                    queued = state.queue.len(),
                    "bulkhead queue full, rejecting"
                );
                return Err(ResilienceError::QueueFull {
                    name: self.shared.name.clone(),
                    queued: state.queue.len(),
                });
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            state.queue.push_back(Waiter {
                id,
                enqueued_at: now,
                grant: tx,
            });
            (id, rx)
        };

        let queue_timeout = ResilienceError::QueueTimeout {
            name: self.shared.name.clone(),
            waited: config.queue_timeout,
        };

        match tokio::time::timeout(config.queue_timeout, &mut granted).await {
            Ok(Ok(permit)) => Ok(permit),
            // 发送端被清理（排队超时）
            Ok(Err(_)) => Err(queue_timeout),
            Err(_) => {
                let mut state = self.shared.lock();
                // 超时与交接可能同时发生；交接在锁内完成，这里再确认一次
                if let Ok(permit) = granted.try_recv() {
                    return Ok(permit);
                }
                let before = state.queue.len();
                state.queue.retain(|waiter| waiter.id != id);
                state.timed_out += (before - state.queue.len()) as u64;
                Err(queue_timeout)
            }
        }
    }

    /// 在舱壁内执行 op
    pub async fn execute<T, Fut>(&self, op: Fut) -> Result<T, ResilienceError>
    where
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let _permit = self.acquire().await?;
        op.await
    }

    pub fn stats(&self) -> BulkheadStats {
        let state = self.shared.lock();
        BulkheadStats {
            running: state.running,
            queued: state.queue.iter().filter(|waiter| !waiter.grant.is_closed()).count(),
            max_concurrency: self.shared.config.max_concurrency,
            queue_size: self.shared.config.queue_size,
            completed: state.completed,
            rejected: state.rejected,
            timed_out: state.timed_out,
        }
    }
}
