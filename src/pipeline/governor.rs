// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::pipeline::cancel::CancelToken;
use crate::pipeline::policy::PipelinePolicy;
use crate::utils::errors::ConfigurationError;

const IN_FLIGHT_GAUGE: &str = "scrapevision_governor_in_flight";
const QUEUED_GAUGE: &str = "scrapevision_governor_queued";

/// 准入错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// 排队期间被取消，未占用许可
    #[error("admission cancelled while queued")]
    Cancelled,
    /// 调控器已关闭，不再接受新的准入
    #[error("governor closed")]
    Closed,
}

/// 并发许可
///
/// 持有期间占用一个并发槽位，丢弃即释放
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    admitted_at: Instant,
}

impl Permit {
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        metrics::gauge!(IN_FLIGHT_GAUGE).decrement(1.0);
    }
}

struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics::gauge!(QUEUED_GAUGE).increment(1.0);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(QUEUED_GAUGE).decrement(1.0);
    }
}

/// 并发调控器
///
/// 计数信号量限制同时运行的流水线数量，FIFO 排队；
/// 另有一个共享的"下一次可准入时间"水位线，保证相邻两次准入至少间隔 `request_delay`
#[derive(Debug)]
pub struct ConcurrencyGovernor {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    request_delay: Duration,
    next_admission: Mutex<Instant>,
    queued: AtomicUsize,
}

impl ConcurrencyGovernor {
    /// 创建调控器
    ///
    /// # 参数
    ///
    /// * `max_permits` - 最大并发数，必须大于 0
    /// * `request_delay` - 相邻两次准入的最小间隔
    pub fn new(max_permits: usize, request_delay: Duration) -> Result<Self, ConfigurationError> {
        if max_permits == 0 {
            return Err(ConfigurationError::InvalidPolicy(
                "max_concurrent_requests must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            // tokio's semaphore is fair: waiters are served in FIFO order
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            request_delay,
            next_admission: Mutex::new(Instant::now()),
            queued: AtomicUsize::new(0),
        })
    }

    pub fn from_policy(policy: &PipelinePolicy) -> Result<Self, ConfigurationError> {
        Self::new(policy.max_concurrent_requests(), policy.request_delay())
    }

    /// 等待准入，不可取消；调控器关闭后返回 `Closed`
    pub async fn admit(&self) -> Result<Permit, AdmissionError> {
        self.admit_cancellable(&CancelToken::never()).await
    }

    /// 等待准入，可被取消
    ///
    /// 取消时若已拿到信号量许可会立即归还，不占用并发槽位
    pub async fn admit_cancellable(&self, cancel: &CancelToken) -> Result<Permit, AdmissionError> {
        let permit = {
            let _queued = QueuedGuard::enter(&self.queued);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AdmissionError::Cancelled),
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| AdmissionError::Closed)?
                }
            }
        };

        let eligible = self.reserve_slot();
        if eligible > Instant::now() {
            debug!(
                "Pacing admission for {:?}",
                eligible.saturating_duration_since(Instant::now())
            );
            tokio::select! {
                biased;
                // Dropping the semaphore permit hands it to the next waiter
                _ = cancel.cancelled() => return Err(AdmissionError::Cancelled),
                _ = tokio::time::sleep_until(eligible) => {}
            }
        }

        metrics::gauge!(IN_FLIGHT_GAUGE).increment(1.0);
        Ok(Permit {
            _permit: permit,
            admitted_at: Instant::now(),
        })
    }

    /// 归还许可
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// 关闭调控器
    ///
    /// 排队中的请求立即以 `Closed` 返回，之后的准入也都被拒绝；已准入的许可不受影响
    pub fn close(&self) {
        self.semaphore.close();
        debug!("Governor closed, {} request(s) still queued", self.queued());
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    // eligible = max(now, watermark); watermark = eligible + delay
    fn reserve_slot(&self) -> Instant {
        let mut next = self.next_admission.lock();
        let now = Instant::now();
        let eligible = if *next > now { *next } else { now };
        *next = eligible + self.request_delay;
        eligible
    }

    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// 当前已准入（运行中或正在节流等待）的数量
    pub fn in_flight(&self) -> usize {
        self.max_permits - self.semaphore.available_permits()
    }

    /// 当前排队等待许可的数量
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}
