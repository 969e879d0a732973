//! Types flowing through the job queue (component F).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use queryrelay_core::{JobId, QueuedUnitId};

/// The unit of work a queued job runs. Re-invoked on each retry attempt, so
/// it must be callable more than once — hence `Fn`, not `FnOnce`.
pub type JobThunk = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl QueueConfig {
    /// Delay before retry attempt `attempt` (1-indexed): `retryDelayMs *
    /// backoffMultiplier^(attempt-1)`.
    pub fn retry_delay(&self, attempt: u32) -> std::time::Duration {
        let millis = self.retry_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        std::time::Duration::from_millis(millis.max(0.0) as u64)
    }
}

pub struct EnqueueOptions {
    pub priority: i32,
    pub max_retries: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            max_retries: 0,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PendingUnit {
    pub id: QueuedUnitId,
    pub job_id: JobId,
    pub priority: i32,
    pub attempt: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Started { unit_id: QueuedUnitId, job_id: JobId },
    Completed { unit_id: QueuedUnitId, job_id: JobId },
    RetryScheduled { unit_id: QueuedUnitId, job_id: JobId, attempt: u32, delay_ms: u64 },
    FailedPermanent { unit_id: QueuedUnitId, job_id: JobId, error: String },
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueMetrics {
    pub running: usize,
    pub pending: usize,
    pub completed_total: u64,
    pub failed_permanent_total: u64,
    pub retried_total: u64,
}
