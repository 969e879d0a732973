//! Bounded-concurrency, priority-ordered job queue with exponential-backoff
//! retry (component F).

mod error;
mod queue;
mod types;

pub use error::{QueueError, QueueResult};
pub use queue::JobQueue;
pub use types::{EnqueueOptions, JobThunk, PendingUnit, QueueConfig, QueueEvent, QueueMetrics};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use queryrelay_core::JobId;

    fn ok_thunk() -> JobThunk {
        Arc::new(|| Box::pin(async { Ok(()) }))
    }

    fn counting_thunk(counter: Arc<AtomicUsize>) -> JobThunk {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_thunk(failures: Arc<AtomicUsize>) -> JobThunk {
        Arc::new(move || {
            let failures = failures.clone();
            Box::pin(async move {
                let n = failures.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err("boom".to_string())
                } else {
                    Ok(())
                }
            })
        })
    }

    async fn wait_until<F: Fn() -> bool>(pred: F) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn enqueue_runs_to_completion() {
        let queue = JobQueue::start(QueueConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));
        queue
            .enqueue(JobId::from("j1"), counting_thunk(counter.clone()), EnqueueOptions::default())
            .await;

        wait_until(|| counter.load(Ordering::SeqCst) == 1).await;
        for _ in 0..50 {
            if queue.get_running().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("unit never left the running set");
    }

    #[tokio::test]
    async fn max_concurrent_bounds_running_set() {
        let mut config = QueueConfig::default();
        config.max_concurrent = 2;
        let queue = JobQueue::start(config);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            let thunk: JobThunk = Arc::new(move || {
                let in_flight = in_flight.clone();
                let max_seen = max_seen.clone();
                Box::pin(async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            });
            queue
                .enqueue(JobId::from(format!("j{i}").as_str()), thunk, EnqueueOptions::default())
                .await;
        }

        wait_until(|| in_flight.load(Ordering::SeqCst) == 0).await;
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn failed_unit_retries_then_succeeds() {
        let mut config = QueueConfig::default();
        config.retry_delay_ms = 5;
        let queue = JobQueue::start(config);
        let mut events = queue.subscribe();

        let failures = Arc::new(AtomicUsize::new(0));
        queue
            .enqueue(
                JobId::from("retry-job"),
                failing_thunk(failures.clone()),
                EnqueueOptions {
                    priority: 0,
                    max_retries: 2,
                },
            )
            .await;

        let mut saw_retry = false;
        let mut saw_completed = false;
        for _ in 0..20 {
            match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                Ok(Ok(QueueEvent::RetryScheduled { .. })) => saw_retry = true,
                Ok(Ok(QueueEvent::Completed { .. })) => {
                    saw_completed = true;
                    break;
                }
                _ => break,
            }
        }
        assert!(saw_retry, "expected a retry event");
        assert!(saw_completed, "expected eventual completion");
    }

    #[tokio::test]
    async fn exhausting_retries_emits_failed_permanent() {
        let mut config = QueueConfig::default();
        config.retry_delay_ms = 1;
        let queue = JobQueue::start(config);
        let mut events = queue.subscribe();

        let always_fail: JobThunk = Arc::new(|| Box::pin(async { Err("nope".to_string()) }));
        queue
            .enqueue(
                JobId::from("always-fails"),
                always_fail,
                EnqueueOptions {
                    priority: 0,
                    max_retries: 1,
                },
            )
            .await;

        let mut saw_failed_permanent = false;
        for _ in 0..20 {
            match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
                Ok(Ok(QueueEvent::FailedPermanent { .. })) => {
                    saw_failed_permanent = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_failed_permanent);
    }

    #[tokio::test]
    async fn clear_pending_drops_queued_but_not_running() {
        let mut config = QueueConfig::default();
        config.max_concurrent = 1;
        let queue = JobQueue::start(config);

        let first: JobThunk = Arc::new(|| Box::pin(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        }));
        queue.enqueue(JobId::from("slow"), first, EnqueueOptions::default()).await;
        queue.enqueue(JobId::from("queued"), ok_thunk(), EnqueueOptions::default()).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        let cleared = queue.clear_pending().await;
        assert_eq!(cleared, 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_units() {
        let queue = JobQueue::start(QueueConfig::default());
        let thunk: JobThunk = Arc::new(|| Box::pin(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }));
        queue.enqueue(JobId::from("j"), thunk, EnqueueOptions::default()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        queue.shutdown(Duration::from_millis(500)).await;
        assert!(queue.get_running().await.is_empty());
    }
}
