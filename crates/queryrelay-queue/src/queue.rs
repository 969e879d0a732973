//! The job queue's processing loop (component F): a single
//! producer/consumer task draining a priority heap under `maxConcurrent`,
//! with per-unit retry and exponential backoff.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{info, warn};

use queryrelay_core::{JobId, QueuedUnitId};

use crate::types::{EnqueueOptions, JobThunk, PendingUnit, QueueConfig, QueueEvent, QueueMetrics};

const EVENT_CAPACITY: usize = 1024;

struct QueuedUnit {
    job_id: JobId,
    priority: i32,
    attempt: u32,
    max_retries: u32,
    sequence: u64,
    thunk: JobThunk,
}

pub struct JobQueue {
    config: Arc<Mutex<QueueConfig>>,
    units: Arc<Mutex<HashMap<QueuedUnitId, QueuedUnit>>>,
    heap: Arc<Mutex<BinaryHeap<Reverse<(i32, u64, QueuedUnitId)>>>>,
    running: Arc<Mutex<HashSet<QueuedUnitId>>>,
    sequence_counter: Arc<AtomicU64>,
    wake_tx: mpsc::Sender<()>,
    metrics: Arc<Mutex<QueueMetrics>>,
    events_tx: broadcast::Sender<QueueEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl JobQueue {
    pub fn start(config: QueueConfig) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = Self {
            config: Arc::new(Mutex::new(config)),
            units: Arc::new(Mutex::new(HashMap::new())),
            heap: Arc::new(Mutex::new(BinaryHeap::new())),
            running: Arc::new(Mutex::new(HashSet::new())),
            sequence_counter: Arc::new(AtomicU64::new(0)),
            wake_tx,
            metrics: Arc::new(Mutex::new(QueueMetrics::default())),
            events_tx,
            shutdown_tx,
        };

        queue.spawn_processing_loop(wake_rx, shutdown_rx);
        queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub async fn enqueue(&self, job_id: JobId, thunk: JobThunk, opts: EnqueueOptions) -> QueuedUnitId {
        let id = QueuedUnitId::generate();
        let sequence = self.sequence_counter.fetch_add(1, Ordering::Relaxed);
        let unit = QueuedUnit {
            job_id,
            priority: opts.priority,
            attempt: 0,
            max_retries: opts.max_retries,
            sequence,
            thunk,
        };
        self.units.lock().await.insert(id.clone(), unit);
        self.heap.lock().await.push(Reverse((opts.priority, sequence, id.clone())));
        self.wake();
        id
    }

    pub async fn update_config(&self, config: QueueConfig) {
        *self.config.lock().await = config;
        self.wake();
    }

    pub async fn metrics(&self) -> QueueMetrics {
        let mut metrics = self.metrics.lock().await.clone();
        metrics.running = self.running.lock().await.len();
        metrics.pending = self.units.lock().await.len() - metrics.running;
        metrics
    }

    pub async fn get_running(&self) -> Vec<JobId> {
        let running = self.running.lock().await;
        let units = self.units.lock().await;
        running
            .iter()
            .filter_map(|id| units.get(id).map(|u| u.job_id.clone()))
            .collect()
    }

    pub async fn get_pending(&self) -> Vec<PendingUnit> {
        let units = self.units.lock().await;
        let running = self.running.lock().await;
        units
            .iter()
            .filter(|(id, _)| !running.contains(*id))
            .map(|(id, u)| PendingUnit {
                id: id.clone(),
                job_id: u.job_id.clone(),
                priority: u.priority,
                attempt: u.attempt,
                max_retries: u.max_retries,
            })
            .collect()
    }

    /// Drop every unit not currently running. Returns how many were cleared.
    pub async fn clear_pending(&self) -> usize {
        let running = self.running.lock().await;
        let mut units = self.units.lock().await;
        let before = units.len();
        units.retain(|id, _| running.contains(id));
        self.heap.lock().await.clear();
        before - units.len()
    }

    /// Request shutdown and wait up to `timeout` for running units to drain.
    /// Remaining work is logged and abandoned.
    pub async fn shutdown(&self, timeout: std::time::Duration) {
        let _ = self.shutdown_tx.send(true);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.running.lock().await.is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.running.lock().await.len();
                warn!(remaining, "queue shutdown timed out with units still running, abandoning");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    fn spawn_processing_loop(&self, mut wake_rx: mpsc::Receiver<()>, mut shutdown_rx: watch::Receiver<bool>) {
        let config = self.config.clone();
        let units = self.units.clone();
        let heap = self.heap.clone();
        let running = self.running.clone();
        let metrics = self.metrics.clone();
        let events_tx = self.events_tx.clone();
        let wake_tx = self.wake_tx.clone();

        tokio::spawn(async move {
            loop {
                Self::start_ready_units(&config, &units, &heap, &running, &metrics, &events_tx, &wake_tx).await;

                tokio::select! {
                    woken = wake_rx.recv() => {
                        if woken.is_none() {
                            break;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_ready_units(
        config: &Arc<Mutex<QueueConfig>>,
        units: &Arc<Mutex<HashMap<QueuedUnitId, QueuedUnit>>>,
        heap: &Arc<Mutex<BinaryHeap<Reverse<(i32, u64, QueuedUnitId)>>>>,
        running: &Arc<Mutex<HashSet<QueuedUnitId>>>,
        metrics: &Arc<Mutex<QueueMetrics>>,
        events_tx: &broadcast::Sender<QueueEvent>,
        wake_tx: &mpsc::Sender<()>,
    ) {
        let max_concurrent = config.lock().await.max_concurrent;
        loop {
            let slot_available = running.lock().await.len() < max_concurrent;
            if !slot_available {
                break;
            }
            let Some(Reverse((_, _, unit_id))) = heap.lock().await.pop() else {
                break;
            };
            let Some((job_id, thunk)) = units
                .lock()
                .await
                .get(&unit_id)
                .map(|u| (u.job_id.clone(), u.thunk.clone()))
            else {
                continue;
            };

            running.lock().await.insert(unit_id.clone());
            let _ = events_tx.send(QueueEvent::Started { unit_id: unit_id.clone(), job_id: job_id.clone() });

            let config = config.clone();
            let units = units.clone();
            let heap = heap.clone();
            let running = running.clone();
            let metrics = metrics.clone();
            let events_tx = events_tx.clone();
            let wake_tx = wake_tx.clone();
            let unit_id_for_task = unit_id.clone();

            tokio::spawn(async move {
                let outcome = thunk().await;
                running.lock().await.remove(&unit_id_for_task);

                match outcome {
                    Ok(()) => {
                        units.lock().await.remove(&unit_id_for_task);
                        metrics.lock().await.completed_total += 1;
                        let _ = events_tx.send(QueueEvent::Completed {
                            unit_id: unit_id_for_task.clone(),
                            job_id: job_id.clone(),
                        });
                    }
                    Err(error) => {
                        let retry = {
                            let mut units_guard = units.lock().await;
                            if let Some(unit) = units_guard.get_mut(&unit_id_for_task) {
                                unit.attempt += 1;
                                if unit.attempt > unit.max_retries {
                                    None
                                } else {
                                    Some((unit.attempt, unit.priority, unit.sequence))
                                }
                            } else {
                                None
                            }
                        };

                        match retry {
                            Some((attempt, priority, sequence)) => {
                                let delay = config.lock().await.retry_delay(attempt);
                                metrics.lock().await.retried_total += 1;
                                let _ = events_tx.send(QueueEvent::RetryScheduled {
                                    unit_id: unit_id_for_task.clone(),
                                    job_id: job_id.clone(),
                                    attempt,
                                    delay_ms: delay.as_millis() as u64,
                                });
                                info!(job_id = %job_id, attempt, delay_ms = delay.as_millis() as u64, "job unit failed, retrying");
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    heap.lock().await.push(Reverse((priority, sequence, unit_id_for_task)));
                                    let _ = wake_tx.send(()).await;
                                });
                            }
                            None => {
                                units.lock().await.remove(&unit_id_for_task);
                                metrics.lock().await.failed_permanent_total += 1;
                                warn!(job_id = %job_id, error = %error, "job unit failed permanently");
                                let _ = events_tx.send(QueueEvent::FailedPermanent {
                                    unit_id: unit_id_for_task,
                                    job_id,
                                    error,
                                });
                            }
                        }
                    }
                }
                let _ = wake_tx.send(()).await;
            });
        }
    }
}
