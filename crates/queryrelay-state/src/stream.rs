//! `ProgressStream` — the live progress/checkpoint store (component B). A
//! keyed state store generalised with a `tokio::sync::broadcast` event feed
//! and a retention sweep for terminated jobs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use queryrelay_core::{ConnectionId, JobId};

use crate::checkpoint::Checkpoint;
use crate::error::{StateError, StateResult};
use crate::events::ProgressEvent;
use crate::types::{ConnectionProgress, ConnectionState, JobProgress, JobState};

const RETENTION: Duration = Duration::from_secs(5 * 60);
const EVENT_CHANNEL_CAPACITY: usize = 1024;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone)]
pub struct ProgressStream {
    records: Arc<Mutex<HashMap<JobId, JobProgress>>>,
    events: broadcast::Sender<ProgressEvent>,
    checkpoint_dir: PathBuf,
}

impl ProgressStream {
    pub fn new(checkpoint_dir: PathBuf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            events,
            checkpoint_dir,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ProgressEvent) {
        // A send error just means there are currently no subscribers.
        let _ = self.events.send(event);
    }

    pub async fn get_progress(&self, job_id: &JobId) -> Option<JobProgress> {
        self.records.lock().await.get(job_id).cloned()
    }

    pub async fn list_progress(&self) -> Vec<JobProgress> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Creates a progress record. If `resume` and a checkpoint exists for
    /// `job_id`, the record is seeded from it.
    pub async fn start_job(
        &self,
        job_id: JobId,
        job_name: String,
        total_connections: usize,
        resume: bool,
    ) -> StateResult<()> {
        let mut seeded = JobProgress {
            job_id: job_id.clone(),
            job_name,
            state: JobState::Running,
            step: None,
            total_connections,
            connections: HashMap::new(),
            cancel_requested: false,
            started_at_ms: now_ms(),
            finished_at_ms: None,
            error: None,
        };

        if resume {
            if let Some(checkpoint) = Checkpoint::load(&self.checkpoint_dir, &job_id)? {
                seeded.started_at_ms = checkpoint.started_at_ms;
                for conn_id in &checkpoint.completed_connection_ids {
                    seeded.connections.insert(
                        conn_id.clone(),
                        ConnectionProgress {
                            connection_id: conn_id.clone(),
                            connection_name: conn_id.to_string(),
                            state: ConnectionState::Completed,
                            step: None,
                            rows_processed: 0,
                            total_rows: None,
                            error: None,
                        },
                    );
                }
                for conn_id in &checkpoint.failed_connection_ids {
                    seeded.connections.insert(
                        conn_id.clone(),
                        ConnectionProgress {
                            connection_id: conn_id.clone(),
                            connection_name: conn_id.to_string(),
                            state: ConnectionState::Failed,
                            step: None,
                            rows_processed: 0,
                            total_rows: None,
                            error: Some("resumed from checkpoint".to_string()),
                        },
                    );
                }
                debug!(%job_id, "resumed from checkpoint");
            }
        }

        self.records.lock().await.insert(job_id.clone(), seeded.clone());
        self.emit(ProgressEvent::JobStarted {
            job_id,
            job_name: seeded.job_name,
        });
        Ok(())
    }

    async fn checkpoint_for(&self, job_id: &JobId) -> StateResult<Checkpoint> {
        Ok(Checkpoint::load(&self.checkpoint_dir, job_id)?
            .unwrap_or_else(|| Checkpoint::new(job_id.clone(), now_ms())))
    }

    pub async fn start_connection(
        &self,
        job_id: &JobId,
        connection_id: ConnectionId,
        connection_name: String,
    ) -> StateResult<()> {
        let mut records = self.records.lock().await;
        let job = records
            .get_mut(job_id)
            .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
        job.connections.insert(
            connection_id.clone(),
            ConnectionProgress {
                connection_id: connection_id.clone(),
                connection_name: connection_name.clone(),
                state: ConnectionState::Running,
                step: None,
                rows_processed: 0,
                total_rows: None,
                error: None,
            },
        );
        drop(records);
        self.emit(ProgressEvent::ConnectionStarted {
            job_id: job_id.clone(),
            connection_id,
            connection_name,
        });
        Ok(())
    }

    pub async fn update_connection_progress(
        &self,
        job_id: &JobId,
        connection_id: &ConnectionId,
        step: Option<String>,
        rows_processed: Option<u64>,
        total_rows: Option<u64>,
    ) -> StateResult<()> {
        let (step, rows_processed, total_rows, percentage) = {
            let mut records = self.records.lock().await;
            let job = records
                .get_mut(job_id)
                .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
            let conn = job.connections.get_mut(connection_id).ok_or_else(|| {
                StateError::ConnectionNotFound(job_id.to_string(), connection_id.to_string())
            })?;
            if let Some(step) = step {
                conn.step = Some(step);
            }
            if let Some(rows) = rows_processed {
                conn.rows_processed = conn.rows_processed.max(rows);
            }
            if let Some(total) = total_rows {
                conn.total_rows = Some(total);
            }
            (
                conn.step.clone(),
                conn.rows_processed,
                conn.total_rows,
                conn.percentage(),
            )
        };
        self.emit(ProgressEvent::ConnectionProgress {
            job_id: job_id.clone(),
            connection_id: connection_id.clone(),
            step,
            rows_processed,
            total_rows,
            percentage,
        });
        Ok(())
    }

    pub async fn complete_connection(
        &self,
        job_id: &JobId,
        connection_id: &ConnectionId,
        rows: Option<u64>,
    ) -> StateResult<()> {
        {
            let mut records = self.records.lock().await;
            let job = records
                .get_mut(job_id)
                .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
            let conn = job.connections.get_mut(connection_id).ok_or_else(|| {
                StateError::ConnectionNotFound(job_id.to_string(), connection_id.to_string())
            })?;
            conn.state = ConnectionState::Completed;
            if let Some(rows) = rows {
                conn.rows_processed = rows;
            }
        }
        let mut checkpoint = self.checkpoint_for(job_id).await?;
        if !checkpoint.completed_connection_ids.contains(connection_id) {
            checkpoint
                .completed_connection_ids
                .push(connection_id.clone());
        }
        checkpoint.save(&self.checkpoint_dir)?;

        self.emit(ProgressEvent::ConnectionCompleted {
            job_id: job_id.clone(),
            connection_id: connection_id.clone(),
            rows,
        });
        Ok(())
    }

    pub async fn fail_connection(
        &self,
        job_id: &JobId,
        connection_id: &ConnectionId,
        error: String,
    ) -> StateResult<()> {
        {
            let mut records = self.records.lock().await;
            let job = records
                .get_mut(job_id)
                .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
            let conn = job.connections.get_mut(connection_id).ok_or_else(|| {
                StateError::ConnectionNotFound(job_id.to_string(), connection_id.to_string())
            })?;
            conn.state = ConnectionState::Failed;
            conn.error = Some(error.clone());
        }
        let mut checkpoint = self.checkpoint_for(job_id).await?;
        if !checkpoint.failed_connection_ids.contains(connection_id) {
            checkpoint.failed_connection_ids.push(connection_id.clone());
        }
        checkpoint.save(&self.checkpoint_dir)?;

        self.emit(ProgressEvent::ConnectionFailed {
            job_id: job_id.clone(),
            connection_id: connection_id.clone(),
            error,
        });
        Ok(())
    }

    pub async fn update_job_step(&self, job_id: &JobId, step: String) -> StateResult<()> {
        let mut records = self.records.lock().await;
        let job = records
            .get_mut(job_id)
            .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
        job.step = Some(step.clone());
        drop(records);
        self.emit(ProgressEvent::JobProgress {
            job_id: job_id.clone(),
            step: Some(step),
        });
        Ok(())
    }

    /// `completeJob` is forbidden while any connection is still `running`.
    pub async fn complete_job(&self, job_id: &JobId) -> StateResult<()> {
        let (completed, failed, duration_ms) = {
            let mut records = self.records.lock().await;
            let job = records
                .get_mut(job_id)
                .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
            if job.any_connection_running() {
                return Err(StateError::InvalidTransition(format!(
                    "job {job_id} has a running connection"
                )));
            }
            job.state = JobState::Completed;
            let finished_at = now_ms();
            job.finished_at_ms = Some(finished_at);
            (
                job.completed_connection_ids().len(),
                job.failed_connection_ids().len(),
                finished_at.saturating_sub(job.started_at_ms),
            )
        };

        Checkpoint::delete(&self.checkpoint_dir, job_id)?;
        self.emit(ProgressEvent::Completed {
            job_id: job_id.clone(),
            completed_connections: completed,
            failed_connections: failed,
            duration_ms,
        });
        self.schedule_retention(job_id.clone());
        Ok(())
    }

    pub async fn fail_job(&self, job_id: &JobId, error: String) -> StateResult<()> {
        {
            let mut records = self.records.lock().await;
            let job = records
                .get_mut(job_id)
                .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
            job.state = JobState::Failed;
            job.error = Some(error.clone());
            job.finished_at_ms = Some(now_ms());
        }
        self.emit(ProgressEvent::Failed {
            job_id: job_id.clone(),
            error,
        });
        self.schedule_retention(job_id.clone());
        Ok(())
    }

    pub async fn cancel_job_complete(&self, job_id: &JobId) -> StateResult<()> {
        {
            let mut records = self.records.lock().await;
            let job = records
                .get_mut(job_id)
                .ok_or_else(|| StateError::JobNotFound(job_id.to_string()))?;
            job.state = JobState::Cancelled;
            job.finished_at_ms = Some(now_ms());
        }
        self.emit(ProgressEvent::Cancelled {
            job_id: job_id.clone(),
        });
        self.schedule_retention(job_id.clone());
        Ok(())
    }

    /// Sets the cancel-requested flag iff the job is currently running.
    /// Returns whether the flag was set.
    pub async fn cancel_job(&self, job_id: &JobId) -> bool {
        let mut records = self.records.lock().await;
        match records.get_mut(job_id) {
            Some(job) if job.state == JobState::Running => {
                job.cancel_requested = true;
                true
            }
            _ => false,
        }
    }

    pub async fn is_cancellation_requested(&self, job_id: &JobId) -> bool {
        self.records
            .lock()
            .await
            .get(job_id)
            .map(|j| j.cancel_requested)
            .unwrap_or(false)
    }

    fn schedule_retention(&self, job_id: JobId) {
        let records = self.records.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RETENTION).await;
            let mut records = records.lock().await;
            if let Some(job) = records.get(&job_id) {
                if job.finished_at_ms.is_some() {
                    records.remove(&job_id);
                    debug!(%job_id, "progress record garbage-collected");
                }
            }
        });
    }
}

impl Drop for ProgressStream {
    fn drop(&mut self) {
        if Arc::strong_count(&self.records) == 1 {
            warn!("progress stream dropped with in-flight retention timers pending");
        }
    }
}
