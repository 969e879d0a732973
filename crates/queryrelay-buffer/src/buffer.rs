//! `DataBuffer` — the per-job, per-eligible-destination coalescing buffer
//! (component C).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::debug;

use queryrelay_adapters::AdapterRegistry;
use queryrelay_core::{content_hash, ConnectionId, Destination, DestinationKind, Job, JobId, RowSet, TriggerPolicy};

use crate::sub_buffer::{SharedSubBuffer, SubBuffer};
use crate::types::BufferedItem;

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub streaming_eligible: HashSet<DestinationKind>,
    pub flush_interval_ms: u64,
    pub size_threshold: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        let mut eligible = HashSet::new();
        eligible.insert(DestinationKind::GoogleSheets);
        Self {
            streaming_eligible: eligible,
            flush_interval_ms: 10_000,
            size_threshold: 150,
        }
    }
}

struct JobFlusher {
    shutdown: watch::Sender<bool>,
}

pub struct DataBuffer {
    config: Mutex<BufferConfig>,
    adapters: AdapterRegistry,
    backup_dir: PathBuf,
    sub_buffers: Arc<Mutex<HashMap<(JobId, DestinationKind), SharedSubBuffer>>>,
    flushers: Arc<Mutex<HashMap<JobId, JobFlusher>>>,
    last_hash: Arc<Mutex<HashMap<JobId, String>>>,
    job_names: Arc<Mutex<HashMap<JobId, String>>>,
}

impl DataBuffer {
    pub fn new(config: BufferConfig, adapters: AdapterRegistry, backup_dir: PathBuf) -> Self {
        Self {
            config: Mutex::new(config),
            adapters,
            backup_dir,
            sub_buffers: Arc::new(Mutex::new(HashMap::new())),
            flushers: Arc::new(Mutex::new(HashMap::new())),
            last_hash: Arc::new(Mutex::new(HashMap::new())),
            job_names: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn update_config(&self, config: BufferConfig) {
        *self.config.lock().await = config;
    }

    /// The content hash this buffer last dispatched for `job_id`, if any —
    /// the executor reads this back to persist the updated `onChange`
    /// trigger hash into the catalogue after the run completes.
    pub async fn current_hash(&self, job_id: &JobId) -> Option<String> {
        self.last_hash.lock().await.get(job_id).cloned()
    }

    /// Initialise one sub-buffer per (jobId, eligible destination) and
    /// start this job's periodic flusher.
    pub async fn start_buffering(&self, job: &Job) {
        let eligible = self.config.lock().await.streaming_eligible.clone();
        let mut created = false;
        {
            let mut sub_buffers = self.sub_buffers.lock().await;
            for destination in &job.destinations {
                if !eligible.contains(&destination.kind()) {
                    continue;
                }
                let key = (job.id.clone(), destination.kind());
                sub_buffers.entry(key).or_insert_with(|| {
                    created = true;
                    Arc::new(SubBuffer::new(job.id.clone(), destination.clone(), &self.backup_dir))
                });
            }
        }
        if let TriggerPolicy::OnChange { last_hash: Some(hash) } = &job.trigger {
            self.last_hash.lock().await.insert(job.id.clone(), hash.clone());
        }
        self.job_names.lock().await.insert(job.id.clone(), job.display_name.clone());

        if created {
            self.start_flusher(job.id.clone()).await;
        }
    }

    fn is_buffering_eligible(destinations: &[Destination], eligible: &HashSet<DestinationKind>) -> bool {
        destinations.iter().any(|d| eligible.contains(&d.kind()))
    }

    pub async fn has_eligible_destination(&self, job: &Job) -> bool {
        let eligible = self.config.lock().await.streaming_eligible.clone();
        Self::is_buffering_eligible(&job.destinations, &eligible)
    }

    /// Whether `kind` is currently a streaming-eligible destination — the
    /// executor uses this to split a job's destinations into the ones it
    /// dispatches directly and the ones already handled by this buffer.
    pub async fn is_eligible(&self, kind: DestinationKind) -> bool {
        self.config.lock().await.streaming_eligible.contains(&kind)
    }

    async fn start_flusher(&self, job_id: JobId) {
        let (tx, mut rx) = watch::channel(false);
        let sub_buffers = self.sub_buffers.clone();
        let adapters = self.adapters.clone();
        let job_names = self.job_names.clone();
        let interval_ms = self.config.lock().await.flush_interval_ms;
        let flush_job_id = job_id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {
                        let job_name = job_names.lock().await.get(&flush_job_id).cloned().unwrap_or_default();
                        let targets: Vec<SharedSubBuffer> = sub_buffers
                            .lock()
                            .await
                            .iter()
                            .filter(|((jid, _), _)| *jid == flush_job_id)
                            .map(|(_, sb)| sb.clone())
                            .collect();
                        for sub_buffer in targets {
                            sub_buffer.flush(&adapters, &job_name).await;
                        }
                    }
                    _ = rx.changed() => {
                        debug!(job_id = %flush_job_id, "buffer flusher shutting down");
                        break;
                    }
                }
            }
        });

        self.flushers.lock().await.insert(job_id, JobFlusher { shutdown: tx });
    }

    /// Apply the job's change trigger, membership-check the connection, and
    /// enqueue into every eligible sub-buffer. Returns `false` if the rows
    /// were skipped because `onChange` found no difference.
    pub async fn add_to_buffer(
        &self,
        job: &Job,
        connection_id: &ConnectionId,
        connection_name: &str,
        database: &str,
        financial_year: Option<String>,
        partner: Option<String>,
        rows: &RowSet,
    ) -> bool {
        if !job.deduped_connection_ids().contains(connection_id) {
            return false;
        }

        let dispatch = match &job.trigger {
            TriggerPolicy::Always => true,
            TriggerPolicy::OnChange { .. } => {
                let hash = content_hash(rows);
                let mut last_hash = self.last_hash.lock().await;
                let changed = last_hash.get(&job.id) != Some(&hash);
                if changed {
                    last_hash.insert(job.id.clone(), hash);
                }
                changed
            }
        };
        if !dispatch {
            return false;
        }

        let (eligible, threshold) = {
            let config = self.config.lock().await;
            (config.streaming_eligible.clone(), config.size_threshold)
        };
        let targets: Vec<SharedSubBuffer> = {
            let sub_buffers = self.sub_buffers.lock().await;
            job.destinations
                .iter()
                .filter(|d| eligible.contains(&d.kind()))
                .filter_map(|d| sub_buffers.get(&(job.id.clone(), d.kind())).cloned())
                .collect()
        };

        let item = BufferedItem {
            connection_id: connection_id.clone(),
            connection_name: connection_name.to_string(),
            database: database.to_string(),
            financial_year,
            partner,
            rows: rows.clone(),
        };

        let adapters = self.adapters.clone();
        let job_name = job.display_name.clone();
        for sub_buffer in targets {
            let total_rows = sub_buffer.push(item.clone()).await;
            if total_rows >= threshold {
                let sub_buffer = sub_buffer.clone();
                let adapters = adapters.clone();
                let job_name = job_name.clone();
                tokio::spawn(async move {
                    sub_buffer.flush(&adapters, &job_name).await;
                });
            }
        }
        true
    }

    /// Cancel the periodic flusher and flush all of this job's sub-buffers
    /// one last time.
    pub async fn stop_buffering(&self, job_id: &JobId) {
        if let Some(flusher) = self.flushers.lock().await.remove(job_id) {
            let _ = flusher.shutdown.send(true);
        }
        let job_name = self.job_names.lock().await.get(job_id).cloned().unwrap_or_default();
        let targets: Vec<SharedSubBuffer> = self
            .sub_buffers
            .lock()
            .await
            .iter()
            .filter(|((jid, _), _)| jid == job_id)
            .map(|(_, sb)| sb.clone())
            .collect();
        for sub_buffer in targets {
            sub_buffer.flush(&self.adapters, &job_name).await;
        }
    }

    /// Reload any non-empty sub-buffer backups for `job_id` after a crash.
    /// Must be called after `start_buffering` has created the sub-buffers
    /// for the job's current destinations.
    pub async fn recover_buffers(&self, job_id: &JobId) -> std::io::Result<usize> {
        let targets: Vec<SharedSubBuffer> = self
            .sub_buffers
            .lock()
            .await
            .iter()
            .filter(|((jid, _), _)| jid == job_id)
            .map(|(_, sb)| sb.clone())
            .collect();
        let mut recovered = 0;
        for sub_buffer in targets {
            recovered += sub_buffer.load_backup().await?;
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queryrelay_core::{Destination, WriteMode};

    fn job_with_destination(destination: Destination) -> Job {
        Job {
            id: JobId::generate(),
            display_name: "nightly export".to_string(),
            enabled: true,
            connection_ids: vec![ConnectionId::from("c1")],
            query: queryrelay_core::QuerySpec::Single {
                query: "select 1".to_string(),
            },
            recurrence: queryrelay_core::RecurrenceRule::Once,
            trigger: TriggerPolicy::Always,
            destinations: vec![destination],
            group: None,
            last_run: None,
        }
    }

    fn sheets_destination() -> Destination {
        Destination::GoogleSheets {
            spreadsheet_id: "sheet-1".to_string(),
            sheet: "Data".to_string(),
            write_mode: WriteMode::Append,
        }
    }

    #[tokio::test]
    async fn start_buffering_creates_one_sub_buffer_per_eligible_destination() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = DataBuffer::new(BufferConfig::default(), AdapterRegistry::default_set(), dir.path().to_path_buf());
        let job = job_with_destination(sheets_destination());

        assert!(buffer.has_eligible_destination(&job).await);
        buffer.start_buffering(&job).await;

        assert_eq!(buffer.sub_buffers.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn non_eligible_destination_never_gets_a_sub_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = DataBuffer::new(BufferConfig::default(), AdapterRegistry::default_set(), dir.path().to_path_buf());
        let job = job_with_destination(Destination::Csv {
            path: "out.csv".to_string(),
            write_mode: WriteMode::Append,
            encoding: "utf-8".to_string(),
        });

        assert!(!buffer.has_eligible_destination(&job).await);
        buffer.start_buffering(&job).await;

        assert!(buffer.sub_buffers.lock().await.is_empty());
    }

    #[tokio::test]
    async fn add_to_buffer_rejects_connection_not_in_job() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = DataBuffer::new(BufferConfig::default(), AdapterRegistry::default_set(), dir.path().to_path_buf());
        let job = job_with_destination(sheets_destination());
        buffer.start_buffering(&job).await;

        let rows: RowSet = vec![];
        let accepted = buffer
            .add_to_buffer(&job, &ConnectionId::from("not-in-job"), "x", "db", None, None, &rows)
            .await;
        assert!(!accepted);
    }

    #[tokio::test]
    async fn add_to_buffer_on_change_skips_identical_rows() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = DataBuffer::new(BufferConfig::default(), AdapterRegistry::default_set(), dir.path().to_path_buf());
        let mut job = job_with_destination(sheets_destination());
        job.trigger = TriggerPolicy::OnChange { last_hash: None };
        buffer.start_buffering(&job).await;

        let mut row = queryrelay_core::Row::default();
        row.0.insert("a".to_string(), serde_json::json!(1));
        let rows: RowSet = vec![row];

        let first = buffer
            .add_to_buffer(&job, &ConnectionId::from("c1"), "conn", "db", None, None, &rows)
            .await;
        let second = buffer
            .add_to_buffer(&job, &ConnectionId::from("c1"), "conn", "db", None, None, &rows)
            .await;
        assert!(first);
        assert!(!second);
    }

    #[tokio::test]
    async fn stop_buffering_removes_the_flusher() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = DataBuffer::new(BufferConfig::default(), AdapterRegistry::default_set(), dir.path().to_path_buf());
        let job = job_with_destination(sheets_destination());
        buffer.start_buffering(&job).await;
        assert!(buffer.flushers.lock().await.contains_key(&job.id));

        buffer.stop_buffering(&job.id).await;
        assert!(!buffer.flushers.lock().await.contains_key(&job.id));
    }
}
