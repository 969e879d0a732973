//! A single `(jobId, destination)` sub-buffer: the live item queue, its
//! crash-recovery backup, and the flush algorithm.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{info, warn};

use queryrelay_core::fsatomic::{read_json_opt, remove_if_exists, write_json_atomic};
use queryrelay_core::{Destination, DestinationKind, JobId};
use queryrelay_adapters::{AdapterRegistry, ConnectionItem, DispatchMeta};

use crate::types::{BufferBackup, BufferedItem};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct SubBuffer {
    pub job_id: JobId,
    pub destination: Destination,
    items: Mutex<VecDeque<BufferedItem>>,
    flushing: Mutex<()>,
    backup_path: PathBuf,
}

impl SubBuffer {
    pub fn new(job_id: JobId, destination: Destination, backup_dir: &std::path::Path) -> Self {
        let backup_path = backup_dir.join(format!("{job_id}__{:?}.json", destination.kind()));
        Self {
            job_id,
            destination,
            items: Mutex::new(VecDeque::new()),
            flushing: Mutex::new(()),
            backup_path,
        }
    }

    pub async fn push(&self, item: BufferedItem) -> usize {
        let mut items = self.items.lock().await;
        items.push_back(item);
        let snapshot: Vec<BufferedItem> = items.iter().cloned().collect();
        let total_rows: usize = items.iter().map(|i| i.row_count()).sum();
        drop(items);
        self.persist_backup(&snapshot).await;
        total_rows
    }

    async fn persist_backup(&self, items: &[BufferedItem]) {
        let backup = BufferBackup {
            timestamp_ms: now_ms(),
            destination_type: self.destination.kind(),
            destination: self.destination.clone(),
            buffer: items.to_vec(),
        };
        if let Err(e) = write_json_atomic(&self.backup_path, &backup) {
            warn!(path = ?self.backup_path, error = %e, "failed to persist buffer backup");
        }
    }

    async fn clear_backup(&self) {
        let _ = remove_if_exists(&self.backup_path);
    }

    pub async fn load_backup(&self) -> std::io::Result<usize> {
        let Some(backup) = read_json_opt::<BufferBackup>(&self.backup_path)? else {
            return Ok(0);
        };
        let mut items = self.items.lock().await;
        for item in backup.buffer.into_iter().rev() {
            items.push_front(item);
        }
        Ok(items.len())
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Runs the size/time-triggered flush. Returns `true` if a flush
    /// actually ran (buffer was non-empty and no flush was already in
    /// flight).
    pub async fn flush(&self, adapters: &AdapterRegistry, job_name: &str) -> bool {
        let Ok(_guard) = self.flushing.try_lock() else {
            return false;
        };

        let snapshot: Vec<BufferedItem> = {
            let mut items = self.items.lock().await;
            if items.is_empty() {
                return false;
            }
            items.drain(..).collect()
        };

        let Some(adapter) = adapters.get(self.destination.kind()) else {
            warn!(kind = ?self.destination.kind(), "no adapter registered, dropping flush attempt");
            self.requeue_front(snapshot).await;
            return true;
        };

        let connection_items: Vec<ConnectionItem> = snapshot
            .iter()
            .map(|item| ConnectionItem {
                connection_id: item.connection_id.clone(),
                connection_name: item.connection_name.clone(),
                data: item.rows.clone(),
                query_results: None,
                connection_failed_message: None,
            })
            .collect();
        let total_rows: usize = snapshot.iter().map(|i| i.row_count()).sum();
        let meta = DispatchMeta {
            job_id: self.job_id.clone(),
            job_name: job_name.to_string(),
            group: None,
            run_time_ms: now_ms(),
            row_count: total_rows,
            connection_id: snapshot[0].connection_id.clone(),
            connection_name: snapshot[0].connection_name.clone(),
            database: snapshot[0].database.clone(),
            financial_year: snapshot[0].financial_year.clone(),
            partner: snapshot[0].partner.clone(),
            sheet_name_format: None,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match adapter
                .send_multi_connection(&connection_items, &self.destination, &meta)
                .await
            {
                Some(result) => result,
                None => {
                    let mut last = adapter.send(&snapshot[0].rows, &self.destination, &meta).await;
                    for item in &snapshot[1..] {
                        let mut item_meta = meta.clone();
                        item_meta.connection_id = item.connection_id.clone();
                        item_meta.connection_name = item.connection_name.clone();
                        item_meta.row_count = item.row_count();
                        let r = adapter.send(&item.rows, &self.destination, &item_meta).await;
                        if !r.success {
                            last = r;
                        }
                    }
                    last
                }
            };

            if result.success {
                self.clear_backup().await;
                info!(job_id = %self.job_id, kind = ?self.destination.kind(), rows = total_rows, "buffer flush delivered");
                return true;
            }

            warn!(
                job_id = %self.job_id,
                kind = ?self.destination.kind(),
                attempt,
                error = ?result.error,
                "buffer flush attempt failed"
            );
            if attempt >= MAX_ATTEMPTS {
                break;
            }
            tokio::time::sleep(INITIAL_BACKOFF * 2u32.pow(attempt - 1)).await;
        }

        self.requeue_front(snapshot).await;
        true
    }

    /// Prepend the failed snapshot back ahead of anything that arrived
    /// during the flush, and rewrite the on-disk backup.
    async fn requeue_front(&self, snapshot: Vec<BufferedItem>) {
        let merged = {
            let mut items = self.items.lock().await;
            for item in snapshot.into_iter().rev() {
                items.push_front(item);
            }
            items.iter().cloned().collect::<Vec<_>>()
        };
        self.persist_backup(&merged).await;
    }
}

pub type SharedSubBuffer = Arc<SubBuffer>;
