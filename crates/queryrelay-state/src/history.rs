//! Append-only execution history, capped at the most recent N=1000 runs.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use queryrelay_core::fsatomic::{read_json_opt, write_json_atomic};

use crate::types::ExecutionHistoryRecord;

const CAPACITY: usize = 1000;

#[derive(Clone)]
pub struct ExecutionHistory {
    records: Arc<Mutex<VecDeque<ExecutionHistoryRecord>>>,
    path: PathBuf,
}

impl ExecutionHistory {
    pub fn open(path: PathBuf) -> std::io::Result<Self> {
        let loaded: Vec<ExecutionHistoryRecord> = read_json_opt(&path)?.unwrap_or_default();
        Ok(Self {
            records: Arc::new(Mutex::new(VecDeque::from(loaded))),
            path,
        })
    }

    pub async fn record(&self, record: ExecutionHistoryRecord) -> std::io::Result<()> {
        let mut records = self.records.lock().await;
        records.push_back(record);
        while records.len() > CAPACITY {
            records.pop_front();
        }
        let snapshot: Vec<_> = records.iter().cloned().collect();
        write_json_atomic(&self.path, &snapshot)
    }

    pub async fn recent(&self, limit: usize) -> Vec<ExecutionHistoryRecord> {
        let records = self.records.lock().await;
        records.iter().rev().take(limit).cloned().collect()
    }

    pub async fn for_job(&self, job_id: &queryrelay_core::JobId) -> Vec<ExecutionHistoryRecord> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| &r.job_id == job_id)
            .cloned()
            .collect()
    }
}
