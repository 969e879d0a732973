//! Structured progress events broadcast to observers.

use serde::Serialize;

use queryrelay_core::{ConnectionId, JobId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    JobStarted {
        job_id: JobId,
        job_name: String,
    },
    JobProgress {
        job_id: JobId,
        step: Option<String>,
    },
    ConnectionStarted {
        job_id: JobId,
        connection_id: ConnectionId,
        connection_name: String,
    },
    ConnectionProgress {
        job_id: JobId,
        connection_id: ConnectionId,
        step: Option<String>,
        rows_processed: u64,
        total_rows: Option<u64>,
        percentage: f64,
    },
    ConnectionCompleted {
        job_id: JobId,
        connection_id: ConnectionId,
        rows: Option<u64>,
    },
    ConnectionFailed {
        job_id: JobId,
        connection_id: ConnectionId,
        error: String,
    },
    Completed {
        job_id: JobId,
        completed_connections: usize,
        failed_connections: usize,
        duration_ms: u64,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
    Cancelled {
        job_id: JobId,
    },
}
