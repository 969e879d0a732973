//! Progress domain types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use queryrelay_core::{ConnectionId, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Completed | ConnectionState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionProgress {
    pub connection_id: ConnectionId,
    pub connection_name: String,
    pub state: ConnectionState,
    pub step: Option<String>,
    pub rows_processed: u64,
    pub total_rows: Option<u64>,
    pub error: Option<String>,
}

impl ConnectionProgress {
    pub fn pending(connection_id: ConnectionId, connection_name: String) -> Self {
        Self {
            connection_id,
            connection_name,
            state: ConnectionState::Pending,
            step: None,
            rows_processed: 0,
            total_rows: None,
            error: None,
        }
    }

    /// `min(100, 100*rowsProcessed/totalRows)` when `totalRows > 0`, else 0.
    pub fn percentage(&self) -> f64 {
        match self.total_rows {
            Some(total) if total > 0 => {
                (100.0 * self.rows_processed as f64 / total as f64).min(100.0)
            }
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobState,
    pub step: Option<String>,
    pub total_connections: usize,
    pub connections: HashMap<ConnectionId, ConnectionProgress>,
    pub cancel_requested: bool,
    pub started_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    pub error: Option<String>,
}

impl JobProgress {
    pub fn completed_connection_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Completed)
            .map(|c| c.connection_id.clone())
            .collect()
    }

    pub fn failed_connection_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.state == ConnectionState::Failed)
            .map(|c| c.connection_id.clone())
            .collect()
    }

    pub fn any_connection_running(&self) -> bool {
        self.connections
            .values()
            .any(|c| c.state == ConnectionState::Running)
    }
}

/// A terminal run record retained for the UI's execution history view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionHistoryRecord {
    pub run_id: queryrelay_core::RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub state: JobState,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub completed_connections: usize,
    pub failed_connections: usize,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_caps_at_100_and_defaults_to_zero_without_total() {
        let mut p = ConnectionProgress::pending(ConnectionId::from("c1"), "c1".into());
        assert_eq!(p.percentage(), 0.0);

        p.total_rows = Some(10);
        p.rows_processed = 20;
        assert_eq!(p.percentage(), 100.0);

        p.rows_processed = 5;
        assert_eq!(p.percentage(), 50.0);
    }
}
