//! Result types the executor hands back to its caller (the scheduler). The
//! executor receives materialised `Connection`/`Job` values and keeps no
//! long-lived pointers back into the catalogue, so anything the
//! run learned that the catalogue needs to remember — `lastRun`, the updated
//! `onChange` hash, a connection's resolved active endpoint — comes back
//! through these types instead of a mutation.

use std::collections::HashMap;

use queryrelay_adapters::ConnectionItem;
use queryrelay_core::{ConnectionId, Connection, EndpointType, JobId, Row, RunId, TestOutcome};
use queryrelay_state::JobState;

/// One connection's contribution to a run, including the synthetic entries
/// recorded on failure so downstream adapters can render "this connection
/// failed".
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    pub connection_id: ConnectionId,
    pub connection_name: String,
    pub database: String,
    pub financial_year: Option<String>,
    pub partner: Option<String>,
    pub rows: queryrelay_core::RowSet,
    pub query_results: Option<std::collections::BTreeMap<String, queryrelay_core::RowSet>>,
    pub failed_message: Option<String>,
    /// Whether this entry should actually reach destinations this run — the
    /// `onChange` trigger decision. Always `true` for failed connections so
    /// their synthetic entry still surfaces.
    pub dispatch: bool,
}

impl ConnectionOutcome {
    /// A synthetic single-row entry for a connection that never produced
    /// real rows — `dispatch` is always `true` so
    /// downstream adapters can render "this connection failed" regardless
    /// of the job's `onChange` trigger state.
    pub fn failed(connection: &Connection, message: String) -> Self {
        let mut row = Row::default();
        row.0
            .insert("fieldMessage".to_string(), serde_json::Value::String(message.clone()));
        Self {
            connection_id: connection.id.clone(),
            connection_name: connection.display_name.clone(),
            database: connection.database.clone(),
            financial_year: connection.financial_year.clone(),
            partner: connection.partner_name.clone(),
            rows: vec![row],
            query_results: None,
            failed_message: Some(message),
            dispatch: true,
        }
    }

    pub fn to_connection_item(&self) -> ConnectionItem {
        ConnectionItem {
            connection_id: self.connection_id.clone(),
            connection_name: self.connection_name.clone(),
            data: self.rows.clone(),
            query_results: self.query_results.clone(),
            connection_failed_message: self.failed_message.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub job_id: JobId,
    pub state: JobState,
    pub total_connections: usize,
    pub completed_connections: usize,
    pub failed_connections: usize,
    pub errors: Vec<String>,
    /// Set when the run completed or failed with at least one successful
    /// connection — the caller persists this into `Job.last_run`.
    pub last_run_ms: Option<u64>,
    /// The buffer's or executor's final view of the `onChange` content hash
    /// for this run — the caller persists this into `Job.trigger.last_hash`.
    pub updated_trigger_hash: Option<String>,
    /// Which endpoint (primary or fallback) each connection resolved to —
    /// the caller persists this into `Connection.active_endpoint_type`.
    pub endpoint_types: HashMap<ConnectionId, EndpointType>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionTestOutcome {
    pub connection_id: ConnectionId,
    pub test_status: TestOutcome,
    pub active_endpoint_type: Option<EndpointType>,
    pub tested_at_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobTestOutcome {
    pub row_count: usize,
    pub active_endpoint_type: Option<EndpointType>,
}
