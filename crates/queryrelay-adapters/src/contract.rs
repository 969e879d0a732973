//! The destination adapter contract (component G). A tagged `Destination`
//! plus a small capability set — `send` and an optional
//! `send_multi_connection` — is the crate's only notion of "what a sink is";
//! the executor and the buffer never branch on adapter identity.

use async_trait::async_trait;
use serde::Serialize;

use queryrelay_core::{ConnectionId, JobId, RowSet};

/// Everything a dispatch needs to know beyond the rows themselves.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchMeta {
    pub job_id: JobId,
    pub job_name: String,
    pub group: Option<String>,
    pub run_time_ms: u64,
    pub row_count: usize,
    pub connection_id: ConnectionId,
    pub connection_name: String,
    pub database: String,
    pub financial_year: Option<String>,
    pub partner: Option<String>,
    pub sheet_name_format: Option<String>,
}

/// One connection's contribution to a multi-connection dispatch.
#[derive(Debug, Clone)]
pub struct ConnectionItem {
    pub connection_id: ConnectionId,
    pub connection_name: String,
    pub data: RowSet,
    pub query_results: Option<std::collections::BTreeMap<String, RowSet>>,
    pub connection_failed_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: "send failed".to_string(),
            error: Some(error),
        }
    }
}

/// A sink for rowsets. `send` is the single-connection entry point every
/// adapter must implement; `send_multi_connection` is an optional, more
/// efficient entry point the executor and the data buffer prefer when it
/// exists.
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        rows: &RowSet,
        destination: &queryrelay_core::Destination,
        meta: &DispatchMeta,
    ) -> SendResult;

    /// Default: no multi-connection entry point. Adapters that benefit from
    /// batching (the streaming-eligible ones) override this.
    async fn send_multi_connection(
        &self,
        _items: &[ConnectionItem],
        _destination: &queryrelay_core::Destination,
        _meta: &DispatchMeta,
    ) -> Option<SendResult> {
        None
    }
}
