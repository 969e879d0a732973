//! Types flowing through a sub-buffer, including its crash-recovery
//! backup file shape.

use serde::{Deserialize, Serialize};

use queryrelay_core::{ConnectionId, Destination, DestinationKind, RowSet};

/// One connection's rows queued for a streaming-eligible destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedItem {
    pub connection_id: ConnectionId,
    pub connection_name: String,
    pub database: String,
    pub financial_year: Option<String>,
    pub partner: Option<String>,
    pub rows: RowSet,
}

impl BufferedItem {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// On-disk shape of a sub-buffer's crash-recovery backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferBackup {
    pub timestamp_ms: u64,
    pub destination_type: DestinationKind,
    pub destination: Destination,
    pub buffer: Vec<BufferedItem>,
}
