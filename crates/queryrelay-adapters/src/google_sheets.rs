//! `GoogleSheetsAdapter` — the one streaming-eligible destination by
//! default (the conservative set; configurable per `BufferConfig`).
//! Exposes `send_multi_connection` so the data buffer can deliver a
//! flushed batch across many connections in one HTTP call rather than one
//! call per connection.

use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use queryrelay_core::{Destination, RowSet, WriteMode};

use crate::contract::{ConnectionItem, DestinationAdapter, DispatchMeta, SendResult};

/// `rows` payload shape sent to the (mocked) Sheets API append/overwrite
/// endpoint. A real implementation would exchange this for the Sheets API's
/// `values.append` / `values.update` request body; this crate stops at "a
/// real HTTP call with the right shape" and leaves the concrete transport
/// to the Sheets client the deployer wires in.
fn sheets_endpoint(spreadsheet_id: &str, sheet: &str, write_mode: WriteMode) -> String {
    let verb = match write_mode {
        WriteMode::Append => "append",
        WriteMode::Overwrite => "update",
    };
    format!("https://sheets.googleapis.com/v4/spreadsheets/{spreadsheet_id}/values/{sheet}:{verb}")
}

pub struct GoogleSheetsAdapter {
    client: Client,
    /// Override for tests; `None` uses the real Sheets API host.
    base_override: Option<String>,
}

impl GoogleSheetsAdapter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_override: None,
        }
    }

    #[cfg(test)]
    pub fn with_base(client: Client, base: String) -> Self {
        Self {
            client,
            base_override: Some(base),
        }
    }

    fn endpoint(&self, spreadsheet_id: &str, sheet: &str, write_mode: WriteMode) -> String {
        match &self.base_override {
            Some(base) => {
                let verb = match write_mode {
                    WriteMode::Append => "append",
                    WriteMode::Overwrite => "update",
                };
                format!("{base}/v4/spreadsheets/{spreadsheet_id}/values/{sheet}:{verb}")
            }
            None => sheets_endpoint(spreadsheet_id, sheet, write_mode),
        }
    }
}

impl Default for GoogleSheetsAdapter {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl DestinationAdapter for GoogleSheetsAdapter {
    fn name(&self) -> &'static str {
        "googleSheets"
    }

    async fn send(&self, rows: &RowSet, destination: &Destination, meta: &DispatchMeta) -> SendResult {
        let Destination::GoogleSheets { spreadsheet_id, sheet, write_mode } = destination else {
            return SendResult::failed("sheets adapter given a non-googleSheets destination");
        };
        let url = self.endpoint(spreadsheet_id, sheet, *write_mode);
        let body = serde_json::json!({
            "jobId": meta.job_id,
            "rows": rows,
        });
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                SendResult::ok(format!("wrote {} rows to {sheet}", rows.len()))
            }
            Ok(resp) => SendResult::failed(format!("sheets API status {}", resp.status())),
            Err(e) => {
                warn!(error = %e, "sheets API request failed");
                SendResult::failed(e.to_string())
            }
        }
    }

    async fn send_multi_connection(
        &self,
        items: &[ConnectionItem],
        destination: &Destination,
        meta: &DispatchMeta,
    ) -> Option<SendResult> {
        let Destination::GoogleSheets { spreadsheet_id, sheet, write_mode } = destination else {
            return Some(SendResult::failed(
                "sheets adapter given a non-googleSheets destination",
            ));
        };
        let url = self.endpoint(spreadsheet_id, sheet, *write_mode);
        let body = serde_json::json!({
            "jobId": meta.job_id,
            "items": items.iter().map(|i| serde_json::json!({
                "connectionId": i.connection_id,
                "connectionName": i.connection_name,
                "rows": i.data,
                "connectionFailedMessage": i.connection_failed_message,
            })).collect::<Vec<_>>(),
        });
        let result = match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => SendResult::ok(format!(
                "wrote {} connections' rows to {sheet}",
                items.len()
            )),
            Ok(resp) => SendResult::failed(format!("sheets API status {}", resp.status())),
            Err(e) => {
                warn!(error = %e, "sheets API multi-connection request failed");
                SendResult::failed(e.to_string())
            }
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queryrelay_core::{ConnectionId, JobId, Row};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn meta() -> DispatchMeta {
        DispatchMeta {
            job_id: JobId::from("j1"),
            job_name: "nightly".to_string(),
            group: None,
            run_time_ms: 0,
            row_count: 1,
            connection_id: ConnectionId::from("c1"),
            connection_name: "c1".to_string(),
            database: "db".to_string(),
            financial_year: None,
            partner: None,
            sheet_name_format: None,
        }
    }

    #[tokio::test]
    async fn send_multi_connection_batches_every_item_in_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = GoogleSheetsAdapter::with_base(Client::new(), server.uri());
        let dest = Destination::GoogleSheets {
            spreadsheet_id: "sheet-1".to_string(),
            sheet: "Sheet1".to_string(),
            write_mode: WriteMode::Append,
        };
        let items = vec![
            ConnectionItem {
                connection_id: ConnectionId::from("c1"),
                connection_name: "c1".to_string(),
                data: vec![Row::default()],
                query_results: None,
                connection_failed_message: None,
            },
            ConnectionItem {
                connection_id: ConnectionId::from("c2"),
                connection_name: "c2".to_string(),
                data: vec![Row::default()],
                query_results: None,
                connection_failed_message: None,
            },
        ];
        let result = adapter
            .send_multi_connection(&items, &dest, &meta())
            .await
            .unwrap();
        assert!(result.success);
    }

    #[test]
    fn endpoint_picks_append_or_update_by_write_mode() {
        assert!(sheets_endpoint("s", "Sheet1", WriteMode::Append).ends_with(":append"));
        assert!(sheets_endpoint("s", "Sheet1", WriteMode::Overwrite).ends_with(":update"));
    }
}
