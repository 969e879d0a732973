//! `WebhookAdapter` and `CustomApiAdapter` — HTTP POST/PUT/GET dispatch via
//! `reqwest`. Both destination kinds share the same transport:
//! a configurable URL, method, and header set; they are kept as separate
//! adapters because the catalogue models them as distinct `Destination`
//! variants (operators configure them independently even though delivery
//! is identical).

use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use queryrelay_core::{Destination, RowSet};

use crate::contract::{DestinationAdapter, DispatchMeta, SendResult};

async fn post_json(client: &Client, url: &str, method: &str, headers: &std::collections::HashMap<String, String>, body: &serde_json::Value) -> SendResult {
    let mut builder = match method.to_ascii_uppercase().as_str() {
        "GET" => client.get(url),
        "PUT" => client.put(url),
        "PATCH" => client.patch(url),
        _ => client.post(url),
    };
    for (k, v) in headers {
        builder = builder.header(k, v);
    }
    let response = builder.json(body).send().await;
    match response {
        Ok(resp) if resp.status().is_success() => {
            SendResult::ok(format!("{} {}", resp.status().as_u16(), url))
        }
        Ok(resp) => {
            let status = resp.status();
            warn!(%url, %status, "webhook rejected payload");
            SendResult::failed(format!("non-success status {status}"))
        }
        Err(e) => {
            warn!(%url, error = %e, "webhook request failed");
            SendResult::failed(e.to_string())
        }
    }
}

fn rows_payload(rows: &RowSet, meta: &DispatchMeta) -> serde_json::Value {
    serde_json::json!({
        "jobId": meta.job_id,
        "jobName": meta.job_name,
        "connectionId": meta.connection_id,
        "connectionName": meta.connection_name,
        "rowCount": meta.row_count,
        "rows": rows,
    })
}

pub struct WebhookAdapter {
    client: Client,
}

impl WebhookAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for WebhookAdapter {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl DestinationAdapter for WebhookAdapter {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, rows: &RowSet, destination: &Destination, meta: &DispatchMeta) -> SendResult {
        let Destination::Webhook { url, method, headers, .. } = destination else {
            return SendResult::failed("webhook adapter given a non-webhook destination");
        };
        post_json(&self.client, url, method, headers, &rows_payload(rows, meta)).await
    }
}

pub struct CustomApiAdapter {
    client: Client,
}

impl CustomApiAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for CustomApiAdapter {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl DestinationAdapter for CustomApiAdapter {
    fn name(&self) -> &'static str {
        "customApi"
    }

    async fn send(&self, rows: &RowSet, destination: &Destination, meta: &DispatchMeta) -> SendResult {
        let Destination::CustomApi { url, method, headers, .. } = destination else {
            return SendResult::failed("custom api adapter given a non-customApi destination");
        };
        post_json(&self.client, url, method, headers, &rows_payload(rows, meta)).await
    }
}
