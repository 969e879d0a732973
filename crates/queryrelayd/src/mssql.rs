//! The concrete SQL Server driver behind the [`SessionFactory`]/[`QueryRunner`]
//! seams the core crates are generic over. Core never links against
//! `tiberius` directly; this module is the one "real driver crate" the
//! rest of the workspace anticipates.
//!
//! Connect flow (TCP connect, `Client::connect`, retry once on a routing
//! redirect) mirrors how `deadpool-tiberius`'s manager builds a client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use queryrelay_core::{Row, RowSet};
use queryrelay_executor::{QueryError, QueryRunner};
use queryrelay_pool::{ConnectionConfig, PoolError, PoolKey, SessionFactory};

type TdsClient = Client<Compat<TcpStream>>;

fn build_config(cfg: &ConnectionConfig) -> Config {
    let mut config = Config::new();
    config.host(&cfg.endpoint.host);
    config.port(cfg.endpoint.port.unwrap_or(1433));
    config.database(&cfg.database);
    config.authentication(AuthMethod::sql_server(
        &cfg.credentials.username,
        cfg.credentials.password.expose(),
    ));
    config.trust_cert();
    config
}

async fn connect(cfg: &ConnectionConfig) -> Result<TdsClient, tiberius::error::Error> {
    let mut config = build_config(cfg);
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        Err(tiberius::error::Error::Routing { host, port }) => {
            config.host(host);
            config.port(port);
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write()).await
        }
        Err(e) => Err(e),
    }
}

/// Opens (and liveness-checks) a TDS connection per the pool's resolved
/// [`ConnectionConfig`]. The pool manager only ever asks "is this session
/// still alive" — it never routes a query through it; `QueryRunner` owns
/// that instead.
pub struct MssqlSessionFactory;

impl MssqlSessionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionFactory for MssqlSessionFactory {
    type Session = Mutex<TdsClient>;

    async fn connect(&self, cfg: &ConnectionConfig) -> Result<Self::Session, PoolError> {
        connect(cfg)
            .await
            .map(Mutex::new)
            .map_err(|e| PoolError::ConnectFailed {
                key: cfg.pool_key().host.clone(),
                reason: e.to_string(),
            })
    }

    async fn is_alive(&self, session: &Self::Session) -> bool {
        session.lock().await.simple_query("").await.is_ok()
    }
}

/// Runs queries by opening its own short-lived TDS connection per
/// [`PoolKey`] and caching it across calls — the pool manager's handles are
/// opaque, so this is the only place a query actually reaches the wire.
pub struct MssqlQueryRunner {
    clients: Mutex<HashMap<PoolKey, Arc<Mutex<TdsClient>>>>,
}

impl MssqlQueryRunner {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client_for(&self, cfg: &ConnectionConfig) -> Result<Arc<Mutex<TdsClient>>, QueryError> {
        let key = cfg.pool_key();
        if let Some(existing) = self.clients.lock().await.get(&key) {
            return Ok(existing.clone());
        }
        let client = connect(cfg)
            .await
            .map_err(|e| QueryError::Failed(e.to_string()))?;
        let client = Arc::new(Mutex::new(client));
        self.clients.lock().await.insert(key, client.clone());
        Ok(client)
    }

    async fn drop_client(&self, cfg: &ConnectionConfig) {
        self.clients.lock().await.remove(&cfg.pool_key());
    }
}

#[async_trait]
impl QueryRunner for MssqlQueryRunner {
    async fn run(
        &self,
        cfg: &ConnectionConfig,
        query: &str,
        timeout: Duration,
    ) -> Result<RowSet, QueryError> {
        let client = self.client_for(cfg).await?;

        let run = async {
            let mut guard = client.lock().await;
            let stream = guard
                .simple_query(query)
                .await
                .map_err(|e| QueryError::Failed(e.to_string()))?;
            let rows = stream
                .into_first_result()
                .await
                .map_err(|e| QueryError::Failed(e.to_string()))?;
            Ok::<RowSet, QueryError>(rows.iter().map(tds_row_to_row).collect())
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => {
                self.drop_client(cfg).await;
                Err(e)
            }
            Err(_) => {
                self.drop_client(cfg).await;
                Err(QueryError::Timeout(timeout))
            }
        }
    }
}

/// Converts one TDS row into this crate's column-name-keyed `Row`, widening
/// every column through its string representation — good enough for the
/// destination adapters, which only ever serialise rows back out to JSON.
fn tds_row_to_row(row: &tiberius::Row) -> Row {
    let mut fields = std::collections::BTreeMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx);
        fields.insert(column.name().to_string(), value);
    }
    Row(fields)
}

fn column_value(row: &tiberius::Row, idx: usize) -> serde_json::Value {
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return serde_json::json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return serde_json::json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return serde_json::json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return serde_json::json!(v);
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return serde_json::json!(v);
    }
    serde_json::Value::Null
}
