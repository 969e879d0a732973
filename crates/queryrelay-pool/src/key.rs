//! Canonical pool keys.

use serde::{Deserialize, Serialize};

use queryrelay_core::{Connection, Endpoint};

pub const DEFAULT_PORT: u16 = 1433;

/// Keyed by the canonical tuple (lower-cased host, port, lower-cased
/// database, user). Identical logical endpoints share one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
}

impl PoolKey {
    pub fn new(host: &str, port: Option<u16>, database: &str, user: &str) -> Self {
        Self {
            host: host.to_lowercase(),
            port: port.unwrap_or(DEFAULT_PORT),
            database: database.to_lowercase(),
            user: user.to_string(),
        }
    }

    pub fn from_endpoint(connection: &Connection, endpoint: &Endpoint) -> Self {
        Self::new(
            &endpoint.host,
            endpoint.port,
            &connection.database,
            &connection.credentials.username,
        )
    }
}

/// The fully-resolved configuration needed to open a session: which
/// connection, which endpoint (primary or fallback) was chosen, and the
/// credentials/database to use.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connection_id: queryrelay_core::ConnectionId,
    pub endpoint: Endpoint,
    pub endpoint_type: queryrelay_core::EndpointType,
    pub database: String,
    pub credentials: queryrelay_core::Credentials,
}

impl ConnectionConfig {
    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(
            &self.endpoint.host,
            self.endpoint.port,
            &self.database,
            &self.credentials.username,
        )
    }
}
