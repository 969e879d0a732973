//! The `SessionFactory` seam. The pool manager is generic over this trait
//! so it never needs to know about the SQL Server wire protocol itself — a
//! real driver crate implements it.

use async_trait::async_trait;

use crate::error::PoolError;
use crate::key::ConnectionConfig;

#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    async fn connect(&self, cfg: &ConnectionConfig) -> Result<Self::Session, PoolError>;

    /// Cheap liveness check used before reusing a session pulled from an
    /// existing, possibly-stale pool entry.
    async fn is_alive(&self, session: &Self::Session) -> bool;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    /// A session factory for tests: never touches the network, can be
    /// told to fail specific hosts, and counts connect attempts.
    pub struct FakeSessionFactory {
        pub fail_hosts: Arc<Mutex<std::collections::HashSet<String>>>,
        pub connect_attempts: Arc<AtomicU64>,
        alive: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FakeSessionFactory {
        pub fn new() -> Self {
            Self {
                fail_hosts: Arc::new(Mutex::new(std::collections::HashSet::new())),
                connect_attempts: Arc::new(AtomicU64::new(0)),
                alive: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            }
        }

        pub async fn fail(&self, host: &str) {
            self.fail_hosts.lock().await.insert(host.to_lowercase());
        }

        pub fn attempts(&self) -> u64 {
            self.connect_attempts.load(Ordering::SeqCst)
        }

        /// Makes every subsequent `is_alive` check report dead, simulating
        /// a session whose underlying connection dropped out from under
        /// the pool without a `release` ever happening.
        pub fn kill_sessions(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SessionFactory for FakeSessionFactory {
        type Session = u64;

        async fn connect(&self, cfg: &ConnectionConfig) -> Result<Self::Session, PoolError> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let host = cfg.endpoint.host.to_lowercase();
            if self.fail_hosts.lock().await.contains(&host) {
                return Err(PoolError::ConnectFailed {
                    key: cfg.pool_key().host.clone(),
                    reason: "simulated failure".to_string(),
                });
            }
            Ok(self.connect_attempts.load(Ordering::SeqCst))
        }

        async fn is_alive(&self, _session: &Self::Session) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }
}
