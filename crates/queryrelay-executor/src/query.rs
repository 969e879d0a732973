//! The `QueryRunner` seam. Mirrors the pool
//! manager's `SessionFactory` split: this crate owns run orchestration, while
//! a driver crate outside this workspace plugs in the real SQL Server wire
//! protocol implementation.

use std::time::Duration;

use async_trait::async_trait;

use queryrelay_core::RowSet;
use queryrelay_pool::ConnectionConfig;

use crate::error::QueryError;

#[async_trait]
pub trait QueryRunner: Send + Sync + 'static {
    async fn run(
        &self,
        cfg: &ConnectionConfig,
        query: &str,
        timeout: Duration,
    ) -> Result<RowSet, QueryError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    /// A query runner for tests: returns canned rows per query string (or an
    /// empty rowset for unknown queries), can be told to fail or hang past
    /// the timeout for specific queries, and counts calls.
    pub struct FakeQueryRunner {
        pub rows_by_query: Arc<Mutex<HashMap<String, RowSet>>>,
        pub failing_queries: Arc<Mutex<std::collections::HashSet<String>>>,
        pub timing_out_queries: Arc<Mutex<std::collections::HashSet<String>>>,
        pub calls: Arc<AtomicU64>,
    }

    impl FakeQueryRunner {
        pub fn new() -> Self {
            Self {
                rows_by_query: Arc::new(Mutex::new(HashMap::new())),
                failing_queries: Arc::new(Mutex::new(std::collections::HashSet::new())),
                timing_out_queries: Arc::new(Mutex::new(std::collections::HashSet::new())),
                calls: Arc::new(AtomicU64::new(0)),
            }
        }

        pub async fn set_rows(&self, query: &str, rows: RowSet) {
            self.rows_by_query
                .lock()
                .await
                .insert(query.to_string(), rows);
        }

        pub async fn fail(&self, query: &str) {
            self.failing_queries.lock().await.insert(query.to_string());
        }

        pub async fn time_out(&self, query: &str) {
            self.timing_out_queries
                .lock()
                .await
                .insert(query.to_string());
        }

        pub fn call_count(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryRunner for FakeQueryRunner {
        async fn run(
            &self,
            _cfg: &ConnectionConfig,
            query: &str,
            timeout: Duration,
        ) -> Result<RowSet, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.timing_out_queries.lock().await.contains(query) {
                return Err(QueryError::Timeout(timeout));
            }
            if self.failing_queries.lock().await.contains(query) {
                return Err(QueryError::Failed("simulated query failure".to_string()));
            }
            Ok(self
                .rows_by_query
                .lock()
                .await
                .get(query)
                .cloned()
                .unwrap_or_default())
        }
    }
}
