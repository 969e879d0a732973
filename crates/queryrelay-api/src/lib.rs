//! queryrelay RPC surface: axum handlers
//! exposed to the hosting UI. Not a CLI — every verb here is a direct
//! translation of a `Scheduler`/`Executor`/`JobQueue` public contract method
//! onto an HTTP route; the core crates never import `axum`.
//!
//! # Routes
//!
//! | Method | Path | Maps to |
//! |---|---|---|
//! | GET | `/api/v1/jobs` | `Scheduler::get_jobs` |
//! | POST | `/api/v1/jobs` | `Scheduler::add_job` |
//! | GET | `/api/v1/jobs/:id` | `Scheduler::get_job` |
//! | PUT | `/api/v1/jobs/:id` | `Scheduler::update_job` |
//! | DELETE | `/api/v1/jobs/:id` | `Scheduler::delete_job` |
//! | POST | `/api/v1/jobs/:id/run` | `Scheduler::run_job_now` |
//! | POST | `/api/v1/jobs/:id/run-subset` | `Scheduler::run_job_for_connections` |
//! | POST | `/api/v1/jobs/:id/cancel` | `ProgressStream::cancel_job` |
//! | GET | `/api/v1/jobs/:id/progress` | `ProgressStream::get_progress` |
//! | GET | `/api/v1/jobs/:id/history` | `ExecutionHistory::for_job` |
//! | GET | `/api/v1/progress` | `ProgressStream::list_progress` |
//! | GET | `/api/v1/history` | `ExecutionHistory::recent` |
//! | GET/POST/PUT/DELETE | `/api/v1/connections[/:id]` | connection CRUD |
//! | POST | `/api/v1/connections/:id/duplicate` | `Scheduler::duplicate_connection` |
//! | POST | `/api/v1/connections/:id/test` | `Scheduler::test_connection` |
//! | POST | `/api/v1/connections/bulk-test` | `Scheduler::bulk_test_connections` |
//! | GET | `/api/v1/queue/metrics` | `JobQueue::metrics` |
//! | GET | `/api/v1/queue/running` | `JobQueue::get_running` |
//! | GET | `/api/v1/queue/pending` | `JobQueue::get_pending` |
//! | GET | `/api/v1/pool/metrics` | `PoolManager::metrics` |
//! | GET | `/api/v1/settings` | `Scheduler::settings` |
//! | GET | `/api/v1/log/tail` | `Logger::tail` |

pub mod error;
pub mod handlers;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;

use queryrelay_executor::{QueryRunner, SessionFactory};

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

pub fn build_router<F: SessionFactory, Q: QueryRunner>(state: ApiState<F, Q>) -> Router {
    let routes = Router::new()
        .route("/jobs", get(handlers::list_jobs).post(handlers::create_job))
        .route(
            "/jobs/{id}",
            get(handlers::get_job).put(handlers::update_job).delete(handlers::delete_job),
        )
        .route("/jobs/{id}/run", post(handlers::run_job_now))
        .route("/jobs/{id}/run-subset", post(handlers::run_job_for_connections))
        .route("/jobs/{id}/cancel", post(handlers::cancel_job))
        .route("/jobs/{id}/progress", get(handlers::get_job_progress))
        .route("/jobs/{id}/history", get(handlers::job_history))
        .route("/progress", get(handlers::list_progress))
        .route("/history", get(handlers::recent_history))
        .route(
            "/connections",
            get(handlers::list_connections).post(handlers::create_connection),
        )
        .route(
            "/connections/{id}",
            get(handlers::get_connection)
                .put(handlers::update_connection)
                .delete(handlers::delete_connection),
        )
        .route("/connections/{id}/duplicate", post(handlers::duplicate_connection))
        .route("/connections/{id}/test", post(handlers::test_connection))
        .route("/connections/bulk-test", post(handlers::bulk_test_connections))
        .route("/queue/metrics", get(handlers::queue_metrics))
        .route("/queue/running", get(handlers::queue_running))
        .route("/queue/pending", get(handlers::queue_pending))
        .route("/pool/metrics", get(handlers::pool_metrics))
        .route("/settings", get(handlers::get_settings))
        .route("/log/tail", get(handlers::tail_log))
        .with_state(state);

    Router::new().nest("/api/v1", routes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use queryrelay_adapters::AdapterRegistry;
    use queryrelay_buffer::{BufferConfig, DataBuffer};
    use queryrelay_core::{
        Connection, ConnectionId, Credentials, Endpoint, Job, JobId, QuerySpec, RecurrenceRule,
        SecretString, TestOutcome, TriggerPolicy,
    };
    use queryrelay_executor::{Executor, ExecutorConfig, FakeQueryRunner};
    use queryrelay_log::Logger;
    use queryrelay_pool::{FakeSessionFactory, PoolManager, PoolManagerConfig};
    use queryrelay_queue::{JobQueue, QueueConfig};
    use queryrelay_scheduler::{CatalogueStore, Scheduler};
    use queryrelay_state::{ExecutionHistory, ProgressStream};

    use super::*;

    async fn test_state() -> (ApiState<FakeSessionFactory, FakeQueryRunner>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CatalogueStore::open(dir.path().join("catalogue.json")).unwrap();
        let queue = Arc::new(JobQueue::start(QueueConfig::default()));
        let pool = Arc::new(PoolManager::new(FakeSessionFactory::new(), PoolManagerConfig::default()));
        let runner = Arc::new(FakeQueryRunner::new());
        let progress = ProgressStream::new(dir.path().join("checkpoints"));
        let buffer = Arc::new(DataBuffer::new(
            BufferConfig::default(),
            AdapterRegistry::default_set(),
            dir.path().join("buffer-backup"),
        ));
        let history = ExecutionHistory::open(dir.path().join("history.json")).unwrap();
        let executor = Arc::new(Executor::new(
            pool,
            runner,
            progress.clone(),
            buffer,
            AdapterRegistry::default_set(),
            history,
            ExecutorConfig::default(),
        ));
        let scheduler = Scheduler::new(store, queue, executor, progress);
        let logger = Arc::new(Logger::open(dir.path().join("app.log")).unwrap());
        (ApiState::new(scheduler, logger), dir)
    }

    fn test_connection() -> Connection {
        Connection {
            id: ConnectionId::from("c1"),
            display_name: "store 1".to_string(),
            primary: Endpoint {
                host: "db.example.com".to_string(),
                port: None,
            },
            database: "sales".to_string(),
            credentials: Credentials {
                username: "svc".to_string(),
                password: SecretString::new("x"),
            },
            fallback: None,
            group_tag: None,
            partner_name: None,
            financial_year: None,
            store_short_name: None,
            last_tested: None,
            test_status: TestOutcome::Untested,
            active_endpoint_type: None,
        }
    }

    fn test_job() -> Job {
        Job {
            id: JobId::from("j1"),
            display_name: "nightly".to_string(),
            enabled: true,
            connection_ids: vec![ConnectionId::from("c1")],
            query: QuerySpec::Single {
                query: "select 1".to_string(),
            },
            recurrence: RecurrenceRule::Once,
            trigger: TriggerPolicy::Always,
            destinations: vec![],
            group: None,
            last_run: None,
        }
    }

    #[tokio::test]
    async fn list_jobs_starts_empty() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/api/v1/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_get_connection() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);

        let body = serde_json::to_vec(&test_connection()).unwrap();
        let resp = router
            .clone()
            .oneshot(
                Request::post("/api/v1/connections")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = router
            .oneshot(Request::get("/api/v1/connections/c1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_nonexistent_job_is_404() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/api/v1/jobs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_job_then_run_now_is_accepted() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);

        let conn_body = serde_json::to_vec(&test_connection()).unwrap();
        router
            .clone()
            .oneshot(
                Request::post("/api/v1/connections")
                    .header("content-type", "application/json")
                    .body(Body::from(conn_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let job_body = serde_json::to_vec(&test_job()).unwrap();
        let resp = router
            .clone()
            .oneshot(
                Request::post("/api/v1/jobs")
                    .header("content-type", "application/json")
                    .body(Body::from(job_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = router
            .oneshot(
                Request::post("/api/v1/jobs/j1/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn queue_metrics_returns_ok() {
        let (state, _dir) = test_state().await;
        let router = build_router(state);
        let resp = router
            .oneshot(Request::get("/api/v1/queue/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
