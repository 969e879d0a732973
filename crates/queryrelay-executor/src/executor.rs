//! The executor (component D): drives one job run across its
//! connections, dispatching to non-streaming destinations directly and
//! handing streaming-eligible destinations off to the [`DataBuffer`].
//!
//! Generic over two seams: [`SessionFactory`] (which the pool manager uses
//! to open sessions) and [`QueryRunner`] (which actually runs a query
//! against a resolved [`ConnectionConfig`]). The pool's [`PoolHandle`] is
//! intentionally opaque — it exposes no session back to the caller — so a
//! second trait is the only way this crate can run a query without itself
//! depending on the SQL Server wire protocol.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::warn;

use queryrelay_adapters::{AdapterRegistry, DispatchMeta};
use queryrelay_buffer::DataBuffer;
use queryrelay_core::{
    Connection, ConnectionId, Job, JobId, QuerySpec, RowSet, RunId, TriggerPolicy,
};
use queryrelay_pool::{ConnectionConfig, PoolManager, SessionFactory};
use queryrelay_state::{ExecutionHistory, ExecutionHistoryRecord, JobState, ProgressStream};

use crate::error::{ExecutorError, ExecutorResult, QueryError};
use crate::outcome::{ConnectionOutcome, ConnectionTestOutcome, JobTestOutcome, RunSummary};
use crate::query::QueryRunner;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub query_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of running a job's query against one connection, short of
/// knowing whether it should be dispatched.
enum QueryPhase {
    Cancelled,
    Rows(RowSet, Option<BTreeMap<String, RowSet>>),
}

pub struct Executor<F: SessionFactory, Q: QueryRunner> {
    pool: Arc<PoolManager<F>>,
    query_runner: Arc<Q>,
    progress: ProgressStream,
    buffer: Arc<DataBuffer>,
    adapters: AdapterRegistry,
    history: ExecutionHistory,
    config: ExecutorConfig,
    /// `onChange` hashes for jobs with no streaming-eligible destination —
    /// `DataBuffer` owns this bookkeeping for jobs it buffers, so this map
    /// only ever tracks the jobs it doesn't.
    trigger_hashes: Mutex<HashMap<JobId, String>>,
}

impl<F: SessionFactory, Q: QueryRunner> Executor<F, Q> {
    pub fn new(
        pool: Arc<PoolManager<F>>,
        query_runner: Arc<Q>,
        progress: ProgressStream,
        buffer: Arc<DataBuffer>,
        adapters: AdapterRegistry,
        history: ExecutionHistory,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            query_runner,
            progress,
            buffer,
            adapters,
            history,
            config,
            trigger_hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `job` across every connection it names. A no-op (returns
    /// `None`, no progress record, no history entry) if the job is
    /// disabled.
    pub async fn run_job(&self, job: &Job, connections: &[Connection]) -> Option<RunSummary> {
        if !job.enabled {
            return None;
        }
        Some(self.execute(job, connections, None, false).await)
    }

    /// Runs `job` restricted to `subset` of its connections (a manual
    /// re-run of a failed subset).
    pub async fn run_job_for_connections(
        &self,
        job: &Job,
        connections: &[Connection],
        subset: &[ConnectionId],
    ) -> Option<RunSummary> {
        if !job.enabled {
            return None;
        }
        Some(self.execute(job, connections, Some(subset), false).await)
    }

    /// Resumes a job from its last on-disk checkpoint after a crash — the
    /// connections it already completed or failed are seeded from the
    /// checkpoint rather than re-driven.
    pub async fn resume_job(&self, job: &Job, connections: &[Connection]) -> Option<RunSummary> {
        if !job.enabled {
            return None;
        }
        Some(self.execute(job, connections, None, true).await)
    }

    /// Opens (and immediately releases) a pool for `connection`, trying the
    /// fallback endpoint if the primary fails. Dispatches nothing.
    pub async fn test_connection(&self, connection: &Connection) -> ConnectionTestOutcome {
        let tested_at_ms = now_ms();
        match self.acquire_with_fallback(connection).await {
            Ok((handle, _cfg, endpoint_type)) => {
                self.pool.release(&handle).await;
                ConnectionTestOutcome {
                    connection_id: connection.id.clone(),
                    test_status: queryrelay_core::TestOutcome::Connected,
                    active_endpoint_type: Some(endpoint_type),
                    tested_at_ms,
                    error: None,
                }
            }
            Err(reason) => ConnectionTestOutcome {
                connection_id: connection.id.clone(),
                test_status: queryrelay_core::TestOutcome::Failed,
                active_endpoint_type: None,
                tested_at_ms,
                error: Some(reason),
            },
        }
    }

    /// Runs `job`'s query against one connection and reports only the row
    /// count — no progress record, no destination dispatch .
    pub async fn test_job(
        &self,
        job: &Job,
        connection: &Connection,
    ) -> ExecutorResult<JobTestOutcome> {
        let (handle, cfg, endpoint_type) =
            self.acquire_with_fallback(connection)
                .await
                .map_err(|reason| ExecutorError::ConnectFailed {
                    connection: connection.id.clone(),
                    reason,
                })?;
        let result = self.run_query_spec_plain(&job.query, &cfg).await;
        self.pool.release(&handle).await;
        let (rows, _) = result?;
        Ok(JobTestOutcome {
            row_count: rows.len(),
            active_endpoint_type: Some(endpoint_type),
        })
    }

    /// The append-only run history this executor records to  — exposed so the RPC surface can list
    /// past runs without this crate knowing anything about HTTP.
    pub fn history(&self) -> &ExecutionHistory {
        &self.history
    }

    /// The session pool manager this executor acquires connections from
    /// — exposed so the RPC surface can report pool metrics.
    pub fn pool(&self) -> &Arc<PoolManager<F>> {
        &self.pool
    }

    fn effective_connections<'a>(
        job: &Job,
        connections: &'a [Connection],
        subset: Option<&[ConnectionId]>,
    ) -> Vec<&'a Connection> {
        let by_id: HashMap<&ConnectionId, &Connection> =
            connections.iter().map(|c| (&c.id, c)).collect();
        job.deduped_connection_ids()
            .iter()
            .filter(|id| subset.map(|s| s.contains(id)).unwrap_or(true))
            .filter_map(|id| by_id.get(id).copied())
            .collect()
    }

    async fn execute(
        &self,
        job: &Job,
        connections: &[Connection],
        subset: Option<&[ConnectionId]>,
        resume: bool,
    ) -> RunSummary {
        let run_id = RunId::generate();
        let to_run = Self::effective_connections(job, connections, subset);

        if let TriggerPolicy::OnChange {
            last_hash: Some(hash),
        } = &job.trigger
        {
            self.trigger_hashes
                .lock()
                .await
                .insert(job.id.clone(), hash.clone());
        }

        let buffering_active = self.buffer.has_eligible_destination(job).await;

        if let Err(e) = self
            .progress
            .start_job(job.id.clone(), job.display_name.clone(), to_run.len(), resume)
            .await
        {
            warn!(job_id = %job.id, error = %e, "failed to start progress record");
        }
        if buffering_active {
            self.buffer.start_buffering(job).await;
        }

        let already_done: HashSet<ConnectionId> = if resume {
            self.progress
                .get_progress(&job.id)
                .await
                .map(|p| p.connections.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            HashSet::new()
        };

        let mut accumulator: Vec<ConnectionOutcome> = Vec::new();
        let mut endpoint_types = HashMap::new();

        for connection in to_run.iter().filter(|c| !already_done.contains(&c.id)) {
            // (a) cancellation check before starting the next connection.
            if self.progress.is_cancellation_requested(&job.id).await {
                return self
                    .finish_cancelled(run_id, job, to_run.len(), buffering_active)
                    .await;
            }

            let _ = self
                .progress
                .start_connection(&job.id, connection.id.clone(), connection.display_name.clone())
                .await;
            let _ = self
                .progress
                .update_connection_progress(
                    &job.id,
                    &connection.id,
                    Some("connecting".to_string()),
                    None,
                    None,
                )
                .await;

            let (handle, cfg, endpoint_type) = match self.acquire_with_fallback(connection).await {
                Ok(v) => v,
                Err(reason) => {
                    let _ = self
                        .progress
                        .fail_connection(&job.id, &connection.id, reason.clone())
                        .await;
                    accumulator.push(ConnectionOutcome::failed(connection, reason));
                    continue;
                }
            };
            endpoint_types.insert(connection.id.clone(), endpoint_type);

            // (b) cancellation check after connecting, before running queries.
            if self.progress.is_cancellation_requested(&job.id).await {
                self.pool.release(&handle).await;
                return self
                    .finish_cancelled(run_id, job, to_run.len(), buffering_active)
                    .await;
            }

            let _ = self
                .progress
                .update_connection_progress(&job.id, &connection.id, Some("running".to_string()), None, None)
                .await;

            match self.run_queries(&job.id, &job.query, &cfg).await {
                Ok(QueryPhase::Cancelled) => {
                    self.pool.release(&handle).await;
                    return self
                        .finish_cancelled(run_id, job, to_run.len(), buffering_active)
                        .await;
                }
                Ok(QueryPhase::Rows(rows, query_results)) => {
                    let row_count = rows.len() as u64;
                    let _ = self
                        .progress
                        .update_connection_progress(
                            &job.id,
                            &connection.id,
                            Some("processing".to_string()),
                            Some(row_count),
                            Some(row_count),
                        )
                        .await;

                    let dispatch = if rows.is_empty() {
                        false
                    } else if buffering_active {
                        self.buffer
                            .add_to_buffer(
                                job,
                                &connection.id,
                                &connection.display_name,
                                &connection.database,
                                connection.financial_year.clone(),
                                connection.partner_name.clone(),
                                &rows,
                            )
                            .await
                    } else {
                        self.evaluate_trigger(&job.id, &job.trigger, &rows).await
                    };

                    let _ = self
                        .progress
                        .complete_connection(&job.id, &connection.id, Some(row_count))
                        .await;
                    accumulator.push(ConnectionOutcome {
                        connection_id: connection.id.clone(),
                        connection_name: connection.display_name.clone(),
                        database: connection.database.clone(),
                        financial_year: connection.financial_year.clone(),
                        partner: connection.partner_name.clone(),
                        rows,
                        query_results,
                        failed_message: None,
                        dispatch,
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    let _ = self
                        .progress
                        .fail_connection(&job.id, &connection.id, msg.clone())
                        .await;
                    accumulator.push(ConnectionOutcome::failed(connection, msg));
                }
            }

            self.pool.release(&handle).await;
        }

        let snapshot = self.progress.get_progress(&job.id).await;
        let completed = snapshot
            .as_ref()
            .map(|p| p.completed_connection_ids().len())
            .unwrap_or(0);
        let failed = snapshot
            .as_ref()
            .map(|p| p.failed_connection_ids().len())
            .unwrap_or(0);
        let started_at_ms = snapshot.as_ref().map(|p| p.started_at_ms).unwrap_or(0);
        let errors: Vec<String> = snapshot
            .as_ref()
            .map(|p| p.connections.values().filter_map(|c| c.error.clone()).collect())
            .unwrap_or_default();

        // A run where not a single connection produced data is a failed
        // run, even though each failed connection still left a synthetic
        // accumulator entry.
        if completed == 0 {
            if buffering_active {
                self.buffer.stop_buffering(&job.id).await;
            }
            let _ = self.progress.fail_job(&job.id, "no data retrieved".to_string()).await;
            self.record_history(
                &run_id,
                job,
                JobState::Failed,
                started_at_ms,
                completed,
                failed,
                errors.first().cloned(),
            )
            .await;
            return RunSummary {
                run_id,
                job_id: job.id.clone(),
                state: JobState::Failed,
                total_connections: to_run.len(),
                completed_connections: completed,
                failed_connections: failed,
                errors,
                last_run_ms: None,
                updated_trigger_hash: None,
                endpoint_types,
            };
        }

        // (c) cancellation check before the destination-dispatch phase.
        if self.progress.is_cancellation_requested(&job.id).await {
            return self
                .finish_cancelled(run_id, job, to_run.len(), buffering_active)
                .await;
        }

        self.dispatch_to_destinations(job, &accumulator).await;

        if buffering_active {
            self.buffer.stop_buffering(&job.id).await;
        }

        let updated_trigger_hash = if buffering_active {
            self.buffer.current_hash(&job.id).await
        } else {
            self.trigger_hashes.lock().await.get(&job.id).cloned()
        };

        let _ = self.progress.complete_job(&job.id).await;
        self.record_history(
            &run_id,
            job,
            JobState::Completed,
            started_at_ms,
            completed,
            failed,
            errors.first().cloned(),
        )
        .await;

        RunSummary {
            run_id,
            job_id: job.id.clone(),
            state: JobState::Completed,
            total_connections: to_run.len(),
            completed_connections: completed,
            failed_connections: failed,
            errors,
            last_run_ms: Some(now_ms()),
            updated_trigger_hash,
            endpoint_types,
        }
    }

    /// Sends every dispatchable accumulator entry to the job's non-streaming
    /// destinations, preferring `send_multi_connection` when the adapter
    /// offers it.
    async fn dispatch_to_destinations(&self, job: &Job, accumulator: &[ConnectionOutcome]) {
        for destination in &job.destinations {
            if self.buffer.is_eligible(destination.kind()).await {
                continue;
            }
            let Some(adapter) = self.adapters.get(destination.kind()) else {
                warn!(kind = ?destination.kind(), "no adapter registered for destination");
                continue;
            };

            let dispatchable: Vec<&ConnectionOutcome> =
                accumulator.iter().filter(|o| o.dispatch).collect();
            if dispatchable.is_empty() {
                continue;
            }

            let run_time_ms = now_ms();
            let total_rows: usize = dispatchable.iter().map(|o| o.rows.len()).sum();
            let meta = Self::build_meta(job, dispatchable[0], total_rows, run_time_ms);

            let items: Vec<_> = dispatchable.iter().map(|o| o.to_connection_item()).collect();
            match adapter.send_multi_connection(&items, destination, &meta).await {
                Some(_) => {}
                None => {
                    for outcome in &dispatchable {
                        let item_meta = Self::build_meta(job, outcome, outcome.rows.len(), run_time_ms);
                        adapter.send(&outcome.rows, destination, &item_meta).await;
                    }
                }
            }
        }
    }

    fn build_meta(job: &Job, outcome: &ConnectionOutcome, row_count: usize, run_time_ms: u64) -> DispatchMeta {
        DispatchMeta {
            job_id: job.id.clone(),
            job_name: job.display_name.clone(),
            group: job.group.clone(),
            run_time_ms,
            row_count,
            connection_id: outcome.connection_id.clone(),
            connection_name: outcome.connection_name.clone(),
            database: outcome.database.clone(),
            financial_year: outcome.financial_year.clone(),
            partner: outcome.partner.clone(),
            sheet_name_format: None,
        }
    }

    async fn finish_cancelled(
        &self,
        run_id: RunId,
        job: &Job,
        total_connections: usize,
        buffering_active: bool,
    ) -> RunSummary {
        if buffering_active {
            self.buffer.stop_buffering(&job.id).await;
        }
        let _ = self.progress.cancel_job_complete(&job.id).await;

        let snapshot = self.progress.get_progress(&job.id).await;
        let completed = snapshot
            .as_ref()
            .map(|p| p.completed_connection_ids().len())
            .unwrap_or(0);
        let failed = snapshot
            .as_ref()
            .map(|p| p.failed_connection_ids().len())
            .unwrap_or(0);
        let started_at_ms = snapshot.as_ref().map(|p| p.started_at_ms).unwrap_or(0);

        self.record_history(&run_id, job, JobState::Cancelled, started_at_ms, completed, failed, None)
            .await;

        RunSummary {
            run_id,
            job_id: job.id.clone(),
            state: JobState::Cancelled,
            total_connections,
            completed_connections: completed,
            failed_connections: failed,
            errors: Vec::new(),
            last_run_ms: None,
            updated_trigger_hash: None,
            endpoint_types: HashMap::new(),
        }
    }

    async fn record_history(
        &self,
        run_id: &RunId,
        job: &Job,
        state: JobState,
        started_at_ms: u64,
        completed: usize,
        failed: usize,
        error: Option<String>,
    ) {
        let record = ExecutionHistoryRecord {
            run_id: run_id.clone(),
            job_id: job.id.clone(),
            job_name: job.display_name.clone(),
            state,
            started_at_ms,
            finished_at_ms: now_ms(),
            completed_connections: completed,
            failed_connections: failed,
            error,
        };
        if let Err(e) = self.history.record(record).await {
            warn!(job_id = %job.id, error = %e, "failed to persist execution history record");
        }
    }

    /// `onChange` dispatch decision for jobs with no streaming-eligible
    /// destination. `DataBuffer::add_to_buffer` owns this same decision for
    /// jobs it buffers, so the two never track the same job.
    async fn evaluate_trigger(&self, job_id: &JobId, trigger: &TriggerPolicy, rows: &RowSet) -> bool {
        match trigger {
            TriggerPolicy::Always => true,
            TriggerPolicy::OnChange { .. } => {
                let hash = queryrelay_core::content_hash(rows);
                let mut hashes = self.trigger_hashes.lock().await;
                let changed = hashes.get(job_id) != Some(&hash);
                if changed {
                    hashes.insert(job_id.clone(), hash);
                }
                changed
            }
        }
    }

    async fn acquire_with_fallback(
        &self,
        connection: &Connection,
    ) -> Result<(queryrelay_pool::PoolHandle, ConnectionConfig, queryrelay_core::EndpointType), String> {
        let primary_cfg = Self::build_config(connection, &connection.primary, queryrelay_core::EndpointType::Primary);
        match self.pool.acquire(&primary_cfg).await {
            Ok(handle) => Ok((handle, primary_cfg, queryrelay_core::EndpointType::Primary)),
            Err(primary_err) => {
                if let Some(fallback) = &connection.fallback {
                    let fallback_cfg =
                        Self::build_config(connection, fallback, queryrelay_core::EndpointType::Fallback);
                    match self.pool.acquire(&fallback_cfg).await {
                        Ok(handle) => return Ok((handle, fallback_cfg, queryrelay_core::EndpointType::Fallback)),
                        Err(fallback_err) => return Err(fallback_err.to_string()),
                    }
                }
                Err(primary_err.to_string())
            }
        }
    }

    fn build_config(
        connection: &Connection,
        endpoint: &queryrelay_core::Endpoint,
        endpoint_type: queryrelay_core::EndpointType,
    ) -> ConnectionConfig {
        ConnectionConfig {
            connection_id: connection.id.clone(),
            endpoint: endpoint.clone(),
            endpoint_type,
            database: connection.database.clone(),
            credentials: connection.credentials.clone(),
        }
    }

    /// Runs `query` against `cfg`, checking cancellation before each query
    /// in multi-query mode.
    async fn run_queries(
        &self,
        job_id: &JobId,
        query: &QuerySpec,
        cfg: &ConnectionConfig,
    ) -> Result<QueryPhase, QueryError> {
        match query {
            QuerySpec::Single { query } => {
                let rows = self
                    .query_runner
                    .run(cfg, query, self.config.query_timeout)
                    .await?;
                Ok(QueryPhase::Rows(rows, None))
            }
            QuerySpec::Multi { queries } => {
                let mut combined = Vec::new();
                let mut named = BTreeMap::new();
                for q in queries {
                    if self.progress.is_cancellation_requested(job_id).await {
                        return Ok(QueryPhase::Cancelled);
                    }
                    let rows = self
                        .query_runner
                        .run(cfg, &q.query, self.config.query_timeout)
                        .await?;
                    combined.extend(rows.clone());
                    named.insert(q.name.clone(), rows);
                }
                Ok(QueryPhase::Rows(combined, Some(named)))
            }
        }
    }

    /// Plain query execution with no cancellation awareness, used by
    /// `test_job` which runs standalone, outside any job run.
    async fn run_query_spec_plain(
        &self,
        query: &QuerySpec,
        cfg: &ConnectionConfig,
    ) -> Result<(RowSet, Option<BTreeMap<String, RowSet>>), QueryError> {
        match query {
            QuerySpec::Single { query } => {
                let rows = self
                    .query_runner
                    .run(cfg, query, self.config.query_timeout)
                    .await?;
                Ok((rows, None))
            }
            QuerySpec::Multi { queries } => {
                let mut combined = Vec::new();
                let mut named = BTreeMap::new();
                for q in queries {
                    let rows = self
                        .query_runner
                        .run(cfg, &q.query, self.config.query_timeout)
                        .await?;
                    combined.extend(rows.clone());
                    named.insert(q.name.clone(), rows);
                }
                Ok((combined, Some(named)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queryrelay_adapters::AdapterRegistry;
    use queryrelay_core::{Credentials, Destination, Endpoint, Row, SecretString, TestOutcome, WriteMode};
    use queryrelay_pool::{FakeSessionFactory, PoolManagerConfig};
    use queryrelay_state::ProgressStream;
    use crate::query::fake::FakeQueryRunner;

    fn connection(id: &str, host: &str) -> Connection {
        Connection {
            id: ConnectionId::from(id),
            display_name: format!("conn-{id}"),
            primary: Endpoint {
                host: host.to_string(),
                port: None,
            },
            database: "db".to_string(),
            credentials: Credentials {
                username: "user".to_string(),
                password: SecretString::new("pw"),
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

    fn job(id: &str, connection_ids: Vec<ConnectionId>, destinations: Vec<Destination>) -> Job {
        Job {
            id: JobId::from(id),
            display_name: "nightly".to_string(),
            enabled: true,
            connection_ids,
            query: QuerySpec::Single {
                query: "select 1".to_string(),
            },
            recurrence: queryrelay_core::RecurrenceRule::Once,
            trigger: TriggerPolicy::Always,
            destinations,
            group: None,
            last_run: None,
        }
    }

    fn row(value: i64) -> Row {
        let mut r = Row::default();
        r.0.insert("v".to_string(), serde_json::json!(value));
        r
    }

    fn make_executor(
        dir: &std::path::Path,
    ) -> (
        Executor<FakeSessionFactory, FakeQueryRunner>,
        Arc<FakeQueryRunner>,
    ) {
        let pool = Arc::new(PoolManager::new(FakeSessionFactory::new(), PoolManagerConfig::default()));
        let runner = Arc::new(FakeQueryRunner::new());
        let progress = ProgressStream::new(dir.join("checkpoints"));
        let adapters = AdapterRegistry::default_set();
        let buffer = Arc::new(DataBuffer::new(
            Default::default(),
            adapters.clone(),
            dir.join("buffers"),
        ));
        let history = ExecutionHistory::open(dir.join("history.json")).unwrap();
        let executor = Executor::new(
            pool,
            runner.clone(),
            progress,
            buffer,
            adapters,
            history,
            ExecutorConfig::default(),
        );
        (executor, runner)
    }

    #[tokio::test]
    async fn disabled_job_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _runner) = make_executor(dir.path());
        let mut j = job("j1", vec![ConnectionId::from("c1")], vec![]);
        j.enabled = false;
        let connections = vec![connection("c1", "host-a")];

        assert!(executor.run_job(&j, &connections).await.is_none());
    }

    #[tokio::test]
    async fn all_connections_succeed_completes_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, runner) = make_executor(dir.path());
        runner.set_rows("select 1", vec![row(1), row(2)]).await;

        let destination = Destination::Csv {
            path: "out.csv".to_string(),
            write_mode: WriteMode::Append,
            encoding: "utf-8".to_string(),
        };
        let j = job("j1", vec![ConnectionId::from("c1")], vec![destination]);
        let connections = vec![connection("c1", "host-a")];

        let summary = executor.run_job(&j, &connections).await.unwrap();
        assert_eq!(summary.state, JobState::Completed);
        assert_eq!(summary.completed_connections, 1);
        assert_eq!(summary.failed_connections, 0);
        assert!(summary.last_run_ms.is_some());
    }

    #[tokio::test]
    async fn every_connection_failing_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, runner) = make_executor(dir.path());
        runner.fail("select 1").await;

        let j = job(
            "j1",
            vec![ConnectionId::from("c1"), ConnectionId::from("c2")],
            vec![],
        );
        let connections = vec![connection("c1", "host-a"), connection("c2", "host-b")];

        let summary = executor.run_job(&j, &connections).await.unwrap();
        assert_eq!(summary.state, JobState::Failed);
        assert_eq!(summary.completed_connections, 0);
        assert_eq!(summary.failed_connections, 2);
    }

    #[tokio::test]
    async fn partial_failure_still_completes_with_synthetic_entry() {
        let dir = tempfile::tempdir().unwrap();

        // One connection's host is unreachable (pool-connect failure); the
        // other succeeds, so the run as a whole should still complete.
        let failing_factory = FakeSessionFactory::new();
        failing_factory.fail("bad-host").await;

        let pool = Arc::new(PoolManager::new(failing_factory, PoolManagerConfig::default()));
        let runner = Arc::new(FakeQueryRunner::new());
        runner.set_rows("select 1", vec![row(1)]).await;
        let progress = ProgressStream::new(dir.path().join("checkpoints"));
        let adapters = AdapterRegistry::default_set();
        let buffer = Arc::new(DataBuffer::new(
            Default::default(),
            adapters.clone(),
            dir.path().join("buffers"),
        ));
        let history = ExecutionHistory::open(dir.path().join("history.json")).unwrap();
        let executor = Executor::new(pool, runner, progress, buffer, adapters, history, ExecutorConfig::default());

        let connections = vec![connection("c1", "bad-host"), connection("c2", "host-b")];
        let j = job(
            "j1",
            vec![ConnectionId::from("c1"), ConnectionId::from("c2")],
            vec![],
        );

        let summary = executor.run_job(&j, &connections).await.unwrap();
        assert_eq!(summary.state, JobState::Completed);
        assert_eq!(summary.completed_connections, 1);
        assert_eq!(summary.failed_connections, 1);
    }

    #[tokio::test]
    async fn test_connection_reports_endpoint_type() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _runner) = make_executor(dir.path());
        let outcome = executor.test_connection(&connection("c1", "host-a")).await;
        assert_eq!(outcome.test_status, TestOutcome::Connected);
        assert_eq!(outcome.active_endpoint_type, Some(queryrelay_core::EndpointType::Primary));
    }

    #[tokio::test]
    async fn test_job_reports_row_count_without_touching_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, runner) = make_executor(dir.path());
        runner.set_rows("select 1", vec![row(1), row(2), row(3)]).await;

        let j = job("j1", vec![ConnectionId::from("c1")], vec![]);
        let outcome = executor.test_job(&j, &connection("c1", "host-a")).await.unwrap();
        assert_eq!(outcome.row_count, 3);
        assert!(executor.progress.get_progress(&j.id).await.is_none());
    }

    #[tokio::test]
    async fn on_change_trigger_skips_identical_rows_without_a_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, runner) = make_executor(dir.path());
        runner.set_rows("select 1", vec![row(1)]).await;

        let mut j = job("j1", vec![ConnectionId::from("c1")], vec![]);
        j.trigger = TriggerPolicy::OnChange { last_hash: None };
        let connections = vec![connection("c1", "host-a")];

        executor.run_job(&j, &connections).await.unwrap();
        let second = executor.run_job(&j, &connections).await.unwrap();
        assert_eq!(second.state, JobState::Completed);
    }
}
