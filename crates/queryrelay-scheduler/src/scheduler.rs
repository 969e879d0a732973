//! The scheduler (component E): translates recurrence rules into
//! firing times, enforces per-job non-overlap, and exposes the catalogue's
//! CRUD surface. A struct wrapping the persisted state plus the subsystems
//! it drives, with one method per public verb.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use queryrelay_core::{Connection, ConnectionId, Job, JobId, Settings};
use queryrelay_executor::{ConnectionTestOutcome, Executor, QueryRunner, RunSummary};
use queryrelay_pool::SessionFactory;
use queryrelay_queue::{EnqueueOptions, JobQueue, JobThunk};
use queryrelay_state::ProgressStream;

use crate::error::{SchedulerError, SchedulerResult};
use crate::firing::{FireCallback, FiringRegistry};
use crate::store::CatalogueStore;

pub struct Scheduler<F: SessionFactory, Q: QueryRunner> {
    store: CatalogueStore,
    queue: Arc<JobQueue>,
    executor: Arc<Executor<F, Q>>,
    progress: ProgressStream,
    firing: FiringRegistry,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl<F: SessionFactory, Q: QueryRunner> Clone for Scheduler<F, Q> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            executor: self.executor.clone(),
            progress: self.progress.clone(),
            firing: self.firing.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<F: SessionFactory, Q: QueryRunner> Scheduler<F, Q> {
    pub fn new(
        store: CatalogueStore,
        queue: Arc<JobQueue>,
        executor: Arc<Executor<F, Q>>,
        progress: ProgressStream,
    ) -> Self {
        Self {
            store,
            queue,
            executor,
            progress,
            firing: FiringRegistry::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    // ── Configuration lifecycle ──────────────────────────────

    pub async fn load_config(&self) -> SchedulerResult<()> {
        self.store.reload().await
    }

    pub async fn save_config(&self) -> SchedulerResult<()> {
        self.store.save().await
    }

    /// Installs a firing timer for every enabled, schedulable job.
    pub async fn start_all(&self) {
        for job in self.store.get_jobs().await {
            self.reschedule_one(&job).await;
        }
    }

    /// Tears down every firing timer without touching the catalogue.
    pub async fn stop_all(&self) {
        self.firing.cancel_all().await;
    }

    pub async fn reschedule_all(&self) {
        self.stop_all().await;
        self.start_all().await;
    }

    async fn reschedule_one(&self, job: &Job) {
        self.firing.schedule(job, self.fire_callback()).await;
    }

    fn fire_callback(&self) -> FireCallback {
        let scheduler = self.clone();
        Arc::new(move |job_id: JobId| {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                scheduler.on_fire(job_id).await;
            })
        })
    }

    /// Called by the firing registry when a job's recurrence elapses.
    /// Drops the fire (logging a warning) if the job was deleted, disabled,
    /// its previous run is still active — enforcing per-job non-overlap —
    /// or none of its connection ids still resolve against the live
    /// catalogue.
    async fn on_fire(&self, job_id: JobId) {
        let Some(job) = self.store.get_job(&job_id).await else {
            warn!(%job_id, "fired job no longer exists, dropping");
            return;
        };
        if !job.enabled {
            return;
        }
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains(&job_id) {
                warn!(%job_id, "previous run still active, dropping this fire");
                return;
            }
            in_flight.insert(job_id.clone());
        }
        if resolve_connections(&self.store, &job).await.is_empty() {
            warn!(%job_id, "none of the job's connections still exist, dropping this fire");
            self.in_flight.lock().await.remove(&job_id);
            return;
        }
        self.enqueue_run(job, None).await;
    }

    // ── Jobs ─────────────────────────────────────────────────

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        self.store.get_job(id).await
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        self.store.get_jobs().await
    }

    pub async fn add_job(&self, job: Job) -> SchedulerResult<Job> {
        let job = self.store.add_job(job).await?;
        self.reschedule_one(&job).await;
        Ok(job)
    }

    pub async fn update_job(&self, job: Job) -> SchedulerResult<Job> {
        let job = self.store.update_job(job).await?;
        self.reschedule_one(&job).await;
        Ok(job)
    }

    pub async fn delete_job(&self, id: &JobId) -> SchedulerResult<()> {
        self.store.delete_job(id).await?;
        self.firing.cancel(id).await;
        Ok(())
    }

    /// Enqueues an out-of-schedule run of `job_id` across all its
    /// connections. Refuses if the job is already running — non-overlap
    /// applies uniformly to scheduled and manual runs.
    pub async fn run_job_now(&self, job_id: &JobId) -> SchedulerResult<()> {
        let job = self.claim_for_manual_run(job_id).await?;
        self.enqueue_run(job, None).await;
        Ok(())
    }

    /// Enqueues a run of `job_id` restricted to `connection_ids` —
    /// typically a retry of a failed subset.
    pub async fn run_job_for_connections(
        &self,
        job_id: &JobId,
        connection_ids: Vec<ConnectionId>,
    ) -> SchedulerResult<()> {
        let job = self.claim_for_manual_run(job_id).await?;
        self.enqueue_run(job, Some(connection_ids)).await;
        Ok(())
    }

    async fn claim_for_manual_run(&self, job_id: &JobId) -> SchedulerResult<Job> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))?;
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.contains(job_id) {
            return Err(SchedulerError::Conflict(format!("job {job_id} is already running")));
        }
        in_flight.insert(job_id.clone());
        Ok(job)
    }

    /// Builds a thunk that resolves the job's current connections, drives
    /// the executor, persists the resulting summary into the catalogue, and
    /// always releases the non-overlap claim — then hands it to the queue:
    /// scheduler fires, enqueues into the queue, queue invokes the executor.
    async fn enqueue_run(&self, job: Job, subset: Option<Vec<ConnectionId>>) {
        let store = self.store.clone();
        let executor = self.executor.clone();
        let in_flight = self.in_flight.clone();

        let thunk: JobThunk = Arc::new(move || {
            let store = store.clone();
            let executor = executor.clone();
            let in_flight = in_flight.clone();
            let job = job.clone();
            let subset = subset.clone();
            Box::pin(async move {
                let connections = resolve_connections(&store, &job).await;
                let summary = match &subset {
                    Some(ids) => executor.run_job_for_connections(&job, &connections, ids).await,
                    None => executor.run_job(&job, &connections).await,
                };
                if let Some(summary) = summary {
                    persist_summary(&store, &job, &summary).await;
                }
                in_flight.lock().await.remove(&job.id);
                Ok(())
            })
        });

        self.queue
            .enqueue(job.id.clone(), thunk, EnqueueOptions::default())
            .await;
    }

    // ── Connection testing ───────────────────────────────────

    pub async fn test_connection(&self, connection_id: &ConnectionId) -> SchedulerResult<ConnectionTestOutcome> {
        let connection = self
            .store
            .get_connection(connection_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(format!("connection {connection_id}")))?;
        let outcome = self.executor.test_connection(&connection).await;
        self.store
            .record_test_outcome(
                connection_id,
                outcome.tested_at_ms as i64,
                outcome.test_status.clone(),
                outcome.active_endpoint_type,
            )
            .await;
        Ok(outcome)
    }

    /// Tests every connection in `connection_ids` concurrently, each under
    /// a deadline of `max(connectionTimeout, 30s)` .
    /// `max_concurrent` is accepted for interface stability but currently
    /// ignored (a deliberate, recorded design choice).
    pub async fn bulk_test_connections(
        &self,
        connection_ids: &[ConnectionId],
        _max_concurrent: Option<usize>,
    ) -> Vec<(ConnectionId, SchedulerResult<ConnectionTestOutcome>)> {
        let deadline = self.connection_test_deadline().await;
        let mut handles = Vec::with_capacity(connection_ids.len());
        for id in connection_ids {
            let this = self.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                let outcome = tokio::time::timeout(deadline, this.test_connection(&id)).await;
                let outcome = match outcome {
                    Ok(inner) => inner,
                    Err(_) => Err(SchedulerError::Timeout(format!("connection {id} test"))),
                };
                (id, outcome)
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(pair) = handle.await {
                results.push(pair);
            }
        }
        results
    }

    async fn connection_test_deadline(&self) -> Duration {
        let settings = self.store.settings().await;
        let configured = settings.connection_timeout_secs.unwrap_or(30);
        Duration::from_secs(configured.max(30))
    }

    // ── Connections ──────────────────────────────────────────

    pub async fn get_connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.store.get_connection(id).await
    }

    pub async fn get_connections(&self) -> Vec<Connection> {
        self.store.get_connections().await
    }

    pub async fn add_connection(&self, connection: Connection) -> SchedulerResult<Connection> {
        self.store.add_connection(connection).await
    }

    pub async fn update_connection(&self, connection: Connection) -> SchedulerResult<Connection> {
        self.store.update_connection(connection).await
    }

    pub async fn delete_connection(&self, id: &ConnectionId) -> SchedulerResult<()> {
        self.store.delete_connection(id).await
    }

    pub async fn duplicate_connection(&self, id: &ConnectionId) -> SchedulerResult<Connection> {
        self.store.duplicate_connection(id).await
    }

    // ── Settings / taxonomy ──────────────────────────────────

    pub async fn settings(&self) -> Settings {
        self.store.settings().await
    }

    pub async fn update_settings<Fm>(&self, f: Fm)
    where
        Fm: FnOnce(&mut Settings),
    {
        self.store.update_settings(f).await
    }

    pub async fn add_financial_year(&self, year: String) -> SchedulerResult<()> {
        self.store.add_unique_string(year, |s| &mut s.financial_years.0).await
    }

    pub async fn remove_financial_year(&self, year: &str) -> SchedulerResult<()> {
        self.store.remove_string(year, |s| &mut s.financial_years.0).await
    }

    pub async fn add_partner(&self, partner: String) -> SchedulerResult<()> {
        self.store.add_unique_string(partner, |s| &mut s.partners.0).await
    }

    pub async fn remove_partner(&self, partner: &str) -> SchedulerResult<()> {
        self.store.remove_string(partner, |s| &mut s.partners.0).await
    }

    pub async fn add_job_group(&self, group: String) -> SchedulerResult<()> {
        self.store.add_unique_string(group, |s| &mut s.job_groups.0).await
    }

    pub async fn remove_job_group(&self, group: &str) -> SchedulerResult<()> {
        self.store.remove_string(group, |s| &mut s.job_groups.0).await
    }

    pub async fn add_store(&self, store_name: String) -> SchedulerResult<()> {
        self.store.add_unique_string(store_name, |s| &mut s.stores).await
    }

    pub async fn remove_store(&self, store_name: &str) -> SchedulerResult<()> {
        self.store.remove_string(store_name, |s| &mut s.stores).await
    }

    pub async fn add_operator(&self, operator: String) -> SchedulerResult<()> {
        self.store.add_unique_string(operator, |s| &mut s.operators).await
    }

    pub async fn remove_operator(&self, operator: &str) -> SchedulerResult<()> {
        self.store.remove_string(operator, |s| &mut s.operators).await
    }

    pub async fn add_notification_channel(&self, channel: String) -> SchedulerResult<()> {
        self.store
            .add_unique_string(channel, |s| &mut s.notification_channels)
            .await
    }

    pub async fn remove_notification_channel(&self, channel: &str) -> SchedulerResult<()> {
        self.store
            .remove_string(channel, |s| &mut s.notification_channels)
            .await
    }

    // ── Accessors for the RPC surface ────────────────────────

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn progress(&self) -> &ProgressStream {
        &self.progress
    }

    pub fn executor(&self) -> &Arc<Executor<F, Q>> {
        &self.executor
    }
}

/// Resolves `job`'s connection ids against the live catalogue, silently
/// dropping ids whose connections have since been deleted.
async fn resolve_connections(store: &CatalogueStore, job: &Job) -> Vec<Connection> {
    let all = store.get_connections().await;
    let by_id: HashMap<ConnectionId, Connection> = all.into_iter().map(|c| (c.id.clone(), c)).collect();
    job.deduped_connection_ids()
        .into_iter()
        .filter_map(|id| by_id.get(&id).cloned())
        .collect()
}

async fn persist_summary(
    store: &CatalogueStore,
    job: &Job,
    summary: &RunSummary,
) {
    if let Some(last_run_ms) = summary.last_run_ms {
        store.set_last_run(&job.id, last_run_ms as i64).await;
    }
    if let Some(hash) = &summary.updated_trigger_hash {
        store.set_trigger_hash(&job.id, hash.clone()).await;
    }
    for (conn_id, endpoint_type) in &summary.endpoint_types {
        store.set_active_endpoint_type(conn_id, *endpoint_type).await;
    }
    if let Err(e) = store.save().await {
        warn!(job_id = %job.id, error = %e, "failed to persist catalogue after run");
    }
}
