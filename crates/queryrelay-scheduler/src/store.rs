//! The in-memory catalogue plus its on-disk persistence .
//! A single `RwLock<Catalogue>` guarded by the scheduler — CRUD here is
//! plain, synchronous mutation under the lock; persisting to disk is a
//! separate, explicit step (`save`/`reload`), matching `Catalogue::save`/
//! `Catalogue::load`'s own atomic-write-then-rename primitive.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use queryrelay_core::{Catalogue, Connection, ConnectionId, EndpointType, Job, JobId, Settings, TestOutcome, TriggerPolicy};

use crate::error::{SchedulerError, SchedulerResult};

#[derive(Clone)]
pub struct CatalogueStore {
    path: PathBuf,
    catalogue: Arc<RwLock<Catalogue>>,
}

impl CatalogueStore {
    pub fn open(path: PathBuf) -> SchedulerResult<Self> {
        let catalogue = Catalogue::load(&path)?;
        Ok(Self {
            path,
            catalogue: Arc::new(RwLock::new(catalogue)),
        })
    }

    pub async fn save(&self) -> SchedulerResult<()> {
        self.catalogue.read().await.save(&self.path)?;
        Ok(())
    }

    pub async fn reload(&self) -> SchedulerResult<()> {
        let loaded = Catalogue::load(&self.path)?;
        *self.catalogue.write().await = loaded;
        Ok(())
    }

    // ── Jobs ─────────────────────────────────────────────────

    pub async fn get_job(&self, id: &JobId) -> Option<Job> {
        self.catalogue.read().await.jobs.iter().find(|j| &j.id == id).cloned()
    }

    pub async fn get_jobs(&self) -> Vec<Job> {
        self.catalogue.read().await.jobs.clone()
    }

    pub async fn add_job(&self, mut job: Job) -> SchedulerResult<Job> {
        job.connection_ids = job.deduped_connection_ids();
        let mut cat = self.catalogue.write().await;
        if cat.jobs.iter().any(|j| j.id == job.id) {
            return Err(SchedulerError::Conflict(format!("job {} already exists", job.id)));
        }
        cat.jobs.push(job.clone());
        Ok(job)
    }

    pub async fn update_job(&self, mut job: Job) -> SchedulerResult<Job> {
        job.connection_ids = job.deduped_connection_ids();
        let mut cat = self.catalogue.write().await;
        let slot = cat
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| SchedulerError::NotFound(format!("job {}", job.id)))?;
        *slot = job.clone();
        Ok(job)
    }

    pub async fn delete_job(&self, id: &JobId) -> SchedulerResult<()> {
        let mut cat = self.catalogue.write().await;
        let before = cat.jobs.len();
        cat.jobs.retain(|j| &j.id != id);
        if cat.jobs.len() == before {
            return Err(SchedulerError::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    pub async fn set_last_run(&self, id: &JobId, when_ms: i64) {
        let mut cat = self.catalogue.write().await;
        if let Some(job) = cat.jobs.iter_mut().find(|j| &j.id == id) {
            job.last_run = Some(when_ms);
        }
    }

    pub async fn set_trigger_hash(&self, id: &JobId, hash: String) {
        let mut cat = self.catalogue.write().await;
        if let Some(job) = cat.jobs.iter_mut().find(|j| &j.id == id) {
            if let TriggerPolicy::OnChange { last_hash } = &mut job.trigger {
                *last_hash = Some(hash);
            }
        }
    }

    // ── Connections ──────────────────────────────────────────

    pub async fn get_connection(&self, id: &ConnectionId) -> Option<Connection> {
        self.catalogue
            .read()
            .await
            .connections
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    pub async fn get_connections(&self) -> Vec<Connection> {
        self.catalogue.read().await.connections.clone()
    }

    /// Merges into an existing connection when the canonical key (host,
    /// port, database, user) matches; otherwise appends.
    pub async fn add_connection(&self, connection: Connection) -> SchedulerResult<Connection> {
        let mut cat = self.catalogue.write().await;
        let key = connection.canonical_key(&connection.primary, queryrelay_pool::DEFAULT_PORT);
        if let Some(existing) = cat
            .connections
            .iter_mut()
            .find(|c| c.canonical_key(&c.primary, queryrelay_pool::DEFAULT_PORT) == key)
        {
            *existing = connection.clone();
            return Ok(existing.clone());
        }
        cat.connections.push(connection.clone());
        Ok(connection)
    }

    /// Deliberately bypasses the canonical-key dedup to yield a distinct
    /// record.
    pub async fn duplicate_connection(&self, id: &ConnectionId) -> SchedulerResult<Connection> {
        let mut cat = self.catalogue.write().await;
        let source = cat
            .connections
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| SchedulerError::NotFound(format!("connection {id}")))?
            .clone();
        let mut copy = source;
        copy.id = ConnectionId::generate();
        copy.display_name = format!("{} (copy)", copy.display_name);
        cat.connections.push(copy.clone());
        Ok(copy)
    }

    pub async fn update_connection(&self, connection: Connection) -> SchedulerResult<Connection> {
        let mut cat = self.catalogue.write().await;
        let slot = cat
            .connections
            .iter_mut()
            .find(|c| c.id == connection.id)
            .ok_or_else(|| SchedulerError::NotFound(format!("connection {}", connection.id)))?;
        *slot = connection.clone();
        Ok(connection)
    }

    /// Refuses when one or more jobs still reference the connection.
    pub async fn delete_connection(&self, id: &ConnectionId) -> SchedulerResult<()> {
        let mut cat = self.catalogue.write().await;
        if cat.jobs.iter().any(|j| j.connection_ids.contains(id)) {
            return Err(SchedulerError::Conflict(format!(
                "connection {id} is still referenced by a job"
            )));
        }
        let before = cat.connections.len();
        cat.connections.retain(|c| &c.id != id);
        if cat.connections.len() == before {
            return Err(SchedulerError::NotFound(format!("connection {id}")));
        }
        Ok(())
    }

    pub async fn record_test_outcome(
        &self,
        id: &ConnectionId,
        tested_at_ms: i64,
        status: TestOutcome,
        endpoint_type: Option<EndpointType>,
    ) {
        let mut cat = self.catalogue.write().await;
        if let Some(conn) = cat.connections.iter_mut().find(|c| &c.id == id) {
            conn.last_tested = Some(tested_at_ms);
            conn.test_status = status;
            if endpoint_type.is_some() {
                conn.active_endpoint_type = endpoint_type;
            }
        }
    }

    pub async fn set_active_endpoint_type(&self, id: &ConnectionId, endpoint_type: EndpointType) {
        let mut cat = self.catalogue.write().await;
        if let Some(conn) = cat.connections.iter_mut().find(|c| &c.id == id) {
            conn.active_endpoint_type = Some(endpoint_type);
        }
    }

    // ── Settings / taxonomy ──────────────────────────────────

    pub async fn settings(&self) -> Settings {
        self.catalogue.read().await.settings.clone()
    }

    pub async fn update_settings<Fm>(&self, f: Fm)
    where
        Fm: FnOnce(&mut Settings),
    {
        let mut cat = self.catalogue.write().await;
        f(&mut cat.settings);
    }

    /// Adds a value to a taxonomy list selected by `select`, refusing a
    /// duplicate against the existing entries.
    pub async fn add_unique_string(
        &self,
        value: String,
        select: impl FnOnce(&mut Settings) -> &mut Vec<String>,
    ) -> SchedulerResult<()> {
        let mut cat = self.catalogue.write().await;
        let list = select(&mut cat.settings);
        if list.iter().any(|v| v == &value) {
            return Err(SchedulerError::Conflict(format!("'{value}' already exists")));
        }
        list.push(value);
        Ok(())
    }

    pub async fn remove_string(
        &self,
        value: &str,
        select: impl FnOnce(&mut Settings) -> &mut Vec<String>,
    ) -> SchedulerResult<()> {
        let mut cat = self.catalogue.write().await;
        let list = select(&mut cat.settings);
        let before = list.len();
        list.retain(|v| v != value);
        if list.len() == before {
            return Err(SchedulerError::NotFound(format!("'{value}'")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queryrelay_core::{Credentials, Endpoint, QuerySpec, RecurrenceRule, SecretString};

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

    fn job(id: &str) -> Job {
        Job {
            id: JobId::from(id),
            display_name: "job".to_string(),
            enabled: true,
            connection_ids: vec![],
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

    fn store(dir: &std::path::Path) -> CatalogueStore {
        CatalogueStore::open(dir.join("catalogue.json")).unwrap()
    }

    #[tokio::test]
    async fn add_connection_dedups_by_canonical_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let c1 = connection("c1", "Host-A");
        store.add_connection(c1.clone()).await.unwrap();

        let mut c2 = connection("c2", "host-a");
        c2.display_name = "renamed".to_string();
        let merged = store.add_connection(c2).await.unwrap();

        assert_eq!(merged.id, c1.id);
        assert_eq!(store.get_connections().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_connection_bypasses_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let c1 = store.add_connection(connection("c1", "host-a")).await.unwrap();

        let dup = store.duplicate_connection(&c1.id).await.unwrap();
        assert_ne!(dup.id, c1.id);
        assert_eq!(store.get_connections().await.len(), 2);
    }

    #[tokio::test]
    async fn delete_connection_refused_while_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let conn = store.add_connection(connection("c1", "host-a")).await.unwrap();
        let mut j = job("j1");
        j.connection_ids = vec![conn.id.clone()];
        store.add_job(j).await.unwrap();

        let result = store.delete_connection(&conn.id).await;
        assert!(matches!(result, Err(SchedulerError::Conflict(_))));
    }

    #[tokio::test]
    async fn add_job_conflicts_on_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.add_job(job("j1")).await.unwrap();
        let result = store.add_job(job("j1")).await;
        assert!(matches!(result, Err(SchedulerError::Conflict(_))));
    }

    #[tokio::test]
    async fn taxonomy_rejects_duplicate_then_allows_after_removal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store
            .add_unique_string("FY24".to_string(), |s| &mut s.stores)
            .await
            .unwrap();
        let result = store.add_unique_string("FY24".to_string(), |s| &mut s.stores).await;
        assert!(matches!(result, Err(SchedulerError::Conflict(_))));

        store.remove_string("FY24", |s| &mut s.stores).await.unwrap();
        store
            .add_unique_string("FY24".to_string(), |s| &mut s.stores)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn save_and_reload_round_trips_catalogue_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalogue.json");
        let store = CatalogueStore::open(path.clone()).unwrap();
        store.add_job(job("j1")).await.unwrap();
        store.save().await.unwrap();

        let reopened = CatalogueStore::open(path).unwrap();
        assert_eq!(reopened.get_jobs().await.len(), 1);
    }
}
