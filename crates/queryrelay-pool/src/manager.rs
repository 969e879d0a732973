//! The pool manager — keyed session pools with refcount and
//! lazy idle-close, generic over a [`SessionFactory`] so this crate never
//! has to speak the SQL Server wire protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{PoolError, PoolResult};
use crate::key::{ConnectionConfig, PoolKey};
use crate::session::SessionFactory;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolManagerConfig {
    pub pool_max: u32,
    pub idle_close_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_concurrent_connections: u32,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            pool_max: 10,
            idle_close_ms: 60_000,
            connect_timeout_ms: 15_000,
            request_timeout_ms: 300_000,
            max_concurrent_connections: 50,
        }
    }
}

/// A caller's receipt for an acquired pool — opaque, just enough to call
/// `release` with the same connection config later.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    pub key: PoolKey,
    generation: u64,
}

struct PoolEntry<S> {
    session: Option<S>,
    refcount: u32,
    generation: u64,
    /// Snapshot of the manager config at construction time — existing
    /// pools keep their construction-time limits across `updateConfig`
    /// calls.
    config: PoolManagerConfig,
    created_at: Instant,
    last_used: Instant,
    idle_timer: Option<tokio::task::JoinHandle<()>>,
}

impl<S> PoolEntry<S> {
    fn new(config: PoolManagerConfig) -> Self {
        let now = Instant::now();
        Self {
            session: None,
            refcount: 0,
            generation: 0,
            config,
            created_at: now,
            last_used: now,
            idle_timer: None,
        }
    }

    /// Cancel any pending idle-close and invalidate timers already in
    /// flight by bumping the generation counter.
    fn cancel_idle_timer(&mut self) {
        self.generation += 1;
        if let Some(handle) = self.idle_timer.take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolMetrics {
    pub pool_count: usize,
    pub active_pool_count: usize,
    pub aggregate_live_sessions: usize,
    pub per_host_pool_count: HashMap<String, usize>,
}

pub struct PoolManager<F: SessionFactory> {
    factory: Arc<F>,
    entries: Arc<Mutex<HashMap<PoolKey, PoolEntry<F::Session>>>>,
    config: Arc<RwLock<PoolManagerConfig>>,
    semaphore: Arc<Semaphore>,
}

impl<F: SessionFactory> PoolManager<F> {
    pub fn new(factory: F, config: PoolManagerConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_connections as usize));
        Self {
            factory: Arc::new(factory),
            entries: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(RwLock::new(config)),
            semaphore,
        }
    }

    /// Acquire a ready pool for `cfg`'s canonical key.
    pub async fn acquire(&self, cfg: &ConnectionConfig) -> PoolResult<PoolHandle> {
        let key = cfg.pool_key();
        let config_snapshot = self.config.read().await.clone();

        // Pull any existing session out from under the lock so its
        // liveness can be checked without holding the map lock across an
        // await point; it's put back below if it's still alive.
        let (generation, existing_session) = {
            let mut entries = self.entries.lock().await;
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| PoolEntry::new(config_snapshot));
            entry.cancel_idle_timer();
            entry.refcount += 1;
            entry.last_used = Instant::now();
            (entry.generation, entry.session.take())
        };

        let needs_connect = match existing_session {
            Some(session) => {
                if self.factory.is_alive(&session).await {
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.get_mut(&key) {
                        if entry.generation == generation {
                            entry.session = Some(session);
                        }
                    }
                    false
                } else {
                    warn!(host = %key.host, "pooled session no longer alive, reconnecting");
                    true
                }
            }
            None => true,
        };

        if !needs_connect {
            debug!(host = %key.host, "reusing existing pool");
            return Ok(PoolHandle { key, generation });
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::ShutDown)?;

        match self.factory.connect(cfg).await {
            Ok(session) => {
                drop(permit);
                let mut entries = self.entries.lock().await;
                if let Some(entry) = entries.get_mut(&key) {
                    if entry.generation == generation {
                        entry.session = Some(session);
                    }
                }
                info!(host = %key.host, database = %key.database, "pool connected");
                Ok(PoolHandle { key, generation })
            }
            Err(e) => {
                drop(permit);
                let mut entries = self.entries.lock().await;
                let mut drop_entry = false;
                if let Some(entry) = entries.get_mut(&key) {
                    entry.refcount = entry.refcount.saturating_sub(1);
                    if entry.refcount == 0 && entry.session.is_none() {
                        drop_entry = true;
                    }
                }
                if drop_entry {
                    entries.remove(&key);
                }
                warn!(host = %key.host, error = %e, "pool connect failed");
                Err(e)
            }
        }
    }

    /// Release a previously acquired pool. When the refcount reaches zero,
    /// arms a single-shot idle-close timer.
    pub async fn release(&self, handle: &PoolHandle) {
        let idle_ms = self.config.read().await.idle_close_ms;
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&handle.key) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount != 0 {
            return;
        }

        entry.generation += 1;
        let generation = entry.generation;
        let entries_arc = self.entries.clone();
        let key = handle.key.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(idle_ms)).await;
            let mut entries = entries_arc.lock().await;
            if let Some(entry) = entries.get(&key) {
                if entry.generation == generation && entry.refcount == 0 {
                    entries.remove(&key);
                    debug!(host = %key.host, "pool idle-closed");
                }
            }
        });
        entry.idle_timer = Some(task);
    }

    /// New limits take effect only for pools constructed after this call.
    pub async fn update_config(&self, config: PoolManagerConfig) {
        *self.config.write().await = config;
    }

    pub async fn metrics(&self) -> PoolMetrics {
        let entries = self.entries.lock().await;
        let mut per_host = HashMap::new();
        let mut active = 0;
        let mut live_sessions = 0;
        for (key, entry) in entries.iter() {
            *per_host.entry(key.host.clone()).or_insert(0) += 1;
            if entry.refcount > 0 {
                active += 1;
            }
            if entry.session.is_some() {
                live_sessions += 1;
            }
        }
        PoolMetrics {
            pool_count: entries.len(),
            active_pool_count: active,
            aggregate_live_sessions: live_sessions,
            per_host_pool_count: per_host,
        }
    }

    pub async fn destroy_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, mut entry) in entries.drain() {
            if let Some(handle) = entry.idle_timer.take() {
                handle.abort();
            }
        }
    }

    #[cfg(test)]
    async fn refcount(&self, key: &PoolKey) -> Option<u32> {
        self.entries.lock().await.get(key).map(|e| e.refcount)
    }
}
