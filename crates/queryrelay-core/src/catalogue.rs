//! The persisted catalogue — connections, jobs, and settings.
//!
//! Stored as a single UTF-8 JSON document, written atomically. Loaders
//! tolerate two historical shapes for `financialYears`, `partners`, and
//! `jobGroups`: a list of plain strings, or a list of `{id, name|year}`
//! objects. Both normalise to a list of strings on read; writers always
//! emit the plain-string shape.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Connection, DestinationKind, Job};

/// A named-or-bare taxonomy entry, accepted on read, normalised to a bare
/// string by [`LegacyStringList`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TaxonomyEntry {
    Bare(String),
    Named { id: Option<String>, name: Option<String>, year: Option<String> },
}

impl TaxonomyEntry {
    fn normalise(self) -> String {
        match self {
            TaxonomyEntry::Bare(s) => s,
            TaxonomyEntry::Named { name, year, id, .. } => name
                .or(year)
                .or(id)
                .unwrap_or_default(),
        }
    }
}

/// A `Vec<String>` that deserialises from either a list of strings or a
/// list of legacy `{id, name|year}` objects, and always serialises back to
/// plain strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LegacyStringList(pub Vec<String>);

impl<'de> Deserialize<'de> for LegacyStringList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries: Vec<TaxonomyEntry> = Vec::deserialize(deserializer)?;
        Ok(LegacyStringList(
            entries.into_iter().map(TaxonomyEntry::normalise).collect(),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub pool_max: u32,
    pub idle_close_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_concurrent_connections: u32,
}

impl Default for PoolSettings {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    pub streaming_eligible: HashSet<DestinationKind>,
    pub flush_interval_ms: u64,
    pub size_threshold: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        let mut eligible = HashSet::new();
        eligible.insert(DestinationKind::GoogleSheets);
        Self {
            streaming_eligible: eligible,
            flush_interval_ms: 10_000,
            size_threshold: 150,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub financial_years: LegacyStringList,
    #[serde(default)]
    pub partners: LegacyStringList,
    #[serde(default)]
    pub job_groups: LegacyStringList,
    #[serde(default)]
    pub stores: Vec<String>,
    #[serde(default)]
    pub operators: Vec<String>,
    #[serde(default)]
    pub notification_channels: Vec<String>,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub buffer: BufferSettings,
    pub connection_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalogue {
    pub connections: Vec<Connection>,
    pub jobs: Vec<Job>,
    pub settings: Settings,
}

impl Default for Catalogue {
    fn default() -> Self {
        Self {
            connections: Vec::new(),
            jobs: Vec::new(),
            settings: Settings::default(),
        }
    }
}

impl Catalogue {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(crate::fsatomic::read_json_opt(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        crate::fsatomic::write_json_atomic(path, self)
    }
}
