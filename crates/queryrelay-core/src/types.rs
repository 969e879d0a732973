//! Domain types shared by every queryrelay crate: connections, jobs, and
//! destinations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, JobId};
use crate::secret::SecretString;

/// Time of day, local, `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.split_once(':')?;
        let hour: u8 = h.parse().ok()?;
        let minute: u8 = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { hour, minute })
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// A job's recurrence rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecurrenceRule {
    /// Never scheduled; runnable only on demand.
    Once,
    /// Fires once per day at `time_of_day`.
    Daily { time_of_day: TimeOfDay },
    /// Fires every `n` days at `time_of_day`.
    EveryNDays { n: u32, time_of_day: TimeOfDay },
    /// A 5-field cron expression.
    Custom { cron: String },
}

impl RecurrenceRule {
    /// Render to a 5-field cron expression.
    pub fn to_cron(&self) -> Option<String> {
        match self {
            RecurrenceRule::Once => None,
            RecurrenceRule::Daily { time_of_day } => Some(format!(
                "{} {} * * *",
                time_of_day.minute, time_of_day.hour
            )),
            RecurrenceRule::EveryNDays { n, time_of_day } => Some(format!(
                "{} {} */{} * *",
                time_of_day.minute, time_of_day.hour, n
            )),
            RecurrenceRule::Custom { cron } => Some(cron.clone()),
        }
    }

    /// Interpret the legacy, recurrence-type-less shape.
    ///
    /// `schedule == "manual"` → not scheduled; `timeOfDay` set → daily at
    /// that time; `schedule` matches `^(\d+)[ms]$` → every N minutes
    /// (seconds coerced to 1 minute with a warning); else `schedule` is a
    /// cron string.
    pub fn from_legacy(schedule: Option<&str>, time_of_day: Option<&str>) -> Option<Self> {
        if let Some(tod) = time_of_day.and_then(TimeOfDay::parse) {
            return Some(RecurrenceRule::Daily { time_of_day: tod });
        }
        let schedule = schedule?;
        if schedule == "manual" {
            return Some(RecurrenceRule::Once);
        }
        if let Some(captures) = parse_legacy_interval(schedule) {
            let (amount, unit) = captures;
            let minutes = if unit == 's' {
                tracing::warn!(schedule, "legacy seconds interval coerced to 1 minute");
                1
            } else {
                amount
            };
            return Some(RecurrenceRule::Custom {
                cron: format!("*/{minutes} * * * *"),
            });
        }
        Some(RecurrenceRule::Custom {
            cron: schedule.to_string(),
        })
    }
}

fn parse_legacy_interval(s: &str) -> Option<(u32, char)> {
    let unit = s.chars().last()?;
    if unit != 'm' && unit != 's' {
        return None;
    }
    let digits = &s[..s.len() - 1];
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let amount: u32 = digits.parse().ok()?;
    Some((amount, unit))
}

/// `always` dispatches every run; `onChange` dispatches only when the
/// rowset's content hash differs from the last dispatched hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerPolicy {
    Always,
    OnChange {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_hash: Option<String>,
    },
}

/// Single-query or ordered named-query mode (mutually exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum QuerySpec {
    Single { query: String },
    Multi { queries: Vec<NamedQuery> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedQuery {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupTag {
    #[serde(rename = "self")]
    SelfOwned,
    Partner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestOutcome {
    Connected,
    Failed,
    Untested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointType {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// One endpoint (host/port/database) a connection may resolve to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub display_name: String,
    pub primary: Endpoint,
    pub database: String,
    pub credentials: Credentials,
    pub fallback: Option<Endpoint>,
    pub group_tag: Option<GroupTag>,
    pub partner_name: Option<String>,
    pub financial_year: Option<String>,
    pub store_short_name: Option<String>,
    pub last_tested: Option<i64>,
    pub test_status: TestOutcome,
    pub active_endpoint_type: Option<EndpointType>,
}

impl Connection {
    /// Normalised key used by the pool manager and by `Scheduler::add_connection`
    /// dedup: lower-cased host, explicit-or-default port, lower-cased database,
    /// username.
    pub fn canonical_key(&self, endpoint: &Endpoint, default_port: u16) -> String {
        format!(
            "{}:{}:{}:{}",
            endpoint.host.to_lowercase(),
            endpoint.port.unwrap_or(default_port),
            self.database.to_lowercase(),
            self.credentials.username
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub display_name: String,
    pub enabled: bool,
    pub connection_ids: Vec<ConnectionId>,
    pub query: QuerySpec,
    pub recurrence: RecurrenceRule,
    pub trigger: TriggerPolicy,
    pub destinations: Vec<Destination>,
    pub group: Option<String>,
    pub last_run: Option<i64>,
}

/// Mirrors `Job`'s fields but leaves `recurrence` as a raw value and pulls
/// in the legacy flat `schedule`/`time_of_day` fields §4.5 describes, so a
/// document with no `recurrenceType` still deserializes via
/// [`RecurrenceRule::from_legacy`] instead of failing on the internally
/// tagged `RecurrenceRule` shape.
#[derive(Deserialize)]
struct JobShadow {
    id: JobId,
    display_name: String,
    enabled: bool,
    connection_ids: Vec<ConnectionId>,
    query: QuerySpec,
    #[serde(default)]
    recurrence: Option<serde_json::Value>,
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    time_of_day: Option<String>,
    trigger: TriggerPolicy,
    destinations: Vec<Destination>,
    group: Option<String>,
    last_run: Option<i64>,
}

impl<'de> Deserialize<'de> for Job {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let shadow = JobShadow::deserialize(deserializer)?;
        let recurrence = match shadow.recurrence {
            Some(value) if value.get("type").is_some() => {
                serde_json::from_value(value).map_err(serde::de::Error::custom)?
            }
            _ => RecurrenceRule::from_legacy(shadow.schedule.as_deref(), shadow.time_of_day.as_deref())
                .ok_or_else(|| {
                    serde::de::Error::custom(
                        "job has no recurrence and no legacy schedule/timeOfDay to derive one from",
                    )
                })?,
        };
        Ok(Job {
            id: shadow.id,
            display_name: shadow.display_name,
            enabled: shadow.enabled,
            connection_ids: shadow.connection_ids,
            query: shadow.query,
            recurrence,
            trigger: shadow.trigger,
            destinations: shadow.destinations,
            group: shadow.group,
            last_run: shadow.last_run,
        })
    }
}

impl Job {
    /// Deduplicated connection ids, preserving first-seen order.
    pub fn deduped_connection_ids(&self) -> Vec<ConnectionId> {
        let mut seen = std::collections::HashSet::new();
        self.connection_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteMode {
    Append,
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DestinationKind {
    Webhook,
    CustomApi,
    GoogleSheets,
    Excel,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Destination {
    Webhook {
        url: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        batch: bool,
    },
    CustomApi {
        url: String,
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        batch: bool,
    },
    GoogleSheets {
        spreadsheet_id: String,
        sheet: String,
        write_mode: WriteMode,
    },
    Excel {
        path: String,
        write_mode: WriteMode,
        encoding: String,
    },
    Csv {
        path: String,
        write_mode: WriteMode,
        encoding: String,
    },
}

impl Destination {
    pub fn kind(&self) -> DestinationKind {
        match self {
            Destination::Webhook { .. } => DestinationKind::Webhook,
            Destination::CustomApi { .. } => DestinationKind::CustomApi,
            Destination::GoogleSheets { .. } => DestinationKind::GoogleSheets,
            Destination::Excel { .. } => DestinationKind::Excel,
            Destination::Csv { .. } => DestinationKind::Csv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_valid_values() {
        assert_eq!(
            TimeOfDay::parse("09:30"),
            Some(TimeOfDay { hour: 9, minute: 30 })
        );
        assert_eq!(TimeOfDay::parse("24:00"), None);
        assert_eq!(TimeOfDay::parse("nonsense"), None);
    }

    #[test]
    fn recurrence_to_cron_matches_expected_expressions() {
        let daily = RecurrenceRule::Daily {
            time_of_day: TimeOfDay { hour: 6, minute: 5 },
        };
        assert_eq!(daily.to_cron().unwrap(), "5 6 * * *");

        let every_n = RecurrenceRule::EveryNDays {
            n: 3,
            time_of_day: TimeOfDay { hour: 6, minute: 5 },
        };
        assert_eq!(every_n.to_cron().unwrap(), "5 6 */3 * *");

        let custom = RecurrenceRule::Custom {
            cron: "*/5 * * * *".to_string(),
        };
        assert_eq!(custom.to_cron().unwrap(), "*/5 * * * *");

        assert_eq!(RecurrenceRule::Once.to_cron(), None);
    }

    #[test]
    fn legacy_manual_is_not_scheduled() {
        assert_eq!(
            RecurrenceRule::from_legacy(Some("manual"), None),
            Some(RecurrenceRule::Once)
        );
    }

    #[test]
    fn legacy_time_of_day_wins_over_schedule() {
        let rule = RecurrenceRule::from_legacy(Some("manual"), Some("08:00")).unwrap();
        assert_eq!(
            rule,
            RecurrenceRule::Daily {
                time_of_day: TimeOfDay { hour: 8, minute: 0 }
            }
        );
    }

    #[test]
    fn legacy_minute_interval_becomes_cron() {
        let rule = RecurrenceRule::from_legacy(Some("15m"), None).unwrap();
        assert_eq!(
            rule,
            RecurrenceRule::Custom {
                cron: "*/15 * * * *".to_string()
            }
        );
    }

    #[test]
    fn legacy_seconds_interval_is_coerced_to_one_minute() {
        let rule = RecurrenceRule::from_legacy(Some("30s"), None).unwrap();
        assert_eq!(
            rule,
            RecurrenceRule::Custom {
                cron: "*/1 * * * *".to_string()
            }
        );
    }

    #[test]
    fn legacy_arbitrary_string_is_treated_as_cron() {
        let rule = RecurrenceRule::from_legacy(Some("0 */2 * * *"), None).unwrap();
        assert_eq!(
            rule,
            RecurrenceRule::Custom {
                cron: "0 */2 * * *".to_string()
            }
        );
    }

    #[test]
    fn job_dedups_connection_ids_preserving_order() {
        let job = Job {
            id: JobId::from("j1"),
            display_name: "j".to_string(),
            enabled: true,
            connection_ids: vec![
                ConnectionId::from("a"),
                ConnectionId::from("b"),
                ConnectionId::from("a"),
            ],
            query: QuerySpec::Single {
                query: "select 1".to_string(),
            },
            recurrence: RecurrenceRule::Once,
            trigger: TriggerPolicy::Always,
            destinations: vec![],
            group: None,
            last_run: None,
        };
        assert_eq!(
            job.deduped_connection_ids(),
            vec![ConnectionId::from("a"), ConnectionId::from("b")]
        );
    }

    #[test]
    fn job_with_recurrence_type_deserializes_normally() {
        let json = r#"{
            "id": "j1", "display_name": "j", "enabled": true,
            "connection_ids": [], "query": {"mode": "single", "query": "select 1"},
            "recurrence": {"type": "once"},
            "trigger": {"type": "always"}, "destinations": [], "group": null, "last_run": null
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.recurrence, RecurrenceRule::Once);
    }

    #[test]
    fn job_without_recurrence_type_falls_back_to_legacy_schedule() {
        let json = r#"{
            "id": "j1", "display_name": "j", "enabled": true,
            "connection_ids": [], "query": {"mode": "single", "query": "select 1"},
            "schedule": "15m",
            "trigger": {"type": "always"}, "destinations": [], "group": null, "last_run": null
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(
            job.recurrence,
            RecurrenceRule::Custom {
                cron: "*/15 * * * *".to_string()
            }
        );
    }

    #[test]
    fn job_without_recurrence_type_falls_back_to_legacy_time_of_day() {
        let json = r#"{
            "id": "j1", "display_name": "j", "enabled": true,
            "connection_ids": [], "query": {"mode": "single", "query": "select 1"},
            "time_of_day": "09:30",
            "trigger": {"type": "always"}, "destinations": [], "group": null, "last_run": null
        }"#;
        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(
            job.recurrence,
            RecurrenceRule::Daily {
                time_of_day: TimeOfDay { hour: 9, minute: 30 }
            }
        );
    }

    #[test]
    fn job_with_neither_recurrence_nor_legacy_fields_fails_to_deserialize() {
        let json = r#"{
            "id": "j1", "display_name": "j", "enabled": true,
            "connection_ids": [], "query": {"mode": "single", "query": "select 1"},
            "trigger": {"type": "always"}, "destinations": [], "group": null, "last_run": null
        }"#;
        let result: Result<Job, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn canonical_key_lowercases_host_and_database() {
        let conn = Connection {
            id: ConnectionId::from("c1"),
            display_name: "Store 1".to_string(),
            primary: Endpoint {
                host: "DB-Host".to_string(),
                port: None,
            },
            database: "SalesDB".to_string(),
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
        };
        assert_eq!(
            conn.canonical_key(&conn.primary, 1433),
            "db-host:1433:salesdb:svc"
        );
    }
}
