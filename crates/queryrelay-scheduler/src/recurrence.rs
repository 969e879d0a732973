//! Translating a job's recurrence rule into firing times. Every
//! `RecurrenceRule` but `Once` renders to a
//! 5-field cron expression (`RecurrenceRule::to_cron`); the `cron` crate's
//! grammar is seconds-first, so a literal `0` seconds field is prefixed
//! before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use queryrelay_core::RecurrenceRule;

use crate::error::{SchedulerError, SchedulerResult};

/// The next time `rule` fires strictly after `after`, or `None` for
/// `RecurrenceRule::Once`.
pub fn next_fire_after(
    rule: &RecurrenceRule,
    after: DateTime<Utc>,
) -> SchedulerResult<Option<DateTime<Utc>>> {
    let Some(cron_expr) = rule.to_cron() else {
        return Ok(None);
    };
    let schedule = parse(&cron_expr)?;
    Ok(schedule.after(&after).next())
}

fn parse(expr: &str) -> SchedulerResult<Schedule> {
    let with_seconds = format!("0 {expr}");
    Schedule::from_str(&with_seconds)
        .map_err(|e| SchedulerError::ConfigInvalid(format!("invalid cron expression '{expr}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use queryrelay_core::TimeOfDay;

    #[test]
    fn once_never_fires() {
        assert_eq!(next_fire_after(&RecurrenceRule::Once, Utc::now()).unwrap(), None);
    }

    #[test]
    fn daily_fires_at_configured_time() {
        let rule = RecurrenceRule::Daily {
            time_of_day: TimeOfDay { hour: 9, minute: 30 },
        };
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = next_fire_after(&rule, after).unwrap().unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "09:30");
        assert_eq!(next.format("%Y-%m-%d").to_string(), "2026-01-01");
    }

    #[test]
    fn every_n_days_fires_after_the_reference_day_at_the_configured_time() {
        let rule = RecurrenceRule::EveryNDays {
            n: 3,
            time_of_day: TimeOfDay { hour: 6, minute: 0 },
        };
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_after(&rule, after).unwrap().unwrap();
        assert!(next > after);
        assert_eq!(next.format("%H:%M").to_string(), "06:00");
    }

    #[test]
    fn malformed_custom_cron_is_config_invalid() {
        let rule = RecurrenceRule::Custom {
            cron: "not a cron".to_string(),
        };
        let result = next_fire_after(&rule, Utc::now());
        assert!(matches!(result, Err(SchedulerError::ConfigInvalid(_))));
    }

    #[test]
    fn custom_cron_is_honoured_directly() {
        let rule = RecurrenceRule::Custom {
            cron: "0 * * * *".to_string(),
        };
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 10, 15, 0).unwrap();
        let next = next_fire_after(&rule, after).unwrap().unwrap();
        assert_eq!(next.format("%Y-%m-%d %H:%M").to_string(), "2026-01-01 11:00");
    }
}
