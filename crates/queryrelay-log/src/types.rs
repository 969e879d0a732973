//! Line format for the append-only log file:
//! `[ISO-timestamp] [LEVEL] [jobId?] message | json-data?`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders one log line. `job_id` is omitted from the line entirely when
/// absent rather than rendered as a fixed-width empty field.
pub fn format_line(
    timestamp: chrono::DateTime<chrono::Utc>,
    level: LogLevel,
    job_id: Option<&str>,
    message: &str,
    data: Option<&serde_json::Value>,
) -> String {
    let mut line = format!("[{}] [{}]", timestamp.to_rfc3339(), level);
    if let Some(job_id) = job_id {
        line.push_str(&format!(" [{job_id}]"));
    }
    line.push(' ');
    line.push_str(message);
    if let Some(data) = data {
        line.push_str(" | ");
        line.push_str(&serde_json::to_string(data).unwrap_or_else(|_| "null".to_string()));
    }
    line
}
