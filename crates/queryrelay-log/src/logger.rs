//! Append-only log file with a bounded tail read.
//!
//! Writes go through a std `fs::OpenOptions` append handle guarded by a
//! mutex, the same synchronous-`fs`-under-an-async-lock shape
//! `queryrelay-core::fsatomic` uses for the catalogue. Reads seek to the
//! last 500 KiB once the file passes 10 MiB rather than scanning the whole
//! file, since this log is meant to be tailed, not replayed.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use queryrelay_core::JobId;

use crate::error::LogResult;
use crate::types::{format_line, LogLevel};

const DEFAULT_TAIL_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_TAIL_SEEK_BYTES: u64 = 500 * 1024;

#[derive(Clone)]
pub struct Logger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
    tail_threshold_bytes: u64,
    tail_seek_bytes: u64,
}

impl Logger {
    pub fn open(path: PathBuf) -> LogResult<Self> {
        Self::open_with_thresholds(path, DEFAULT_TAIL_THRESHOLD_BYTES, DEFAULT_TAIL_SEEK_BYTES)
    }

    fn open_with_thresholds(path: PathBuf, tail_threshold_bytes: u64, tail_seek_bytes: u64) -> LogResult<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            write_lock: Arc::new(Mutex::new(())),
            tail_threshold_bytes,
            tail_seek_bytes,
        })
    }

    #[cfg(test)]
    pub fn open_for_test(path: PathBuf, tail_threshold_bytes: u64, tail_seek_bytes: u64) -> LogResult<Self> {
        Self::open_with_thresholds(path, tail_threshold_bytes, tail_seek_bytes)
    }

    pub async fn log(
        &self,
        level: LogLevel,
        job_id: Option<&JobId>,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> LogResult<()> {
        let line = format_line(Utc::now(), level, job_id.map(|j| j.as_str()), message, data.as_ref());
        let path = self.path.clone();
        let _guard = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "{line}")
        })
        .await
        .expect("log writer task panicked")?;
        Ok(())
    }

    pub async fn debug(&self, job_id: Option<&JobId>, message: &str) -> LogResult<()> {
        self.log(LogLevel::Debug, job_id, message, None).await
    }

    pub async fn info(&self, job_id: Option<&JobId>, message: &str) -> LogResult<()> {
        self.log(LogLevel::Info, job_id, message, None).await
    }

    pub async fn warn(&self, job_id: Option<&JobId>, message: &str) -> LogResult<()> {
        self.log(LogLevel::Warn, job_id, message, None).await
    }

    pub async fn error(&self, job_id: Option<&JobId>, message: &str, data: Option<serde_json::Value>) -> LogResult<()> {
        self.log(LogLevel::Error, job_id, message, data).await
    }

    /// Returns up to the last `n` lines. For files over the tail threshold
    /// (10 MiB by default), seeks to the last `tail_seek_bytes` (500 KiB by
    /// default) instead of reading the whole file; the first, possibly
    /// partial line of that window is discarded.
    pub async fn tail(&self, n: usize) -> LogResult<Vec<String>> {
        let path = self.path.clone();
        let threshold = self.tail_threshold_bytes;
        let seek_bytes = self.tail_seek_bytes;
        tokio::task::spawn_blocking(move || -> LogResult<Vec<String>> {
            let mut file = fs::File::open(&path)?;
            let len = file.metadata()?.len();

            let mut truncated = false;
            if len > threshold {
                file.seek(SeekFrom::Start(len - seek_bytes))?;
                truncated = true;
            }

            let mut buf = String::new();
            file.read_to_string(&mut buf)?;

            let mut lines: Vec<&str> = buf.lines().collect();
            if truncated && !lines.is_empty() {
                lines.remove(0);
            }

            let start = lines.len().saturating_sub(n);
            Ok(lines[start..].iter().map(|l| l.to_string()).collect())
        })
        .await
        .expect("log tail task panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appended_lines_round_trip_through_tail() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::open(dir.path().join("queryrelay.log")).unwrap();

        logger.info(None, "starting up").await.unwrap();
        logger.error(Some(&JobId::from("j1")), "query failed", None).await.unwrap();

        let lines = logger.tail(10).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[INFO]"));
        assert!(lines[0].contains("starting up"));
        assert!(lines[1].contains("[ERROR]"));
        assert!(lines[1].contains("[j1]"));
    }

    #[tokio::test]
    async fn tail_returns_at_most_n_most_recent_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::open(dir.path().join("queryrelay.log")).unwrap();
        for i in 0..5 {
            logger.info(None, &format!("line {i}")).await.unwrap();
        }

        let lines = logger.tail(2).await.unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("line 3"));
        assert!(lines[1].contains("line 4"));
    }

    #[tokio::test]
    async fn tail_on_large_file_seeks_instead_of_scanning_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::open_for_test(dir.path().join("queryrelay.log"), 200, 100).unwrap();

        for i in 0..50 {
            logger.info(None, &format!("line {i}")).await.unwrap();
        }

        let lines = logger.tail(3).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.last().unwrap().contains("line 49"));
    }

    #[tokio::test]
    async fn data_payload_is_appended_after_a_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::open(dir.path().join("queryrelay.log")).unwrap();
        logger
            .log(LogLevel::Warn, None, "slow query", Some(serde_json::json!({"ms": 4200})))
            .await
            .unwrap();

        let lines = logger.tail(1).await.unwrap();
        assert!(lines[0].contains("| {\"ms\":4200}"));
    }
}
