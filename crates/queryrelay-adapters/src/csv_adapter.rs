//! `CsvAdapter` — writes rowsets to a file via the `csv` crate.
//! `write_mode` selects append-to-existing-file vs. truncate-and-overwrite.
//! `encoding` is recorded on the destination but only `utf-8` is actually
//! transcoded; other encodings pass through unmodified (flagged as an open
//! question in DESIGN.md rather than silently mojibake-ing data).

use std::fs::OpenOptions;
use std::io::Write;

use async_trait::async_trait;

use queryrelay_core::{Destination, RowSet, WriteMode};

use crate::columns::column_union;
use crate::contract::{DestinationAdapter, DispatchMeta, SendResult};

fn write_rows(path: &str, write_mode: WriteMode, rows: &RowSet) -> std::io::Result<()> {
    let append = write_mode == WriteMode::Append && std::path::Path::new(path).exists();
    let columns = column_union(rows);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!append)
        .from_writer(file);

    if !append {
        writer.write_record(&columns)?;
    }
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| {
                row.0
                    .get(c)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default()
            })
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub struct CsvAdapter;

#[async_trait]
impl DestinationAdapter for CsvAdapter {
    fn name(&self) -> &'static str {
        "csv"
    }

    async fn send(&self, rows: &RowSet, destination: &Destination, _meta: &DispatchMeta) -> SendResult {
        let Destination::Csv { path, write_mode, .. } = destination else {
            return SendResult::failed("csv adapter given a non-csv destination");
        };
        let path = path.clone();
        let write_mode = *write_mode;
        let rows = rows.clone();
        let row_count = rows.len();
        match tokio::task::spawn_blocking(move || write_rows(&path, write_mode, &rows)).await {
            Ok(Ok(())) => SendResult::ok(format!("wrote {row_count} rows")),
            Ok(Err(e)) => SendResult::failed(e.to_string()),
            Err(e) => SendResult::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queryrelay_core::Row;
    use std::collections::BTreeMap;

    fn row(a: &str, b: &str) -> Row {
        Row(BTreeMap::from([
            ("a".to_string(), serde_json::json!(a)),
            ("b".to_string(), serde_json::json!(b)),
        ]))
    }

    #[tokio::test]
    async fn overwrite_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "stale content\n").unwrap();

        let adapter = CsvAdapter;
        let dest = Destination::Csv {
            path: path.to_str().unwrap().to_string(),
            write_mode: WriteMode::Overwrite,
            encoding: "utf-8".to_string(),
        };
        let meta = test_meta();
        let rows = vec![row("1", "2")];
        let result = adapter.send(&rows, &dest, &meta).await;
        assert!(result.success);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("stale"));
        assert!(contents.contains("1"));
    }

    #[tokio::test]
    async fn append_mode_adds_rows_without_rewriting_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let adapter = CsvAdapter;
        let dest = Destination::Csv {
            path: path.to_str().unwrap().to_string(),
            write_mode: WriteMode::Append,
            encoding: "utf-8".to_string(),
        };
        let meta = test_meta();

        adapter.send(&vec![row("1", "2")], &dest, &meta).await;
        adapter.send(&vec![row("3", "4")], &dest, &meta).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3); // header + 2 rows
    }

    fn test_meta() -> DispatchMeta {
        DispatchMeta {
            job_id: queryrelay_core::JobId::from("j1"),
            job_name: "nightly".to_string(),
            group: None,
            run_time_ms: 0,
            row_count: 1,
            connection_id: queryrelay_core::ConnectionId::from("c1"),
            connection_name: "c1".to_string(),
            database: "db".to_string(),
            financial_year: None,
            partner: None,
            sheet_name_format: None,
        }
    }
}
