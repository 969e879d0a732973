//! `ExcelAdapter` — writes a worksheet via `rust_xlsxwriter`.
//! `write_mode` overwrite replaces the workbook; append re-reads nothing
//! (xlsx is not a practical append-in-place format) and instead appends a
//! new sheet named by run time, so repeated runs don't clobber history.

use async_trait::async_trait;
use rust_xlsxwriter::Workbook;

use queryrelay_core::{Destination, RowSet, WriteMode};

use crate::columns::column_union;
use crate::contract::{DestinationAdapter, DispatchMeta, SendResult};

fn write_workbook(path: &str, write_mode: WriteMode, rows: &RowSet, sheet_name: &str) -> Result<(), String> {
    let mut workbook = if write_mode == WriteMode::Append && std::path::Path::new(path).exists() {
        Workbook::load_from_path(path).map_err(|e| e.to_string())?
    } else {
        Workbook::new()
    };

    let columns = column_union(rows);
    let sheet = workbook
        .add_worksheet()
        .set_name(sheet_name)
        .map_err(|e| e.to_string())?;

    for (col, name) in columns.iter().enumerate() {
        sheet
            .write_string(0, col as u16, name)
            .map_err(|e| e.to_string())?;
    }
    for (row_idx, row) in rows.iter().enumerate() {
        for (col, name) in columns.iter().enumerate() {
            if let Some(value) = row.0.get(name) {
                let cell = (row_idx as u32 + 1, col as u16);
                match value {
                    serde_json::Value::Number(n) if n.is_f64() => {
                        sheet
                            .write_number(cell.0, cell.1, n.as_f64().unwrap_or_default())
                            .map_err(|e| e.to_string())?;
                    }
                    serde_json::Value::Number(n) => {
                        sheet
                            .write_number(cell.0, cell.1, n.as_i64().unwrap_or_default() as f64)
                            .map_err(|e| e.to_string())?;
                    }
                    serde_json::Value::Bool(b) => {
                        sheet
                            .write_boolean(cell.0, cell.1, *b)
                            .map_err(|e| e.to_string())?;
                    }
                    serde_json::Value::String(s) => {
                        sheet
                            .write_string(cell.0, cell.1, s)
                            .map_err(|e| e.to_string())?;
                    }
                    other => {
                        sheet
                            .write_string(cell.0, cell.1, other.to_string())
                            .map_err(|e| e.to_string())?;
                    }
                }
            }
        }
    }

    workbook.save(path).map_err(|e| e.to_string())
}

pub struct ExcelAdapter;

#[async_trait]
impl DestinationAdapter for ExcelAdapter {
    fn name(&self) -> &'static str {
        "excel"
    }

    async fn send(&self, rows: &RowSet, destination: &Destination, meta: &DispatchMeta) -> SendResult {
        let Destination::Excel { path, write_mode, .. } = destination else {
            return SendResult::failed("excel adapter given a non-excel destination");
        };
        let path = path.clone();
        let write_mode = *write_mode;
        let rows = rows.clone();
        let sheet_name = format!("run-{}", meta.run_time_ms);
        let row_count = rows.len();
        match tokio::task::spawn_blocking(move || write_workbook(&path, write_mode, &rows, &sheet_name)).await {
            Ok(Ok(())) => SendResult::ok(format!("wrote {row_count} rows")),
            Ok(Err(e)) => SendResult::failed(e),
            Err(e) => SendResult::failed(e.to_string()),
        }
    }
}
