//! Shared column-union helper for the file-based adapters (csv, excel):
//! rows are schemaless maps, so the column set for a sheet/CSV header is the
//! union of keys seen across the batch, sorted for determinism.

use std::collections::BTreeSet;

use queryrelay_core::RowSet;

pub fn column_union(rows: &RowSet) -> Vec<String> {
    let mut columns = BTreeSet::new();
    for row in rows {
        for key in row.0.keys() {
            columns.insert(key.clone());
        }
    }
    columns.into_iter().collect()
}
