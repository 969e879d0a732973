//! Row/rowset types shared by the executor, buffer, and adapters, plus the
//! stable content hash used by the `onChange` trigger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single result row. Fields are kept in a `BTreeMap` so iteration order
/// (and therefore the canonical hash below) never depends on column order
/// returned by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Row(pub BTreeMap<String, serde_json::Value>);

pub type RowSet = Vec<Row>;

/// Stable content hash of a rowset: canonical JSON (rows in original order,
/// fields sorted within each row — guaranteed by `Row`'s `BTreeMap`) hashed
/// with SHA-256 and hex-encoded.
pub fn content_hash(rows: &RowSet) -> String {
    let canonical = serde_json::to_vec(rows).expect("rows serialize");
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, i64)]) -> Row {
        Row(pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
            .collect())
    }

    #[test]
    fn hash_is_stable_across_field_insertion_order() {
        let a = Row(BTreeMap::from([
            ("b".to_string(), serde_json::json!(2)),
            ("a".to_string(), serde_json::json!(1)),
        ]));
        let b = Row(BTreeMap::from([
            ("a".to_string(), serde_json::json!(1)),
            ("b".to_string(), serde_json::json!(2)),
        ]));
        assert_eq!(content_hash(&vec![a]), content_hash(&vec![b]));
    }

    #[test]
    fn hash_changes_when_data_changes() {
        let rows_a = vec![row(&[("x", 1)])];
        let rows_b = vec![row(&[("x", 2)])];
        assert_ne!(content_hash(&rows_a), content_hash(&rows_b));
    }

    #[test]
    fn empty_rowset_has_a_hash() {
        let empty: RowSet = vec![];
        assert_eq!(content_hash(&empty).len(), 64);
    }
}
