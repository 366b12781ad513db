//! The bundle-list JSON envelope used by the store's `bundlelist`/`newsince`
//! endpoints (§6.2): a `header` naming each column, and `rows` of
//! equal-width tuples.

use dtrpc_error::{DtrpcError, ErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw deserialized shape of a bundle-list response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleListResponse {
    /// Column names, in the order each row's values appear.
    pub header: Vec<String>,
    /// Row values, one `Vec` per bundle, parallel to `header`.
    pub rows: Vec<Vec<Value>>,
}

/// A single row, with its cells keyed by column name for convenient lookup.
pub type Row = BTreeMap<String, Value>;

impl BundleListResponse {
    /// Zip `header` against every row, yielding one map per bundle.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::TransportFraming`] if any row's width does not
    /// match the header's width.
    pub fn into_rows(self) -> Result<Vec<Row>, DtrpcError> {
        let width = self.header.len();
        self.rows
            .into_iter()
            .map(|row| {
                if row.len() != width {
                    return Err(DtrpcError::new(
                        ErrorCode::TransportFraming,
                        format!(
                            "bundle-list row has {} cells, expected {width}",
                            row.len()
                        ),
                    ));
                }
                Ok(self.header.iter().cloned().zip(row).collect())
            })
            .collect()
    }
}

/// Read a string-valued cell from a decoded row.
pub fn row_str<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key)?.as_str()
}
