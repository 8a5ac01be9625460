//! JSON loading for dataset snapshots.
//!
//! The file format carries declared column types; nothing is inferred:
//!
//! ```json
//! {"columns": [
//!   {"name": "region", "type": "text", "values": ["north", "south"]},
//!   {"name": "sales", "type": "numeric", "values": [10, 12.5]}
//! ]}
//! ```

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;

use super::{CellValue, ColumnSnapshot, ColumnType, DatasetSnapshot};
use crate::error::{Error, Result};

#[derive(Deserialize)]
struct DatasetFile {
    columns: Vec<ColumnFile>,
}

#[derive(Deserialize)]
struct ColumnFile {
    name: String,
    #[serde(rename = "type")]
    dtype: ColumnType,
    values: Vec<serde_json::Value>,
}

impl DatasetSnapshot {
    /// Parse a snapshot from its JSON representation.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: DatasetFile = serde_json::from_str(text)
            .map_err(|e| Error::InvalidDataset(format!("malformed dataset JSON: {}", e)))?;

        let columns = file
            .columns
            .into_iter()
            .map(|column| {
                let values = column
                    .values
                    .iter()
                    .enumerate()
                    .map(|(row, value)| {
                        cell_from_json(column.dtype, value).ok_or_else(|| {
                            Error::InvalidDataset(format!(
                                "column '{}' row {}: {} is not a valid {} value",
                                column.name, row, value, column.dtype
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                ColumnSnapshot::new(column.name, column.dtype, values)
            })
            .collect::<Result<Vec<_>>>()?;

        DatasetSnapshot::new(columns)
    }

    /// Read and parse a snapshot file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}

fn cell_from_json(dtype: ColumnType, value: &serde_json::Value) -> Option<CellValue> {
    use serde_json::Value as J;

    match (dtype, value) {
        (_, J::Null) => Some(CellValue::Null),
        (ColumnType::Numeric, J::Number(n)) => match n.as_i64() {
            Some(i) => Some(CellValue::Int(i)),
            None => n.as_f64().map(CellValue::Float),
        },
        (ColumnType::Text, J::String(s)) => Some(CellValue::Text(s.clone())),
        (ColumnType::Boolean, J::Bool(b)) => Some(CellValue::Bool(*b)),
        (ColumnType::Timestamp, J::Number(n)) => n.as_i64().map(CellValue::Timestamp),
        (ColumnType::Timestamp, J::String(s)) => parse_timestamp(s).map(CellValue::Timestamp),
        _ => None,
    }
}

/// Parse a timestamp string into epoch milliseconds (UTC).
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and
/// `YYYY-MM-DD`.
pub(crate) fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    None
}
