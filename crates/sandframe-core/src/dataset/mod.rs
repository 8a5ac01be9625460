//! Dataset snapshots handed to the sandbox.
//!
//! A [`DatasetSnapshot`] is an immutable, ordered list of typed columns. It is
//! produced by an upstream preprocessing step, copied across the isolation
//! boundary by the marshaler, and rebuilt inside the worker as the `df` table.

mod json;
mod summary;

use std::cmp::Ordering;
use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};

pub use summary::DatasetSummary;

pub(crate) use json::parse_timestamp;

/// Declared element type of a column.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Text,
    Timestamp,
    Boolean,
}

impl ColumnType {
    /// Whether a cell may live in a column of this type.
    ///
    /// Nulls are accepted everywhere.
    pub fn accepts(self, value: &CellValue) -> bool {
        matches!(
            (self, value),
            (_, CellValue::Null)
                | (ColumnType::Numeric, CellValue::Int(_) | CellValue::Float(_))
                | (ColumnType::Text, CellValue::Text(_))
                | (ColumnType::Timestamp, CellValue::Timestamp(_))
                | (ColumnType::Boolean, CellValue::Bool(_))
        )
    }

    /// Infer a column type from computed values.
    ///
    /// Mixed columns fall back to `Text`; all-null columns are numeric.
    pub fn infer(values: &[CellValue]) -> ColumnType {
        let mut inferred: Option<ColumnType> = None;
        for value in values {
            let ty = match value {
                CellValue::Null => continue,
                CellValue::Int(_) | CellValue::Float(_) => ColumnType::Numeric,
                CellValue::Text(_) => ColumnType::Text,
                CellValue::Bool(_) => ColumnType::Boolean,
                CellValue::Timestamp(_) => ColumnType::Timestamp,
            };
            match inferred {
                None => inferred = Some(ty),
                Some(prev) if prev == ty => {}
                Some(_) => return ColumnType::Text,
            }
        }
        inferred.unwrap_or(ColumnType::Numeric)
    }

    /// Lowercase name used in summaries and `dtypes`.
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Text => "text",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null) || matches!(self, CellValue::Float(f) if f.is_nan())
    }

    /// Numeric view of the cell. Booleans count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) if !f.is_nan() => Some(*f),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Total order used for sorting and grouping.
    ///
    /// Nulls sort last; numbers compare by value regardless of int/float.
    pub fn total_cmp(&self, other: &CellValue) -> Ordering {
        fn rank(v: &CellValue) -> u8 {
            match v {
                CellValue::Bool(_) => 0,
                CellValue::Int(_) | CellValue::Float(_) => 1,
                CellValue::Timestamp(_) => 2,
                CellValue::Text(_) => 3,
                CellValue::Null => 4,
            }
        }

        if self.is_null() || other.is_null() {
            return self.is_null().cmp(&other.is_null());
        }
        match (self, other) {
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (CellValue::Timestamp(a), CellValue::Timestamp(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) if rank(a) == rank(b) => x.total_cmp(&y),
                _ => rank(a).cmp(&rank(b)),
            },
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("null"),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(x) => f.write_str(&format_float(*x)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(b) => f.write_str(if *b { "True" } else { "False" }),
            CellValue::Timestamp(ms) => f.write_str(&format_timestamp(*ms)),
        }
    }
}

/// Format a float the way tables show it: integral values keep one decimal.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        "nan".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{:.1}", x)
    } else {
        format!("{}", x)
    }
}

/// Format epoch milliseconds; midnight values print as a bare date.
pub fn format_timestamp(ms: i64) -> String {
    match chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms) {
        Some(dt) if ms.rem_euclid(86_400_000) == 0 => dt.format("%Y-%m-%d").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("<timestamp {}>", ms),
    }
}

/// One named, typed column of a snapshot.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    name: String,
    dtype: ColumnType,
    values: Vec<CellValue>,
}

impl ColumnSnapshot {
    /// Create a column, checking every cell against the declared type.
    pub fn new(name: impl Into<String>, dtype: ColumnType, values: Vec<CellValue>) -> Result<Self> {
        let name = name.into();
        if let Some((row, bad)) = values.iter().enumerate().find(|(_, v)| !dtype.accepts(v)) {
            return Err(Error::InvalidDataset(format!(
                "column '{}' is declared {} but row {} holds {:?}",
                name, dtype, row, bad
            )));
        }
        Ok(Self {
            name,
            dtype,
            values,
        })
    }

    /// Numeric column from floats. Integral values are stored as ints.
    pub fn numeric(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name: name.into(),
            dtype: ColumnType::Numeric,
            values: values
                .into_iter()
                .map(|v| {
                    if v.fract() == 0.0 && v.abs() < 9.0e15 {
                        CellValue::Int(v as i64)
                    } else {
                        CellValue::Float(v)
                    }
                })
                .collect(),
        }
    }

    /// Text column from strings.
    pub fn text<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            dtype: ColumnType::Text,
            values: values.into_iter().map(|s| CellValue::Text(s.into())).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> ColumnType {
        self.dtype
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of missing cells.
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_null()).count()
    }

    pub(crate) fn into_parts(self) -> (String, ColumnType, Vec<CellValue>) {
        (self.name, self.dtype, self.values)
    }
}

/// Immutable columnar table passed into the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Archive, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    columns: Vec<ColumnSnapshot>,
}

impl DatasetSnapshot {
    /// Build a snapshot, validating names and lengths.
    pub fn new(columns: Vec<ColumnSnapshot>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.len();
            for column in &columns {
                if column.len() != rows {
                    return Err(Error::InvalidDataset(format!(
                        "column '{}' has {} rows, expected {}",
                        column.name,
                        column.len(),
                        rows
                    )));
                }
            }
        }
        for (i, column) in columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(Error::InvalidDataset(format!("column {} has an empty name", i)));
            }
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(Error::InvalidDataset(format!(
                    "duplicate column name '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// A snapshot with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[ColumnSnapshot] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSnapshot> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, ColumnSnapshot::len)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub(crate) fn into_columns(self) -> Vec<ColumnSnapshot> {
        self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_rejects_mismatched_cells() {
        let err = ColumnSnapshot::new(
            "price",
            ColumnType::Numeric,
            vec![CellValue::Int(1), CellValue::Text("two".into())],
        )
        .unwrap_err();
        assert!(err.to_string().contains("price"));
    }

    #[test]
    fn test_snapshot_rejects_ragged_columns() {
        let result = DatasetSnapshot::new(vec![
            ColumnSnapshot::numeric("a", [1.0, 2.0]),
            ColumnSnapshot::numeric("b", [1.0]),
        ]);
        assert!(matches!(result, Err(Error::InvalidDataset(_))));
    }

    #[test]
    fn test_snapshot_rejects_duplicate_names() {
        let result = DatasetSnapshot::new(vec![
            ColumnSnapshot::numeric("a", [1.0]),
            ColumnSnapshot::numeric("a", [2.0]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_numeric_constructor_keeps_integers() {
        let col = ColumnSnapshot::numeric("n", [1.0, 2.5]);
        assert_eq!(col.values(), &[CellValue::Int(1), CellValue::Float(2.5)]);
    }

    #[test]
    fn test_total_cmp_orders_nulls_last() {
        let mut values = vec![
            CellValue::Null,
            CellValue::Float(2.5),
            CellValue::Int(1),
            CellValue::Int(3),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                CellValue::Int(1),
                CellValue::Float(2.5),
                CellValue::Int(3),
                CellValue::Null
            ]
        );
    }

    #[test]
    fn test_infer_mixed_is_text() {
        assert_eq!(
            ColumnType::infer(&[CellValue::Int(1), CellValue::Text("x".into())]),
            ColumnType::Text
        );
        assert_eq!(ColumnType::infer(&[CellValue::Null]), ColumnType::Numeric);
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(format_timestamp(0), "1970-01-01");
        assert_eq!(format_timestamp(3_600_000), "1970-01-01 01:00:00");
    }
}
