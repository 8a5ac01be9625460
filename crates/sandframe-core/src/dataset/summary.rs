//! Shape and type summary of a snapshot, shown to users before they ask a
//! question about their data.

use serde::Serialize;

use super::{ColumnType, DatasetSnapshot};

/// Overview of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub columns: usize,
    pub missing_values: usize,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    /// Column name to declared type, in column order.
    pub dtypes: Vec<(String, ColumnType)>,
}

impl DatasetSnapshot {
    /// Summarize row/column counts, missing cells and column kinds.
    pub fn summary(&self) -> DatasetSummary {
        let of_type = |ty: ColumnType| {
            self.columns()
                .iter()
                .filter(|c| c.dtype() == ty)
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        };

        DatasetSummary {
            rows: self.num_rows(),
            columns: self.num_columns(),
            missing_values: self.columns().iter().map(|c| c.null_count()).sum(),
            numeric_columns: of_type(ColumnType::Numeric),
            categorical_columns: of_type(ColumnType::Text),
            dtypes: self
                .columns()
                .iter()
                .map(|c| (c.name().to_string(), c.dtype()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::dataset::{CellValue, ColumnSnapshot};

    use super::*;

    #[test]
    fn test_summary_counts_missing_and_kinds() {
        let snapshot = DatasetSnapshot::new(vec![
            ColumnSnapshot::text("city", ["Oslo", "Lima", "Pune"]),
            ColumnSnapshot::new(
                "temp",
                ColumnType::Numeric,
                vec![CellValue::Float(3.5), CellValue::Null, CellValue::Int(31)],
            )
            .unwrap(),
        ])
        .unwrap();

        let summary = snapshot.summary();
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.columns, 2);
        assert_eq!(summary.missing_values, 1);
        assert_eq!(summary.numeric_columns, vec!["temp"]);
        assert_eq!(summary.categorical_columns, vec!["city"]);
        assert_eq!(summary.dtypes[1], ("temp".to_string(), ColumnType::Numeric));
    }
}
