//! In-memory tables, series and groupings manipulated by scripts.

use std::rc::Rc;

use crate::dataset::{CellValue, ColumnType, DatasetSnapshot};
use crate::script::{ScriptError, ScriptResult};

/// Rows shown when a table is rendered as text.
const TEXT_ROWS: usize = 20;

/// Row labels. A table without an explicit index is labelled by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: Option<String>,
    pub labels: Vec<CellValue>,
}

impl Index {
    pub fn new(name: Option<String>, labels: Vec<CellValue>) -> Self {
        Self { name, labels }
    }

    /// Position of the first row carrying `label`.
    pub fn position(&self, label: &CellValue) -> Option<usize> {
        self.labels.iter().position(|l| cells_equal(l, label))
    }

    fn take(&self, rows: &[usize]) -> Index {
        Index {
            name: self.name.clone(),
            labels: rows.iter().map(|&r| self.labels[r].clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
    pub values: Vec<CellValue>,
}

impl Column {
    /// Build a column whose type is inferred from its values.
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        let dtype = ColumnType::infer(&values);
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub index: Option<Index>,
}

impl Table {
    pub fn new(columns: Vec<Column>, index: Option<Index>) -> Self {
        Self { columns, index }
    }

    /// Rebuild a snapshot as the `df` table.
    pub fn from_snapshot(snapshot: DatasetSnapshot) -> Self {
        let columns = snapshot
            .into_columns()
            .into_iter()
            .map(|col| {
                let (name, dtype, values) = col.into_parts();
                Column {
                    name,
                    dtype,
                    values,
                }
            })
            .collect();
        Self {
            columns,
            index: None,
        }
    }

    pub fn num_rows(&self) -> usize {
        match (self.columns.first(), &self.index) {
            (Some(col), _) => col.len(),
            (None, Some(index)) => index.labels.len(),
            (None, None) => 0,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> ScriptResult<&Column> {
        self.column(name).ok_or_else(|| missing_column(name))
    }

    pub fn row_label(&self, row: usize) -> CellValue {
        match &self.index {
            Some(index) => index.labels[row].clone(),
            None => CellValue::Int(row as i64),
        }
    }

    /// Resolve a row label to its position.
    pub fn label_position(&self, label: &CellValue) -> ScriptResult<usize> {
        let found = match &self.index {
            Some(index) => index.position(label),
            None => match label {
                CellValue::Int(i) if *i >= 0 && (*i as usize) < self.num_rows() => {
                    Some(*i as usize)
                }
                _ => None,
            },
        };
        found.ok_or_else(|| ScriptError::key(format!("row label {} not found", label)))
    }

    /// Extract a column as a series sharing the table's index.
    pub fn series(&self, name: &str) -> ScriptResult<Series> {
        let col = self.require_column(name)?;
        Ok(Series {
            name: Some(col.name.clone()),
            dtype: col.dtype,
            values: col.values.clone(),
            index: self.index.clone(),
        })
    }

    /// Row `row` as a series indexed by column name.
    pub fn row(&self, row: usize) -> Series {
        let values: Vec<CellValue> = self.columns.iter().map(|c| c.values[row].clone()).collect();
        let labels = self.columns.iter().map(|c| CellValue::Text(c.name.clone())).collect();
        let mut series = Series::new(None, values);
        series.index = Some(Index::new(None, labels));
        if let CellValue::Text(label) = self.row_label(row) {
            series.name = Some(label);
        }
        series
    }

    pub fn take_rows(&self, rows: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    dtype: c.dtype,
                    values: rows.iter().map(|&r| c.values[r].clone()).collect(),
                })
                .collect(),
            index: self.index.as_ref().map(|i| i.take(rows)),
        }
    }

    pub fn select(&self, names: &[String]) -> ScriptResult<Table> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            columns.push(self.require_column(name)?.clone());
        }
        Ok(Table {
            columns,
            index: self.index.clone(),
        })
    }

    /// Replace a column in place or append it.
    pub fn set_column(&mut self, column: Column) -> ScriptResult<()> {
        if !self.columns.is_empty() && column.len() != self.num_rows() {
            return Err(ScriptError::value(format!(
                "length of values ({}) does not match length of index ({})",
                column.len(),
                self.num_rows()
            )));
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.dtype == ColumnType::Numeric)
    }

    /// Plain-text rendering, truncated to the first rows.
    pub fn render_text(&self) -> String {
        let rows = self.num_rows();
        let shown = rows.min(TEXT_ROWS);
        let mut header = Vec::new();
        let with_index = self.index.is_some() || self.columns.is_empty();
        if with_index {
            header.push(
                self.index
                    .as_ref()
                    .and_then(|i| i.name.clone())
                    .unwrap_or_default(),
            );
        }
        header.extend(self.columns.iter().map(|c| c.name.clone()));

        let mut grid: Vec<Vec<String>> = vec![header];
        for row in 0..shown {
            let mut line = Vec::new();
            if with_index {
                line.push(self.row_label(row).to_string());
            }
            line.extend(self.columns.iter().map(|c| display_cell(&c.values[row])));
            grid.push(line);
        }
        let mut text = align_grid(&grid);
        if rows > shown {
            text.push_str(&format!("\n... {} more rows", rows - shown));
        }
        text.push_str(&format!("\n[{} rows x {} columns]", rows, self.num_columns()));
        text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub dtype: ColumnType,
    pub values: Vec<CellValue>,
    pub index: Option<Index>,
}

impl Series {
    pub fn new(name: Option<String>, values: Vec<CellValue>) -> Self {
        let dtype = ColumnType::infer(&values);
        Self {
            name,
            dtype,
            values,
            index: None,
        }
    }

    pub fn with_index(mut self, index: Option<Index>) -> Self {
        self.index = index;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn label(&self, row: usize) -> CellValue {
        match &self.index {
            Some(index) => index.labels[row].clone(),
            None => CellValue::Int(row as i64),
        }
    }

    pub fn labels(&self) -> Vec<CellValue> {
        (0..self.len()).map(|r| self.label(r)).collect()
    }

    /// Look up a value by label (or by position when unlabelled).
    pub fn get(&self, label: &CellValue) -> ScriptResult<CellValue> {
        let position = match &self.index {
            Some(index) => index.position(label),
            None => match label {
                CellValue::Int(i) => {
                    let len = self.len() as i64;
                    let i = if *i < 0 { i + len } else { *i };
                    (0..len).contains(&i).then_some(i as usize)
                }
                _ => None,
            },
        };
        position
            .map(|p| self.values[p].clone())
            .ok_or_else(|| ScriptError::key(format!("{}", label)))
    }

    pub fn take(&self, rows: &[usize]) -> Series {
        Series {
            name: self.name.clone(),
            dtype: self.dtype,
            values: rows.iter().map(|&r| self.values[r].clone()).collect(),
            index: self.index.as_ref().map(|i| i.take(rows)),
        }
    }

    /// Non-null numeric values.
    pub fn numbers(&self) -> Vec<f64> {
        self.values.iter().filter_map(CellValue::as_f64).collect()
    }

    pub fn into_column(self, fallback: &str) -> Column {
        Column {
            name: self.name.unwrap_or_else(|| fallback.to_string()),
            dtype: self.dtype,
            values: self.values,
        }
    }

    /// Promote to a single-column table keeping the labels.
    pub fn to_table(&self) -> Table {
        let column = self.clone().into_column("0");
        Table::new(vec![column], self.index.clone())
    }

    pub fn render_text(&self) -> String {
        let shown = self.len().min(TEXT_ROWS);
        let grid: Vec<Vec<String>> = (0..shown)
            .map(|r| vec![self.label(r).to_string(), display_cell(&self.values[r])])
            .collect();
        let mut text = align_grid(&grid);
        if self.len() > shown {
            text.push_str(&format!("\n... {} more rows", self.len() - shown));
        }
        let name = self.name.as_deref().map(|n| format!("Name: {}, ", n)).unwrap_or_default();
        text.push_str(&format!("\n{}Length: {}, dtype: {}", name, self.len(), self.dtype));
        text
    }
}

/// A table split by one or more key columns.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub table: Rc<Table>,
    pub keys: Vec<String>,
    /// Columns picked with `grouped[...]`; all non-key columns when unset.
    pub selection: Option<Vec<String>>,
    /// `grouped['col']` selects a single column and aggregates to a series.
    pub single: bool,
}

impl GroupBy {
    pub fn new(table: Rc<Table>, keys: Vec<String>) -> ScriptResult<Self> {
        for key in &keys {
            table.require_column(key)?;
        }
        Ok(Self {
            table,
            keys,
            selection: None,
            single: false,
        })
    }

    /// Groups ordered by key; rows with a null key are dropped.
    pub fn groups(&self) -> Vec<(Vec<CellValue>, Vec<usize>)> {
        let key_columns: Vec<&Column> = self
            .keys
            .iter()
            .filter_map(|k| self.table.column(k))
            .collect();
        let mut groups: Vec<(Vec<CellValue>, Vec<usize>)> = Vec::new();
        for row in 0..self.table.num_rows() {
            let key: Vec<CellValue> = key_columns.iter().map(|c| c.values[row].clone()).collect();
            if key.iter().any(CellValue::is_null) {
                continue;
            }
            match groups.iter_mut().find(|(k, _)| keys_equal(k, &key)) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        groups.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        groups
    }

    /// Value columns aggregated per group.
    pub fn value_columns(&self) -> Vec<&Column> {
        match &self.selection {
            Some(names) => names.iter().filter_map(|n| self.table.column(n)).collect(),
            None => self
                .table
                .columns
                .iter()
                .filter(|c| !self.keys.contains(&c.name))
                .collect(),
        }
    }
}

pub fn missing_column(name: &str) -> ScriptError {
    ScriptError::key(format!("column '{}' not found", name))
}

/// Equality used for labels and group keys: numbers compare by value.
pub fn cells_equal(a: &CellValue, b: &CellValue) -> bool {
    match (a, b) {
        (CellValue::Null, CellValue::Null) => true,
        (CellValue::Text(x), CellValue::Text(y)) => x == y,
        (CellValue::Timestamp(x), CellValue::Timestamp(y)) => x == y,
        (CellValue::Bool(x), CellValue::Bool(y)) => x == y,
        (CellValue::Int(_) | CellValue::Float(_), CellValue::Int(_) | CellValue::Float(_)) => {
            a.as_f64() == b.as_f64()
        }
        _ => false,
    }
}

fn keys_equal(a: &[CellValue], b: &[CellValue]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| cells_equal(x, y))
}

fn display_cell(value: &CellValue) -> String {
    match value {
        CellValue::Null => "NaN".to_string(),
        CellValue::Float(x) if x.is_nan() => "NaN".to_string(),
        other => other.to_string(),
    }
}

fn align_grid(grid: &[Vec<String>]) -> String {
    let columns = grid.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            grid.iter()
                .filter_map(|row| row.get(c))
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();
    grid.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(c, cell)| format!("{:>width$}", cell, width = widths[c]))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnSnapshot;

    fn sample() -> Table {
        let snapshot = DatasetSnapshot::new(vec![
            ColumnSnapshot::text("region", ["east", "west", "east", "north"]),
            ColumnSnapshot::numeric("sales", [10.0, 20.0, 30.0, 5.0]),
        ])
        .unwrap();
        Table::from_snapshot(snapshot)
    }

    #[test]
    fn test_from_snapshot_keeps_order() {
        let table = sample();
        assert_eq!(table.column_names(), vec!["region", "sales"]);
        assert_eq!(table.num_rows(), 4);
        assert!(table.index.is_none());
    }

    #[test]
    fn test_take_rows_and_select() {
        let table = sample();
        let picked = table.take_rows(&[2, 0]);
        assert_eq!(picked.columns[1].values, vec![CellValue::Int(30), CellValue::Int(10)]);
        assert!(table.select(&["missing".to_string()]).is_err());
    }

    #[test]
    fn test_set_column_checks_length() {
        let mut table = sample();
        let err = table
            .set_column(Column::new("x", vec![CellValue::Int(1)]))
            .unwrap_err();
        assert!(err.message.contains("length"));
        table
            .set_column(Column::new("sales", vec![CellValue::Int(1); 4]))
            .unwrap();
        assert_eq!(table.num_columns(), 2);
    }

    #[test]
    fn test_groups_are_sorted_and_skip_nulls() {
        let mut table = sample();
        table.columns[0].values[3] = CellValue::Null;
        let grouped = GroupBy::new(Rc::new(table), vec!["region".to_string()]).unwrap();
        let groups = grouped.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec![CellValue::Text("east".into())]);
        assert_eq!(groups[0].1, vec![0, 2]);
    }

    #[test]
    fn test_series_get_by_position_and_label() {
        let series = Series::new(None, vec![CellValue::Int(4), CellValue::Int(5)]);
        assert_eq!(series.get(&CellValue::Int(-1)).unwrap(), CellValue::Int(5));
        let labelled = series.with_index(Some(Index::new(
            None,
            vec![CellValue::Text("a".into()), CellValue::Text("b".into())],
        )));
        assert_eq!(labelled.get(&CellValue::Text("a".into())).unwrap(), CellValue::Int(4));
        assert!(labelled.get(&CellValue::Int(0)).is_err());
    }

    #[test]
    fn test_render_text_shows_shape() {
        let text = sample().render_text();
        assert!(text.contains("region"));
        assert!(text.ends_with("[4 rows x 2 columns]"));
    }
}
