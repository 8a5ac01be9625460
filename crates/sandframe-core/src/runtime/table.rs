//! Table properties, methods and indexing.

use std::rc::Rc;

use crate::dataset::{CellValue, ColumnType, parse_timestamp};
use crate::script::ast::StmtKind;
use crate::script::{ScriptError, ScriptResult, parse};

use super::agg::{self, Agg};
use super::args::{Args, names_of};
use super::builtins::round_float;
use super::frame::{Column, GroupBy, Index, Series, Table, cells_equal, missing_column};
use super::interp::Interpreter;
use super::styled::StyledTable;
use super::value::{AccessorKind, Builtin, SliceBounds, Value};

const METHODS: &[&str] = &[
    "head", "tail", "describe", "sum", "mean", "median", "min", "max", "count", "std", "var",
    "nunique", "prod", "product", "corr", "sort_values", "sort_index", "groupby", "drop",
    "rename", "dropna", "fillna", "reset_index", "set_index", "copy", "select_dtypes", "isna",
    "isnull", "notna", "notnull", "nlargest", "nsmallest", "drop_duplicates", "pivot_table",
    "round", "assign", "apply", "value_counts", "agg", "aggregate", "astype", "abs", "cumsum",
    "idxmax", "idxmin", "any", "all", "quantile", "to_dict", "merge", "query", "to_string",
    "first_valid_index", "transpose", "info",
];

pub fn attribute(t: &Rc<Table>, name: &str) -> ScriptResult<Option<Value>> {
    let value = match name {
        "shape" => Value::Tuple(vec![
            Value::Int(t.num_rows() as i64),
            Value::Int(t.num_columns() as i64),
        ]),
        "columns" => Value::List(t.column_names().into_iter().map(Value::Str).collect()),
        "dtypes" => {
            let labels = t.columns.iter().map(|c| CellValue::Text(c.name.clone())).collect();
            let values = t.columns.iter().map(|c| CellValue::Text(c.dtype.name().to_string())).collect();
            Value::series(Series::new(None, values).with_index(Some(Index::new(None, labels))))
        }
        "size" => Value::Int((t.num_rows() * t.num_columns()) as i64),
        "ndim" => Value::Int(2),
        "empty" => Value::Bool(t.num_rows() == 0 || t.num_columns() == 0),
        "index" => Value::List(
            (0..t.num_rows()).map(|r| Value::from_cell(t.row_label(r))).collect(),
        ),
        "values" => Value::List(
            (0..t.num_rows())
                .map(|r| {
                    Value::List(t.columns.iter().map(|c| Value::from_cell(c.values[r].clone())).collect())
                })
                .collect(),
        ),
        "T" => Value::table(transpose(t)),
        "plot" => Value::Accessor(AccessorKind::Plot, Box::new(Value::Table(t.clone()))),
        "loc" => Value::Accessor(AccessorKind::Loc, Box::new(Value::Table(t.clone()))),
        "iloc" => Value::Accessor(AccessorKind::ILoc, Box::new(Value::Table(t.clone()))),
        "style" => Value::Styled(Rc::new(StyledTable::new(t.clone()))),
        _ if METHODS.contains(&name) => {
            Value::Method(Box::new(Value::Table(t.clone())), name.to_string())
        }
        _ => match t.column(name) {
            Some(_) => Value::series(t.series(name)?),
            None => return Ok(None),
        },
    };
    Ok(Some(value))
}

pub fn call(interp: &mut Interpreter, t: &Rc<Table>, name: &str, args: Args) -> ScriptResult<Value> {
    if let Some(agg) = Agg::from_name(name) {
        return reduce(t, agg, args.axis_is_columns(usize::MAX)?);
    }
    let table = match name {
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?;
            t.take_rows(&edge_rows(t.num_rows(), n, name == "head"))
        }
        "describe" => describe(t)?,
        "corr" => corr(t)?,
        "sort_values" => {
            let by = args
                .names(0, "by")?
                .ok_or_else(|| ScriptError::type_error("sort_values() missing required argument: 'by'"))?;
            let ascending = ascending_flags(&args, by.len())?;
            let keys = by
                .iter()
                .map(|name| t.require_column(name).map(|c| c.values.as_slice()))
                .collect::<ScriptResult<Vec<_>>>()?;
            t.take_rows(&sort_positions(&keys, &ascending))
        }
        "sort_index" => {
            let ascending = args.bool_or(usize::MAX, "ascending", true)?;
            let labels: Vec<CellValue> = (0..t.num_rows()).map(|r| t.row_label(r)).collect();
            t.take_rows(&sort_positions(&[labels.as_slice()], &[ascending]))
        }
        "groupby" => {
            let keys = args
                .names(0, "by")?
                .ok_or_else(|| ScriptError::type_error("groupby() missing required argument: 'by'"))?;
            return Ok(Value::GroupBy(Rc::new(GroupBy::new(t.clone(), keys)?)));
        }
        "drop" => drop(t, &args)?,
        "rename" => rename(t, &args)?,
        "dropna" => {
            let subset = match args.names(usize::MAX, "subset")? {
                Some(names) => names,
                None => t.column_names(),
            };
            let how_all = args.str(usize::MAX, "how")?.as_deref() == Some("all");
            if args.axis_is_columns(0)? {
                let keep: Vec<String> = t
                    .columns
                    .iter()
                    .filter(|c| {
                        let nulls = c.values.iter().filter(|v| v.is_null()).count();
                        if how_all { nulls < c.len() || c.is_empty() } else { nulls == 0 }
                    })
                    .map(|c| c.name.clone())
                    .collect();
                t.select(&keep)?
            } else {
                let columns = subset
                    .iter()
                    .map(|n| t.require_column(n))
                    .collect::<ScriptResult<Vec<_>>>()?;
                let rows: Vec<usize> = (0..t.num_rows())
                    .filter(|&r| {
                        let mut nulls = columns.iter().map(|c| c.values[r].is_null());
                        if how_all { !nulls.all(|n| n) } else { !nulls.any(|n| n) }
                    })
                    .collect();
                t.take_rows(&rows)
            }
        }
        "fillna" => fillna(t, args.require(0, "value", name)?)?,
        "reset_index" => {
            let drop = args.bool_or(usize::MAX, "drop", false)?;
            reset_index(t, drop)?
        }
        "set_index" => {
            let key = args.require_str(0, "keys", name)?;
            let column = t.require_column(&key)?.clone();
            let mut out = (**t).clone();
            if args.bool_or(usize::MAX, "drop", true)? {
                out.columns.retain(|c| c.name != key);
            }
            out.index = Some(Index::new(Some(column.name), column.values));
            out
        }
        "copy" => (**t).clone(),
        "select_dtypes" => select_dtypes(t, &args)?,
        "isna" | "isnull" | "notna" | "notnull" => {
            let want_null = name.starts_with("isn");
            map_cells(t, |cell| Ok(CellValue::Bool(cell.is_null() == want_null)))?
        }
        "nlargest" | "nsmallest" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let by = args
                .names(1, "columns")?
                .ok_or_else(|| ScriptError::type_error(format!("{}() missing required argument: 'columns'", name)))?;
            let keys = by
                .iter()
                .map(|c| t.require_column(c).map(|c| c.values.as_slice()))
                .collect::<ScriptResult<Vec<_>>>()?;
            let ascending = vec![name == "nsmallest"; by.len()];
            let rows: Vec<usize> = sort_positions(&keys, &ascending)
                .into_iter()
                .filter(|&r| !keys[0][r].is_null())
                .take(n)
                .collect();
            t.take_rows(&rows)
        }
        "drop_duplicates" => {
            let subset = args.names(0, "subset")?.unwrap_or_else(|| t.column_names());
            let keep_last = args.str(usize::MAX, "keep")?.as_deref() == Some("last");
            t.take_rows(&distinct_rows(t, &subset, keep_last)?)
        }
        "pivot_table" => pivot_table(t, &args)?,
        "round" => {
            let decimals = args.int_or(0, "decimals", 0)?;
            map_cells(t, |cell| {
                Ok(match cell {
                    CellValue::Float(x) => CellValue::Float(round_float(*x, decimals)),
                    other => other.clone(),
                })
            })?
        }
        "assign" => {
            let mut out = (**t).clone();
            for (column, value) in &args.keywords {
                let value = if value.is_callable() {
                    interp.call(value, Args::positional(vec![Value::table(out.clone())]))?
                } else {
                    value.clone()
                };
                let cells = broadcast(&value, out.num_rows())?;
                out.set_column(Column::new(column.clone(), cells))?;
            }
            out
        }
        "apply" => {
            let func = args.require(0, "func", name)?.clone();
            return apply(interp, t, &func, args.axis_is_columns(usize::MAX)?);
        }
        "value_counts" => {
            let subset = args.names(0, "subset")?.unwrap_or_else(|| t.column_names());
            let grouped = GroupBy::new(t.clone(), subset)?;
            let mut counted = super::groupby::size_table(&grouped);
            let counts = counted
                .column("count")
                .map(|c| c.values.clone())
                .unwrap_or_default();
            let order = sort_positions(&[counts.as_slice()], &[false]);
            counted = counted.take_rows(&order);
            counted.index = None;
            counted
        }
        "agg" | "aggregate" => return aggregate(t, args.require(0, "func", name)?),
        "astype" => {
            let target = args.require(0, "dtype", name)?;
            let mut out = (**t).clone();
            for column in &mut out.columns {
                let dtype = match target {
                    Value::Dict(entries) => entries
                        .iter()
                        .find(|(k, _)| k.as_str() == Some(column.name.as_str()))
                        .map(|(_, v)| v),
                    other => Some(other),
                };
                if let Some(dtype) = dtype {
                    let values = cast_cells(&column.values, dtype)?;
                    *column = Column::new(column.name.clone(), values);
                }
            }
            out
        }
        "abs" | "cumsum" => {
            let mut out = (**t).clone();
            for column in &mut out.columns {
                if column.dtype != ColumnType::Numeric {
                    return Err(ScriptError::type_error(format!(
                        "{}() needs numeric columns; '{}' is {}",
                        name, column.name, column.dtype
                    )));
                }
                let values = if name == "abs" {
                    column.values.iter().map(abs_cell).collect()
                } else {
                    cumulative_sum(&column.values)?
                };
                *column = Column::new(column.name.clone(), values);
            }
            out
        }
        "idxmax" | "idxmin" => {
            let want_max = name == "idxmax";
            let mut labels = Vec::new();
            let mut values = Vec::new();
            for column in t.numeric_columns() {
                labels.push(CellValue::Text(column.name.clone()));
                values.push(match extreme_position(&column.values, want_max) {
                    Some(row) => t.row_label(row),
                    None => CellValue::Null,
                });
            }
            return Ok(labelled_series(None, labels, values));
        }
        "any" | "all" => {
            let want_any = name == "any";
            let labels = t.columns.iter().map(|c| CellValue::Text(c.name.clone())).collect();
            let values = t
                .columns
                .iter()
                .map(|c| {
                    let mut truths = c.values.iter().filter(|v| !v.is_null()).map(cell_truthy);
                    CellValue::Bool(if want_any { truths.any(|b| b) } else { truths.all(|b| b) })
                })
                .collect();
            return Ok(labelled_series(None, labels, values));
        }
        "quantile" => {
            let q = args.f64(0, "q")?.unwrap_or(0.5);
            let mut labels = Vec::new();
            let mut values = Vec::new();
            for column in t.numeric_columns() {
                let xs: Vec<f64> = column.values.iter().filter_map(CellValue::as_f64).collect();
                labels.push(CellValue::Text(column.name.clone()));
                values.push(agg::quantile(&xs, q).map_or(CellValue::Null, CellValue::Float));
            }
            return Ok(labelled_series(Some(format!("{}", q)), labels, values));
        }
        "to_dict" => return to_dict(t, args.str(0, "orient")?.as_deref().unwrap_or("dict")),
        "merge" => merge(t, &args)?,
        "query" => {
            let text = args.require_str(0, "expr", name)?;
            query(interp, t, &text)?
        }
        "to_string" => return Ok(Value::Str(t.render_text())),
        "first_valid_index" => {
            let row = (0..t.num_rows()).find(|&r| t.columns.iter().any(|c| !c.values[r].is_null()));
            return Ok(row.map_or(Value::None, |r| Value::from_cell(t.row_label(r))));
        }
        "transpose" => transpose(t),
        "info" => {
            let mut lines = vec![format!("{} rows x {} columns", t.num_rows(), t.num_columns())];
            for c in &t.columns {
                let non_null = c.values.iter().filter(|v| !v.is_null()).count();
                lines.push(format!("{}: {} non-null {}", c.name, non_null, c.dtype));
            }
            interp.print(lines.join("\n"));
            return Ok(Value::None);
        }
        _ => return Err(ScriptError::attribute("DataFrame", name)),
    };
    Ok(Value::table(table))
}

/// `df[key]`.
pub fn subscript(t: &Rc<Table>, key: &Value) -> ScriptResult<Value> {
    if let Some(rows) = bool_mask(key, t.num_rows())? {
        return Ok(Value::table(t.take_rows(&rows)));
    }
    match key {
        Value::Str(name) => Ok(Value::series(t.series(name)?)),
        Value::List(_) | Value::Tuple(_) => Ok(Value::table(t.select(&names_of(key)?)?)),
        Value::Slice(bounds) if bounds.is_positional() => {
            Ok(Value::table(t.take_rows(&bounds.positions(t.num_rows())?)))
        }
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Err(ScriptError::key(format!(
            "{} (select rows with .iloc or .loc)",
            key.repr()
        ))),
        other => Err(not_subscriptable_key(other)),
    }
}

fn not_subscriptable_key(key: &Value) -> ScriptError {
    ScriptError::type_error(format!("cannot index a table with '{}'", key.type_name()))
}

/// Rows or columns picked by a selector.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pick {
    One(usize),
    Many(Vec<usize>),
}

impl Pick {
    pub(crate) fn positions(&self) -> Vec<usize> {
        match self {
            Pick::One(p) => vec![*p],
            Pick::Many(ps) => ps.clone(),
        }
    }
}

/// `df.loc[key]` / `df.iloc[key]`.
pub fn loc(t: &Rc<Table>, key: &Value, positional: bool) -> ScriptResult<Value> {
    let (row_key, col_key) = split_loc_key(key);
    let rows = pick_rows(t, row_key, positional)?;
    let Some(col_key) = col_key else {
        return Ok(match rows {
            Pick::One(r) => Value::series(t.row(r)),
            Pick::Many(rs) => Value::table(t.take_rows(&rs)),
        });
    };
    let cols = pick_columns(t, col_key, positional)?;
    Ok(match (rows, cols) {
        (Pick::One(r), Pick::One(c)) => Value::from_cell(t.columns[c].values[r].clone()),
        (Pick::One(r), Pick::Many(cs)) => {
            let row = t.row(r);
            Value::series(row.take(&cs))
        }
        (Pick::Many(rs), Pick::One(c)) => Value::series(t.series(&t.columns[c].name)?.take(&rs)),
        (Pick::Many(rs), Pick::Many(cs)) => {
            let names: Vec<String> = cs.iter().map(|&c| t.columns[c].name.clone()).collect();
            Value::table(t.select(&names)?.take_rows(&rs))
        }
    })
}

fn split_loc_key(key: &Value) -> (&Value, Option<&Value>) {
    match key {
        Value::Tuple(parts) if parts.len() == 2 => (&parts[0], Some(&parts[1])),
        other => (other, None),
    }
}

fn pick_rows(t: &Table, key: &Value, positional: bool) -> ScriptResult<Pick> {
    let len = t.num_rows();
    if let Some(rows) = bool_mask(key, len)? {
        return Ok(Pick::Many(rows));
    }
    match key {
        Value::Slice(bounds) if positional => Ok(Pick::Many(bounds.positions(len)?)),
        Value::Slice(bounds) => label_slice(bounds, len, |label| t.label_position(label)),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|item| row_position(t, item, positional))
            .collect::<ScriptResult<Vec<_>>>()
            .map(Pick::Many),
        Value::Series(series) => series
            .values
            .iter()
            .map(|cell| row_position(t, &Value::from_cell(cell.clone()), positional))
            .collect::<ScriptResult<Vec<_>>>()
            .map(Pick::Many),
        scalar => row_position(t, scalar, positional).map(Pick::One),
    }
}

fn row_position(t: &Table, key: &Value, positional: bool) -> ScriptResult<usize> {
    if positional {
        let Value::Int(i) = key else {
            return Err(ScriptError::type_error(format!(
                "positional indexing needs integers, got '{}'",
                key.type_name()
            )));
        };
        return sequence_index(*i, t.num_rows());
    }
    t.label_position(&key.require_cell()?)
}

/// Resolve a possibly negative position.
pub(crate) fn sequence_index(i: i64, len: usize) -> ScriptResult<usize> {
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ScriptError::index(format!(
            "position {} is out of bounds for length {}",
            i, len
        )));
    }
    Ok(resolved as usize)
}

/// Label slices include their stop label.
pub(crate) fn label_slice(
    bounds: &SliceBounds,
    len: usize,
    position: impl Fn(&CellValue) -> ScriptResult<usize>,
) -> ScriptResult<Pick> {
    let resolve = |bound: &Option<Value>| -> ScriptResult<Option<usize>> {
        match bound {
            None | Some(Value::None) => Ok(None),
            Some(value) => position(&value.require_cell()?).map(Some),
        }
    };
    let start = resolve(&bounds.start)?.unwrap_or(0);
    let stop = match resolve(&bounds.stop)? {
        Some(stop) => stop + 1,
        None => len,
    };
    let step = match &bounds.step {
        None | Some(Value::None) => 1,
        Some(Value::Int(s)) if *s > 0 => *s as usize,
        Some(_) => return Err(ScriptError::value("label slices need a positive integer step")),
    };
    Ok(Pick::Many((start..stop.min(len)).step_by(step).collect()))
}

fn pick_columns(t: &Table, key: &Value, positional: bool) -> ScriptResult<Pick> {
    let count = t.num_columns();
    let position = |key: &Value| -> ScriptResult<usize> {
        match key {
            Value::Int(i) if positional => sequence_index(*i, count),
            Value::Str(name) if !positional => t
                .columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| missing_column(name)),
            other => Err(ScriptError::type_error(format!(
                "cannot select columns with '{}'",
                other.type_name()
            ))),
        }
    };
    if let Some(cols) = bool_mask(key, count)? {
        return Ok(Pick::Many(cols));
    }
    match key {
        Value::Slice(bounds) if positional => Ok(Pick::Many(bounds.positions(count)?)),
        Value::Slice(bounds) => label_slice(bounds, count, |label| match label {
            CellValue::Text(name) => position(&Value::Str(name.clone())),
            other => Err(ScriptError::type_error(format!("cannot slice columns by '{}'", other))),
        }),
        Value::List(items) | Value::Tuple(items) => {
            items.iter().map(&position).collect::<ScriptResult<Vec<_>>>().map(Pick::Many)
        }
        scalar => position(scalar).map(Pick::One),
    }
}

/// `df[name] = value`, returning the updated table.
pub fn set_item(t: &Rc<Table>, key: &Value, value: Value) -> ScriptResult<Table> {
    let Value::Str(name) = key else {
        return Err(ScriptError::unsupported(format!(
            "assigning to df[{}] is not supported; assign one column by name",
            key.repr()
        )));
    };
    let mut out = (**t).clone();
    let len = if out.columns.is_empty() && out.index.is_none() {
        natural_len(&value).unwrap_or(0)
    } else {
        out.num_rows()
    };
    out.set_column(Column::new(name.clone(), broadcast(&value, len)?))?;
    Ok(out)
}

/// `df.loc[rows, col] = value`.
pub fn set_loc(t: &Rc<Table>, key: &Value, value: Value, positional: bool) -> ScriptResult<Table> {
    let (row_key, col_key) = split_loc_key(key);
    let rows = pick_rows(t, row_key, positional)?.positions();
    let mut out = (**t).clone();
    let cols = match col_key {
        None => (0..out.num_columns()).collect(),
        Some(Value::Str(name)) if !positional && out.column(name).is_none() => {
            let nulls = vec![CellValue::Null; out.num_rows()];
            out.set_column(Column::new(name.clone(), nulls))?;
            vec![out.num_columns() - 1]
        }
        Some(col_key) => pick_columns(&out, col_key, positional)?.positions(),
    };
    let cells = broadcast(&value, rows.len())?;
    for c in cols {
        let column = &mut out.columns[c];
        let mut values = std::mem::take(&mut column.values);
        for (cell, &r) in cells.iter().zip(&rows) {
            values[r] = cell.clone();
        }
        *column = Column::new(column.name.clone(), values);
    }
    Ok(out)
}

/// `df.columns = [...]`.
pub fn with_column_names(t: &Rc<Table>, names: Vec<String>) -> ScriptResult<Table> {
    if names.len() != t.num_columns() {
        return Err(ScriptError::value(format!(
            "length mismatch: table has {} columns, {} names given",
            t.num_columns(),
            names.len()
        )));
    }
    let mut out = (**t).clone();
    for (column, name) in out.columns.iter_mut().zip(names) {
        column.name = name;
    }
    Ok(out)
}

fn natural_len(value: &Value) -> Option<usize> {
    match value {
        Value::Series(s) => Some(s.len()),
        Value::List(items) | Value::Tuple(items) => Some(items.len()),
        _ => None,
    }
}

/// Expand a value to `len` cells: sequences must match, scalars repeat.
pub(crate) fn broadcast(value: &Value, len: usize) -> ScriptResult<Vec<CellValue>> {
    let cells = match value {
        Value::Series(series) => series.values.clone(),
        Value::List(_) | Value::Tuple(_) | Value::Range { .. } => value
            .iterate()?
            .iter()
            .map(Value::require_cell)
            .collect::<ScriptResult<Vec<_>>>()?,
        Value::Table(_) => {
            return Err(ScriptError::type_error("cannot store a table in a single column"));
        }
        scalar => return Ok(vec![scalar.require_cell()?; len]),
    };
    if cells.len() != len {
        return Err(ScriptError::value(format!(
            "length of values ({}) does not match length of index ({})",
            cells.len(),
            len
        )));
    }
    Ok(cells)
}

/// Positions selected by a boolean series or list, if `key` is one.
pub(crate) fn bool_mask(key: &Value, len: usize) -> ScriptResult<Option<Vec<usize>>> {
    let flags: Vec<bool> = match key {
        Value::Series(series) if series.dtype == ColumnType::Boolean && !series.is_empty() => series
            .values
            .iter()
            .map(|v| matches!(v, CellValue::Bool(true)))
            .collect(),
        Value::List(items) if !items.is_empty() && items.iter().all(|v| matches!(v, Value::Bool(_))) => {
            items.iter().map(|v| matches!(v, Value::Bool(true))).collect()
        }
        _ => return Ok(None),
    };
    if flags.len() != len {
        return Err(ScriptError::index(format!(
            "boolean mask of length {} does not match {} rows",
            flags.len(),
            len
        )));
    }
    Ok(Some(
        flags.iter().enumerate().filter(|(_, keep)| **keep).map(|(i, _)| i).collect(),
    ))
}

/// Stable ordering of row positions by several keys. Nulls always sort last.
pub(crate) fn sort_positions(keys: &[&[CellValue]], ascending: &[bool]) -> Vec<usize> {
    let len = keys.first().map_or(0, |k| k.len());
    let mut rows: Vec<usize> = (0..len).collect();
    rows.sort_by(|&a, &b| {
        for (key, &asc) in keys.iter().zip(ascending) {
            let (x, y) = (&key[a], &key[b]);
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) if asc => x.total_cmp(y),
                (false, false) => y.total_cmp(x),
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
    rows
}

fn ascending_flags(args: &Args, count: usize) -> ScriptResult<Vec<bool>> {
    match args.get(1, "ascending") {
        None => Ok(vec![true; count]),
        Some(Value::List(flags)) if flags.len() == count => flags.iter().map(Value::truthy).collect(),
        Some(Value::List(_)) => Err(ScriptError::value("length of ascending does not match length of by")),
        Some(flag) => Ok(vec![flag.truthy()?; count]),
    }
}

pub(crate) fn edge_rows(len: usize, n: i64, head: bool) -> Vec<usize> {
    let take = if n >= 0 {
        (n as usize).min(len)
    } else {
        len.saturating_sub(n.unsigned_abs() as usize)
    };
    if head { (0..take).collect() } else { (len - take..len).collect() }
}

pub(crate) fn labelled_series(name: Option<String>, labels: Vec<CellValue>, values: Vec<CellValue>) -> Value {
    Value::series(Series::new(name, values).with_index(Some(Index::new(None, labels))))
}

fn reduce(t: &Table, agg: Agg, across_columns: bool) -> ScriptResult<Value> {
    let columns: Vec<&Column> = t.columns.iter().filter(|c| agg.applies_to(c.dtype)).collect();
    if across_columns {
        let values = (0..t.num_rows())
            .map(|r| {
                let row: Vec<CellValue> = columns.iter().map(|c| c.values[r].clone()).collect();
                agg.apply(&row)
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        return Ok(Value::series(Series::new(None, values).with_index(t.index.clone())));
    }
    let labels = columns.iter().map(|c| CellValue::Text(c.name.clone())).collect();
    let values = columns
        .iter()
        .map(|c| agg.apply(&c.values))
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(labelled_series(None, labels, values))
}

/// Resolve an aggregation named by a string or a builtin.
pub(crate) fn agg_of(value: &Value) -> ScriptResult<Agg> {
    let agg = match value {
        Value::Str(name) => Agg::from_name(name),
        Value::Builtin(Builtin::Sum) => Some(Agg::Sum),
        Value::Builtin(Builtin::Min) => Some(Agg::Min),
        Value::Builtin(Builtin::Max) => Some(Agg::Max),
        Value::Builtin(Builtin::Len) => Some(Agg::Size),
        _ => None,
    };
    agg.ok_or_else(|| {
        ScriptError::value(format!("{} is not a supported aggregation", value.repr()))
    })
}

fn aggregate(t: &Table, func: &Value) -> ScriptResult<Value> {
    match func {
        Value::List(funcs) => {
            let aggs = funcs.iter().map(agg_of).collect::<ScriptResult<Vec<_>>>()?;
            let columns = t
                .columns
                .iter()
                .filter(|c| aggs.iter().all(|a| a.applies_to(c.dtype)))
                .map(|c| {
                    let values = aggs.iter().map(|a| a.apply(&c.values)).collect::<ScriptResult<Vec<_>>>()?;
                    Ok(Column::new(c.name.clone(), values))
                })
                .collect::<ScriptResult<Vec<_>>>()?;
            let labels = aggs.iter().map(|a| CellValue::Text(a.name().to_string())).collect();
            Ok(Value::table(Table::new(columns, Some(Index::new(None, labels)))))
        }
        Value::Dict(entries) => {
            let mut labels = Vec::new();
            let mut values = Vec::new();
            for (column, func) in entries {
                let column = column
                    .as_str()
                    .ok_or_else(|| ScriptError::type_error("aggregation keys must be column names"))?;
                labels.push(CellValue::Text(column.to_string()));
                values.push(agg_of(func)?.apply(&t.require_column(column)?.values)?);
            }
            Ok(labelled_series(None, labels, values))
        }
        single => reduce(t, agg_of(single)?, false),
    }
}

fn describe(t: &Table) -> ScriptResult<Table> {
    let numeric: Vec<&Column> = t.numeric_columns().collect();
    if numeric.is_empty() {
        let labels = ["count", "unique", "top", "freq"]
            .iter()
            .map(|s| CellValue::Text(s.to_string()))
            .collect();
        let columns = t
            .columns
            .iter()
            .map(|c| {
                let counts = super::series::count_values(&c.values);
                let (top, freq) = counts.first().cloned().unwrap_or((CellValue::Null, 0));
                let values = vec![
                    Agg::Count.apply(&c.values)?,
                    CellValue::Int(counts.len() as i64),
                    top,
                    CellValue::Int(freq as i64),
                ];
                Ok(Column::new(c.name.clone(), values))
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        return Ok(Table::new(columns, Some(Index::new(None, labels))));
    }
    let labels = DESCRIBE_ROWS.iter().map(|s| CellValue::Text(s.to_string())).collect();
    let columns = numeric
        .iter()
        .map(|c| Column::new(c.name.clone(), describe_values(&c.values)))
        .collect();
    Ok(Table::new(columns, Some(Index::new(None, labels))))
}

pub(crate) const DESCRIBE_ROWS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

pub(crate) fn describe_values(values: &[CellValue]) -> Vec<CellValue> {
    let xs: Vec<f64> = values.iter().filter_map(CellValue::as_f64).collect();
    let float = |x: Option<f64>| x.map_or(CellValue::Null, CellValue::Float);
    vec![
        CellValue::Float(xs.len() as f64),
        float(agg::mean(&xs)),
        float(agg::variance(&xs).map(f64::sqrt)),
        float(xs.iter().copied().reduce(f64::min)),
        float(agg::quantile(&xs, 0.25)),
        float(agg::quantile(&xs, 0.5)),
        float(agg::quantile(&xs, 0.75)),
        float(xs.iter().copied().reduce(f64::max)),
    ]
}

fn corr(t: &Table) -> ScriptResult<Table> {
    let numeric: Vec<&Column> = t.numeric_columns().collect();
    let labels = numeric.iter().map(|c| CellValue::Text(c.name.clone())).collect();
    let columns = numeric
        .iter()
        .map(|a| {
            let values = numeric
                .iter()
                .map(|b| agg::pearson(&a.values, &b.values).map_or(CellValue::Null, CellValue::Float))
                .collect();
            Column::new(a.name.clone(), values)
        })
        .collect();
    Ok(Table::new(columns, Some(Index::new(None, labels))))
}

fn drop(t: &Table, args: &Args) -> ScriptResult<Table> {
    if let Some(columns) = args.names(usize::MAX, "columns")? {
        return drop_columns(t, &columns);
    }
    if let Some(labels) = args.keyword("index") {
        return drop_rows(t, labels);
    }
    let target = args.require(0, "labels", "drop")?;
    if args.axis_is_columns(1)? {
        drop_columns(t, &names_of(target)?)
    } else {
        drop_rows(t, target)
    }
}

fn drop_columns(t: &Table, names: &[String]) -> ScriptResult<Table> {
    for name in names {
        t.require_column(name)?;
    }
    let keep: Vec<String> = t.column_names().into_iter().filter(|n| !names.contains(n)).collect();
    t.select(&keep)
}

fn drop_rows(t: &Table, labels: &Value) -> ScriptResult<Table> {
    let labels = match labels {
        Value::List(items) | Value::Tuple(items) => items.clone(),
        single => vec![single.clone()],
    };
    let mut dropped = Vec::new();
    for label in &labels {
        dropped.push(t.label_position(&label.require_cell()?)?);
    }
    let rows: Vec<usize> = (0..t.num_rows()).filter(|r| !dropped.contains(r)).collect();
    Ok(t.take_rows(&rows))
}

fn rename(t: &Table, args: &Args) -> ScriptResult<Table> {
    let mapping = match (args.keyword("columns"), args.positional.first()) {
        (Some(mapping), _) => mapping,
        (None, Some(mapping)) if args.axis_is_columns(1)? || args.keyword("index").is_none() => mapping,
        _ => return Ok(t.clone()),
    };
    let Value::Dict(entries) = mapping else {
        return Err(ScriptError::type_error("rename() expects a dict of old to new names"));
    };
    let mut out = t.clone();
    for column in &mut out.columns {
        if let Some((_, new)) = entries.iter().find(|(old, _)| old.as_str() == Some(column.name.as_str())) {
            column.name = new.to_text();
        }
    }
    Ok(out)
}

fn fillna(t: &Table, value: &Value) -> ScriptResult<Table> {
    let mut out = t.clone();
    for column in &mut out.columns {
        let fill = match value {
            Value::Dict(entries) => match entries.iter().find(|(k, _)| k.as_str() == Some(column.name.as_str())) {
                Some((_, v)) => v.require_cell()?,
                None => continue,
            },
            other => other.require_cell()?,
        };
        let values = column
            .values
            .iter()
            .map(|v| if v.is_null() { fill.clone() } else { v.clone() })
            .collect();
        *column = Column::new(column.name.clone(), values);
    }
    Ok(out)
}

fn reset_index(t: &Table, drop: bool) -> ScriptResult<Table> {
    let mut out = t.clone();
    if let (Some(index), false) = (out.index.take(), drop) {
        let name = index.name.clone().unwrap_or_else(|| "index".to_string());
        out.columns.insert(0, Column::new(name, index.labels));
    }
    Ok(out)
}

fn dtype_matches(spec: &str, dtype: ColumnType) -> bool {
    match spec {
        "number" | "numeric" | "int" | "int64" | "int32" | "float" | "float64" | "float32" => {
            dtype == ColumnType::Numeric
        }
        "object" | "str" | "string" | "category" | "text" => dtype == ColumnType::Text,
        "datetime" | "datetime64" | "datetime64[ns]" | "timestamp" => dtype == ColumnType::Timestamp,
        "bool" | "boolean" => dtype == ColumnType::Boolean,
        _ => false,
    }
}

fn select_dtypes(t: &Table, args: &Args) -> ScriptResult<Table> {
    let include = args.names(0, "include")?;
    let exclude = args.names(1, "exclude")?.unwrap_or_default();
    let keep: Vec<String> = t
        .columns
        .iter()
        .filter(|c| {
            let included = include
                .as_ref()
                .is_none_or(|specs| specs.iter().any(|s| dtype_matches(s, c.dtype)));
            included && !exclude.iter().any(|s| dtype_matches(s, c.dtype))
        })
        .map(|c| c.name.clone())
        .collect();
    t.select(&keep)
}

fn map_cells(t: &Table, f: impl Fn(&CellValue) -> ScriptResult<CellValue>) -> ScriptResult<Table> {
    let columns = t
        .columns
        .iter()
        .map(|c| {
            let values = c.values.iter().map(&f).collect::<ScriptResult<Vec<_>>>()?;
            Ok(Column::new(c.name.clone(), values))
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(Table::new(columns, t.index.clone()))
}

fn distinct_rows(t: &Table, subset: &[String], keep_last: bool) -> ScriptResult<Vec<usize>> {
    let columns = subset
        .iter()
        .map(|n| t.require_column(n))
        .collect::<ScriptResult<Vec<_>>>()?;
    let same = |a: usize, b: usize| columns.iter().all(|c| cells_equal(&c.values[a], &c.values[b]));
    let len = t.num_rows();
    let rows: Vec<usize> = (0..len)
        .filter(|&r| {
            if keep_last {
                !(r + 1..len).any(|later| same(r, later))
            } else {
                !(0..r).any(|earlier| same(r, earlier))
            }
        })
        .collect();
    Ok(rows)
}

fn pivot_table(t: &Rc<Table>, args: &Args) -> ScriptResult<Table> {
    let index = args
        .names(usize::MAX, "index")?
        .ok_or_else(|| ScriptError::type_error("pivot_table() missing required argument: 'index'"))?;
    let columns_key = args.str(usize::MAX, "columns")?;
    let aggfunc = match args.keyword("aggfunc") {
        Some(func) => agg_of(func)?,
        None => Agg::Mean,
    };
    let fill = args.keyword("fill_value").map(Value::require_cell).transpose()?;
    let values = match args.names(0, "values")? {
        Some(values) => values,
        None => t
            .numeric_columns()
            .map(|c| c.name.clone())
            .filter(|n| !index.contains(n) && Some(n) != columns_key.as_ref())
            .collect(),
    };
    let grouped = GroupBy::new(t.clone(), index.clone())?;
    let groups = grouped.groups();

    let pivot_keys: Vec<CellValue> = match &columns_key {
        Some(key) => {
            let column = t.require_column(key)?;
            let mut keys: Vec<CellValue> = Vec::new();
            for v in column.values.iter().filter(|v| !v.is_null()) {
                if !keys.iter().any(|k| cells_equal(k, v)) {
                    keys.push(v.clone());
                }
            }
            keys.sort_by(|a, b| a.total_cmp(b));
            keys
        }
        None => Vec::new(),
    };

    let mut out = Vec::new();
    for value_name in &values {
        let value_column = t.require_column(value_name)?;
        let cell_for = |rows: &[usize]| -> ScriptResult<CellValue> {
            let cells: Vec<CellValue> = rows.iter().map(|&r| value_column.values[r].clone()).collect();
            let cell = if cells.is_empty() { CellValue::Null } else { aggfunc.apply(&cells)? };
            Ok(match (&fill, cell.is_null()) {
                (Some(fill), true) => fill.clone(),
                _ => cell,
            })
        };
        match &columns_key {
            None => {
                let cells = groups
                    .iter()
                    .map(|(_, rows)| cell_for(rows))
                    .collect::<ScriptResult<Vec<_>>>()?;
                out.push(Column::new(value_name.clone(), cells));
            }
            Some(key) => {
                let key_column = t.require_column(key)?;
                for pivot in &pivot_keys {
                    let cells = groups
                        .iter()
                        .map(|(_, rows)| {
                            let matching: Vec<usize> = rows
                                .iter()
                                .copied()
                                .filter(|&r| cells_equal(&key_column.values[r], pivot))
                                .collect();
                            cell_for(&matching)
                        })
                        .collect::<ScriptResult<Vec<_>>>()?;
                    let name = if values.len() == 1 {
                        pivot.to_string()
                    } else {
                        format!("{}_{}", value_name, pivot)
                    };
                    out.push(Column::new(name, cells));
                }
            }
        }
    }
    Ok(Table::new(out, Some(group_index(&index, &groups))))
}

/// Index built from group keys; multi-key labels are joined with `, `.
pub(crate) fn group_index(keys: &[String], groups: &[(Vec<CellValue>, Vec<usize>)]) -> Index {
    let labels = groups
        .iter()
        .map(|(key, _)| match key.as_slice() {
            [single] => single.clone(),
            many => CellValue::Text(many.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", ")),
        })
        .collect();
    Index::new(Some(keys.join(", ")), labels)
}

fn apply(interp: &mut Interpreter, t: &Rc<Table>, func: &Value, across_columns: bool) -> ScriptResult<Value> {
    if across_columns {
        let mut cells = Vec::with_capacity(t.num_rows());
        for r in 0..t.num_rows() {
            let row = Value::series(t.row(r));
            let result = interp.call(func, Args::positional(vec![row]))?;
            cells.push(result.to_cell().ok_or_else(|| {
                ScriptError::unsupported("apply(axis=1) must return a scalar per row")
            })?);
        }
        return Ok(Value::series(Series::new(None, cells).with_index(t.index.clone())));
    }
    let mut labels = Vec::new();
    let mut results = Vec::new();
    for column in &t.columns {
        let series = Value::series(t.series(&column.name)?);
        labels.push(CellValue::Text(column.name.clone()));
        results.push(interp.call(func, Args::positional(vec![series]))?);
    }
    if results.iter().all(|r| matches!(r, Value::Series(_))) && !results.is_empty() {
        let mut index = None;
        let mut columns = Vec::new();
        for (column, result) in t.columns.iter().zip(results) {
            if let Value::Series(s) = result {
                index = s.index.clone();
                let mut col = (*s).clone().into_column(&column.name);
                col.name = column.name.clone();
                columns.push(col);
            }
        }
        return Ok(Value::table(Table::new(columns, index)));
    }
    let cells = results
        .iter()
        .map(Value::require_cell)
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(labelled_series(None, labels, cells))
}

/// Convert cells to the type named by `dtype` (`'int'`, `'float'`, `str`, ...).
pub(crate) fn cast_cells(values: &[CellValue], dtype: &Value) -> ScriptResult<Vec<CellValue>> {
    let target = match dtype {
        Value::Str(s) => s.to_lowercase(),
        Value::Builtin(b) => b.name().to_string(),
        other => {
            return Err(ScriptError::type_error(format!(
                "data type '{}' not understood",
                other.type_name()
            )));
        }
    };
    values
        .iter()
        .map(|cell| {
            if cell.is_null() {
                return Ok(CellValue::Null);
            }
            let converted = match target.as_str() {
                "int" | "int64" | "int32" | "integer" => match cell {
                    CellValue::Int(i) => Some(CellValue::Int(*i)),
                    CellValue::Bool(b) => Some(CellValue::Int(i64::from(*b))),
                    CellValue::Float(x) => Some(CellValue::Int(x.trunc() as i64)),
                    CellValue::Text(s) => s.trim().parse::<i64>().ok().map(CellValue::Int),
                    CellValue::Timestamp(ms) => Some(CellValue::Int(*ms)),
                    CellValue::Null => None,
                },
                "float" | "float64" | "float32" | "number" => match cell {
                    CellValue::Text(s) => s.trim().parse::<f64>().ok().map(CellValue::Float),
                    other => other.as_f64().map(CellValue::Float),
                },
                "str" | "string" | "object" | "category" => Some(CellValue::Text(cell.to_string())),
                "bool" | "boolean" => Some(CellValue::Bool(cell_truthy(cell))),
                "datetime64" | "datetime64[ns]" | "datetime" => match cell {
                    CellValue::Timestamp(ms) => Some(CellValue::Timestamp(*ms)),
                    CellValue::Text(s) => parse_timestamp(s).map(CellValue::Timestamp),
                    _ => None,
                },
                _ => {
                    return Err(ScriptError::type_error(format!("data type '{}' not understood", target)));
                }
            };
            converted.ok_or_else(|| {
                ScriptError::value(format!("cannot convert '{}' to {}", cell, target))
            })
        })
        .collect()
}

pub(crate) fn cell_truthy(cell: &CellValue) -> bool {
    match cell {
        CellValue::Null => false,
        CellValue::Bool(b) => *b,
        CellValue::Int(i) => *i != 0,
        CellValue::Float(x) => *x != 0.0 && !x.is_nan(),
        CellValue::Text(s) => !s.is_empty(),
        CellValue::Timestamp(_) => true,
    }
}

pub(crate) fn abs_cell(cell: &CellValue) -> CellValue {
    match cell {
        CellValue::Int(i) => CellValue::Int(i.saturating_abs()),
        CellValue::Float(x) => CellValue::Float(x.abs()),
        other => other.clone(),
    }
}

pub(crate) fn cumulative_sum(values: &[CellValue]) -> ScriptResult<Vec<CellValue>> {
    let mut acc = CellValue::Int(0);
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        if v.is_null() {
            out.push(CellValue::Null);
            continue;
        }
        acc = super::ops::cell_binary(crate::script::ast::BinOp::Add, &acc, v)?;
        out.push(acc.clone());
    }
    Ok(out)
}

/// Position of the first maximum (or minimum), skipping nulls.
pub(crate) fn extreme_position(values: &[CellValue], want_max: bool) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_null() {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) => {
                let ordering = v.total_cmp(&values[b]);
                if want_max { ordering.is_gt() } else { ordering.is_lt() }
            }
        };
        if better {
            best = Some(i);
        }
    }
    best
}

fn to_dict(t: &Table, orient: &str) -> ScriptResult<Value> {
    let cell = |c: &Column, r: usize| Value::from_cell(c.values[r].clone());
    match orient {
        "records" => Ok(Value::List(
            (0..t.num_rows())
                .map(|r| {
                    Value::Dict(t.columns.iter().map(|c| (Value::Str(c.name.clone()), cell(c, r))).collect())
                })
                .collect(),
        )),
        "list" => Ok(Value::Dict(
            t.columns
                .iter()
                .map(|c| {
                    let items = (0..t.num_rows()).map(|r| cell(c, r)).collect();
                    (Value::Str(c.name.clone()), Value::List(items))
                })
                .collect(),
        )),
        "dict" => Ok(Value::Dict(
            t.columns
                .iter()
                .map(|c| {
                    let inner = (0..t.num_rows())
                        .map(|r| (Value::from_cell(t.row_label(r)), cell(c, r)))
                        .collect();
                    (Value::Str(c.name.clone()), Value::Dict(inner))
                })
                .collect(),
        )),
        other => Err(ScriptError::value(format!("orient '{}' not understood", other))),
    }
}

fn merge(t: &Table, args: &Args) -> ScriptResult<Table> {
    let right = match args.require(0, "right", "merge")? {
        Value::Table(right) => right.clone(),
        other => {
            return Err(ScriptError::type_error(format!(
                "can only merge with a DataFrame, not '{}'",
                other.type_name()
            )));
        }
    };
    let how = args.str(1, "how")?.unwrap_or_else(|| "inner".to_string());
    if how != "inner" && how != "left" {
        return Err(ScriptError::unsupported(format!("merge how='{}' is not supported", how)));
    }
    let on = match args.names(usize::MAX, "on")? {
        Some(on) => on,
        None => t
            .column_names()
            .into_iter()
            .filter(|n| right.column(n).is_some())
            .collect(),
    };
    if on.is_empty() {
        return Err(ScriptError::value("no common columns to merge on"));
    }
    let left_keys = on.iter().map(|k| t.require_column(k)).collect::<ScriptResult<Vec<_>>>()?;
    let right_keys = on.iter().map(|k| right.require_column(k)).collect::<ScriptResult<Vec<_>>>()?;

    let mut pairs: Vec<(usize, Option<usize>)> = Vec::new();
    for l in 0..t.num_rows() {
        let mut matched = false;
        for r in 0..right.num_rows() {
            let equal = left_keys
                .iter()
                .zip(&right_keys)
                .all(|(a, b)| !a.values[l].is_null() && cells_equal(&a.values[l], &b.values[r]));
            if equal {
                pairs.push((l, Some(r)));
                matched = true;
            }
        }
        if !matched && how == "left" {
            pairs.push((l, None));
        }
    }

    let right_extra: Vec<&Column> = right.columns.iter().filter(|c| !on.contains(&c.name)).collect();
    let clash = |name: &str| right_extra.iter().any(|c| c.name == name) && !on.iter().any(|k| k == name);
    let mut columns = Vec::new();
    for c in &t.columns {
        let name = if clash(&c.name) { format!("{}_x", c.name) } else { c.name.clone() };
        columns.push(Column::new(name, pairs.iter().map(|(l, _)| c.values[*l].clone()).collect()));
    }
    for c in right_extra {
        let name = if t.column(&c.name).is_some() { format!("{}_y", c.name) } else { c.name.clone() };
        let values = pairs
            .iter()
            .map(|(_, r)| r.map_or(CellValue::Null, |r| c.values[r].clone()))
            .collect();
        columns.push(Column::new(name, values));
    }
    Ok(Table::new(columns, None))
}

fn query(interp: &mut Interpreter, t: &Rc<Table>, text: &str) -> ScriptResult<Table> {
    let program = parse(text)?;
    let expr = match program.statements.as_slice() {
        [stmt] => match &stmt.kind {
            StmtKind::Expr(expr) => expr,
            _ => return Err(ScriptError::value("query() expects a single expression")),
        },
        _ => return Err(ScriptError::value("query() expects a single expression")),
    };
    let bindings = t
        .columns
        .iter()
        .map(|c| Ok((c.name.clone(), Value::series(t.series(&c.name)?))))
        .collect::<ScriptResult<Vec<_>>>()?;
    let mask = interp.eval_with(expr, bindings)?;
    match bool_mask(&mask, t.num_rows())? {
        Some(rows) => Ok(t.take_rows(&rows)),
        None => Err(ScriptError::value("query() expression must produce a boolean mask")),
    }
}

fn transpose(t: &Table) -> Table {
    let columns = (0..t.num_rows())
        .map(|r| {
            let values = t.columns.iter().map(|c| c.values[r].clone()).collect();
            Column::new(t.row_label(r).to_string(), values)
        })
        .collect();
    let labels = t.columns.iter().map(|c| CellValue::Text(c.name.clone())).collect();
    Table::new(columns, Some(Index::new(None, labels)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnSnapshot, DatasetSnapshot};

    fn sales() -> Rc<Table> {
        let snapshot = DatasetSnapshot::new(vec![
            ColumnSnapshot::text("region", ["north", "south", "north", "east"]),
            ColumnSnapshot::numeric("sales", [10.0, 30.0, 20.0, 5.0]),
        ])
        .unwrap();
        Rc::new(Table::from_snapshot(snapshot))
    }

    fn run(t: &Rc<Table>, name: &str, args: Args) -> Value {
        let mut interp = Interpreter::new(Table::default());
        call(&mut interp, t, name, args).unwrap()
    }

    fn kw(name: &str, value: Value) -> Args {
        Args::new(Vec::new(), vec![(name.to_string(), value)])
    }

    #[test]
    fn test_head_and_negative_tail() {
        let t = sales();
        let Value::Table(head) = run(&t, "head", Args::positional(vec![Value::Int(2)])) else {
            panic!("expected a table");
        };
        assert_eq!(head.num_rows(), 2);
        assert_eq!(edge_rows(4, -1, false), vec![1, 2, 3]);
    }

    #[test]
    fn test_sort_values_descending_keeps_nulls_last() {
        let keys = vec![CellValue::Int(2), CellValue::Null, CellValue::Int(5)];
        assert_eq!(sort_positions(&[keys.as_slice()], &[false]), vec![2, 0, 1]);
        assert_eq!(sort_positions(&[keys.as_slice()], &[true]), vec![0, 2, 1]);
    }

    #[test]
    fn test_mask_filtering() {
        let t = sales();
        let mask = Value::series(Series::new(
            None,
            vec![CellValue::Bool(true), CellValue::Bool(false), CellValue::Bool(true), CellValue::Bool(false)],
        ));
        let Value::Table(filtered) = subscript(&t, &mask).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(filtered.num_rows(), 2);
        assert!(filtered.index.is_none());
        let short = Value::List(vec![Value::Bool(true)]);
        assert!(subscript(&t, &short).is_err());
    }

    #[test]
    fn test_missing_column_is_key_error() {
        let err = subscript(&sales(), &Value::str("profit")).unwrap_err();
        assert_eq!(err.class, crate::script::ErrorClass::Key);
    }

    #[test]
    fn test_loc_label_slice_is_inclusive() {
        let t = sales();
        let key = Value::Slice(Box::new(SliceBounds {
            start: Some(Value::Int(1)),
            stop: Some(Value::Int(2)),
            step: None,
        }));
        let Value::Table(rows) = loc(&t, &key, false).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(rows.num_rows(), 2);
        let Value::Table(rows) = loc(&t, &key, true).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(rows.num_rows(), 1);
    }

    #[test]
    fn test_loc_cell() {
        let t = sales();
        let key = Value::Tuple(vec![Value::Int(1), Value::str("sales")]);
        assert!(matches!(loc(&t, &key, false).unwrap(), Value::Int(30)));
        let key = Value::Tuple(vec![Value::Int(-1), Value::Int(0)]);
        assert_eq!(loc(&t, &key, true).unwrap().as_str(), Some("east"));
    }

    #[test]
    fn test_set_item_broadcasts_scalar_and_checks_length() {
        let t = sales();
        let updated = set_item(&t, &Value::str("flag"), Value::Bool(true)).unwrap();
        assert_eq!(updated.num_columns(), 3);
        let short = Value::List(vec![Value::Int(1)]);
        assert!(set_item(&t, &Value::str("bad"), short).is_err());
    }

    #[test]
    fn test_set_loc_adds_column() {
        let t = sales();
        let key = Value::Tuple(vec![Value::Int(0), Value::str("note")]);
        let updated = set_loc(&t, &key, Value::str("best"), false).unwrap();
        let note = updated.column("note").unwrap();
        assert_eq!(note.values[0], CellValue::Text("best".into()));
        assert!(note.values[1].is_null());
    }

    #[test]
    fn test_reduce_skips_text_columns() {
        let Value::Series(means) = run(&sales(), "mean", Args::default()) else {
            panic!("expected a series");
        };
        assert_eq!(means.len(), 1);
        assert_eq!(means.values[0], CellValue::Float(16.25));
    }

    #[test]
    fn test_describe_rows() {
        let described = describe(&sales()).unwrap();
        assert_eq!(described.num_rows(), 8);
        assert_eq!(described.row_label(0), CellValue::Text("count".into()));
        assert_eq!(described.column("sales").unwrap().values[0], CellValue::Float(4.0));
    }

    #[test]
    fn test_corr_diagonal_is_one() {
        let t = sales();
        let mut with_double = (*t).clone();
        let doubled = t.column("sales").unwrap().values.iter().map(|v| CellValue::Float(v.as_f64().unwrap() * 2.0)).collect();
        with_double.set_column(Column::new("double", doubled)).unwrap();
        let matrix = corr(&with_double).unwrap();
        assert_eq!(matrix.num_columns(), 2);
        let CellValue::Float(r) = matrix.column("double").unwrap().values[0] else {
            panic!("expected a coefficient");
        };
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rename_and_drop() {
        let t = sales();
        let mapping = Value::Dict(vec![(Value::str("sales"), Value::str("revenue"))]);
        let Value::Table(renamed) = run(&t, "rename", kw("columns", mapping)) else {
            panic!("expected a table");
        };
        assert_eq!(renamed.column_names(), vec!["region", "revenue"]);
        let Value::Table(dropped) = run(&t, "drop", kw("columns", Value::str("region"))) else {
            panic!("expected a table");
        };
        assert_eq!(dropped.column_names(), vec!["sales"]);
    }

    #[test]
    fn test_pivot_table() {
        let t = sales();
        let args = Args::new(
            Vec::new(),
            vec![
                ("index".to_string(), Value::str("region")),
                ("values".to_string(), Value::str("sales")),
                ("aggfunc".to_string(), Value::str("sum")),
            ],
        );
        let Value::Table(pivot) = run(&t, "pivot_table", args) else {
            panic!("expected a table");
        };
        assert_eq!(pivot.num_rows(), 3);
        assert_eq!(pivot.row_label(0), CellValue::Text("east".into()));
        assert_eq!(pivot.column("sales").unwrap().values[1], CellValue::Int(30));
    }

    #[test]
    fn test_query_filters_rows() {
        let t = sales();
        let Value::Table(rows) = run(&t, "query", Args::positional(vec![Value::str("sales > 12")])) else {
            panic!("expected a table");
        };
        assert_eq!(rows.num_rows(), 2);
    }

    #[test]
    fn test_merge_inner_and_left() {
        let left = sales();
        let right = Table::new(
            vec![
                Column::new("region", vec![CellValue::Text("north".into())]),
                Column::new("manager", vec![CellValue::Text("ana".into())]),
            ],
            None,
        );
        let args = Args::positional(vec![Value::table(right.clone())]);
        let Value::Table(inner) = run(&left, "merge", args) else {
            panic!("expected a table");
        };
        assert_eq!(inner.num_rows(), 2);
        let args = Args::positional(vec![Value::table(right), Value::str("left")]);
        let Value::Table(outer) = run(&left, "merge", args) else {
            panic!("expected a table");
        };
        assert_eq!(outer.num_rows(), 4);
        assert!(outer.column("manager").unwrap().values[1].is_null());
    }

    #[test]
    fn test_astype_rejects_bad_text() {
        let values = vec![CellValue::Text("12".into()), CellValue::Text("x".into())];
        assert!(cast_cells(&values, &Value::str("int")).is_err());
        let values = vec![CellValue::Float(2.7)];
        assert_eq!(cast_cells(&values, &Value::str("int")).unwrap(), vec![CellValue::Int(2)]);
    }
}
