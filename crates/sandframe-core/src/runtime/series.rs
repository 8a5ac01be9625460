//! Series properties, methods and indexing.

use std::rc::Rc;

use crate::dataset::CellValue;
use crate::script::ast::{BinOp, CmpOp};
use crate::script::{ScriptError, ScriptResult};

use super::agg::{self, Agg};
use super::args::Args;
use super::builtins::round_float;
use super::frame::{Column, Index, Series, Table, cells_equal};
use super::interp::Interpreter;
use super::ops;
use super::table::{
    DESCRIBE_ROWS, Pick, abs_cell, agg_of, bool_mask, broadcast, cast_cells, cell_truthy,
    cumulative_sum, describe_values, edge_rows, extreme_position, label_slice, labelled_series,
    sequence_index, sort_positions,
};
use super::value::{AccessorKind, Value};

const METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "std", "var", "nunique", "prod", "product",
    "first", "last", "unique", "value_counts", "sort_values", "sort_index", "head", "tail",
    "idxmax", "idxmin", "round", "abs", "isna", "isnull", "notna", "notnull", "fillna", "dropna",
    "astype", "apply", "map", "between", "isin", "tolist", "to_list", "reset_index", "cumsum",
    "quantile", "describe", "any", "all", "to_frame", "nlargest", "nsmallest", "corr", "copy",
    "rename", "diff", "pct_change", "shift", "drop_duplicates", "clip", "replace", "to_dict",
    "item", "agg", "aggregate", "to_string",
];

pub fn attribute(s: &Rc<Series>, name: &str) -> ScriptResult<Option<Value>> {
    let this = || Box::new(Value::Series(s.clone()));
    let value = match name {
        "name" => s.name.clone().map_or(Value::None, Value::Str),
        "shape" => Value::Tuple(vec![Value::Int(s.len() as i64)]),
        "size" => Value::Int(s.len() as i64),
        "ndim" => Value::Int(1),
        "empty" => Value::Bool(s.is_empty()),
        "dtype" => Value::str(s.dtype.name()),
        "values" => Value::List(values_of(s)),
        "index" => Value::List(s.labels().into_iter().map(Value::from_cell).collect()),
        "str" => Value::Accessor(AccessorKind::Str, this()),
        "dt" => Value::Accessor(AccessorKind::Dt, this()),
        "plot" => Value::Accessor(AccessorKind::Plot, this()),
        "loc" => Value::Accessor(AccessorKind::Loc, this()),
        "iloc" => Value::Accessor(AccessorKind::ILoc, this()),
        _ if METHODS.contains(&name) => Value::Method(this(), name.to_string()),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn values_of(s: &Series) -> Vec<Value> {
    s.values.iter().cloned().map(Value::from_cell).collect()
}

fn derived(s: &Series, values: Vec<CellValue>) -> Series {
    Series::new(s.name.clone(), values).with_index(s.index.clone())
}

pub fn call(interp: &mut Interpreter, s: &Rc<Series>, name: &str, args: Args) -> ScriptResult<Value> {
    if let Some(agg) = Agg::from_name(name) {
        return Ok(Value::from_cell(agg.apply(&s.values)?));
    }
    let series = match name {
        "unique" => {
            let mut seen: Vec<CellValue> = Vec::new();
            for v in &s.values {
                let key = if v.is_null() { CellValue::Null } else { v.clone() };
                if !seen.iter().any(|x| cells_equal(x, &key)) {
                    seen.push(key);
                }
            }
            return Ok(Value::List(seen.into_iter().map(Value::from_cell).collect()));
        }
        "value_counts" => {
            let normalize = args.bool_or(usize::MAX, "normalize", false)?;
            let ascending = args.bool_or(usize::MAX, "ascending", false)?;
            let mut counts = count_values(&s.values);
            if ascending {
                counts.sort_by_key(|(_, n)| *n);
            }
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            let labels = counts.iter().map(|(v, _)| v.clone()).collect();
            let values = counts
                .iter()
                .map(|(_, n)| {
                    if normalize {
                        CellValue::Float(*n as f64 / total.max(1) as f64)
                    } else {
                        CellValue::Int(*n as i64)
                    }
                })
                .collect();
            let name = if normalize { "proportion" } else { "count" };
            let mut out = Series::new(Some(name.to_string()), values);
            out.index = Some(Index::new(s.name.clone(), labels));
            out
        }
        "sort_values" => {
            let ascending = args.bool_or(0, "ascending", true)?;
            s.take(&sort_positions(&[s.values.as_slice()], &[ascending]))
        }
        "sort_index" => {
            let ascending = args.bool_or(0, "ascending", true)?;
            let labels = s.labels();
            s.take(&sort_positions(&[labels.as_slice()], &[ascending]))
        }
        "head" | "tail" => {
            let n = args.int_or(0, "n", 5)?;
            s.take(&edge_rows(s.len(), n, name == "head"))
        }
        "idxmax" | "idxmin" => {
            return match extreme_position(&s.values, name == "idxmax") {
                Some(row) => Ok(Value::from_cell(s.label(row))),
                None => Err(ScriptError::value(format!("attempt to get {} of an empty sequence", name))),
            };
        }
        "round" => {
            let decimals = args.int_or(0, "decimals", 0)?;
            let values = s
                .values
                .iter()
                .map(|cell| match cell {
                    CellValue::Float(x) => CellValue::Float(round_float(*x, decimals)),
                    other => other.clone(),
                })
                .collect();
            derived(s, values)
        }
        "abs" => derived(s, s.values.iter().map(abs_cell).collect()),
        "cumsum" => derived(s, cumulative_sum(&s.values)?),
        "isna" | "isnull" | "notna" | "notnull" => {
            let want_null = name.starts_with("isn");
            derived(s, s.values.iter().map(|v| CellValue::Bool(v.is_null() == want_null)).collect())
        }
        "fillna" => {
            let fill = args.require(0, "value", name)?.require_cell()?;
            let values = s
                .values
                .iter()
                .map(|v| if v.is_null() { fill.clone() } else { v.clone() })
                .collect();
            derived(s, values)
        }
        "dropna" => {
            let rows: Vec<usize> = (0..s.len()).filter(|&r| !s.values[r].is_null()).collect();
            s.take(&rows)
        }
        "astype" => derived(s, cast_cells(&s.values, args.require(0, "dtype", name)?)?),
        "apply" | "map" => {
            let func = args.require(0, "func", name)?.clone();
            let mut values = Vec::with_capacity(s.len());
            for cell in &s.values {
                let mapped = match &func {
                    Value::Dict(entries) => entries
                        .iter()
                        .find(|(k, _)| k.to_cell().is_some_and(|k| cells_equal(&k, cell)))
                        .map_or(CellValue::Null, |(_, v)| v.to_cell().unwrap_or(CellValue::Null)),
                    Value::Series(lookup) => lookup.get(cell).unwrap_or(CellValue::Null),
                    f => interp
                        .call(f, Args::positional(vec![Value::from_cell(cell.clone())]))?
                        .require_cell()?,
                };
                values.push(mapped);
            }
            derived(s, values)
        }
        "between" => {
            let low = args.require(0, "left", name)?.clone();
            let high = args.require(1, "right", name)?.clone();
            let inclusive = args.str(2, "inclusive")?.unwrap_or_else(|| "both".to_string());
            let (low_op, high_op) = match inclusive.as_str() {
                "both" => (CmpOp::Ge, CmpOp::Le),
                "neither" => (CmpOp::Gt, CmpOp::Lt),
                "left" => (CmpOp::Ge, CmpOp::Lt),
                "right" => (CmpOp::Gt, CmpOp::Le),
                other => return Err(ScriptError::value(format!("inclusive must be both, neither, left or right, not '{}'", other))),
            };
            let this = Value::Series(s.clone());
            let lower = ops::compare(low_op, &this, &low)?;
            let upper = ops::compare(high_op, &this, &high)?;
            return ops::binary(BinOp::BitAnd, &lower, &upper);
        }
        "isin" => {
            let candidates = args.require(0, "values", name)?.iterate()?;
            let cells = candidates.iter().filter_map(Value::to_cell).collect::<Vec<_>>();
            let values = s
                .values
                .iter()
                .map(|v| CellValue::Bool(cells.iter().any(|c| cells_equal(c, v))))
                .collect();
            derived(s, values)
        }
        "tolist" | "to_list" => return Ok(Value::List(values_of(s))),
        "reset_index" => {
            if args.bool_or(usize::MAX, "drop", false)? {
                let mut out = (**s).clone();
                out.index = None;
                out
            } else {
                return Ok(Value::table(reset_to_table(s)));
            }
        }
        "quantile" => {
            let q = args.f64(0, "q")?.unwrap_or(0.5);
            return Ok(agg::quantile(&s.numbers(), q).map_or(Value::Float(f64::NAN), Value::Float));
        }
        "describe" => {
            let labels = DESCRIBE_ROWS.iter().map(|l| CellValue::Text(l.to_string())).collect();
            return Ok(labelled_series(s.name.clone(), labels, describe_values(&s.values)));
        }
        "any" | "all" => {
            let mut truths = s.values.iter().filter(|v| !v.is_null()).map(cell_truthy);
            return Ok(Value::Bool(if name == "any" { truths.any(|b| b) } else { truths.all(|b| b) }));
        }
        "to_frame" => {
            let column_name = args.str(0, "name")?.or_else(|| s.name.clone()).unwrap_or_else(|| "0".to_string());
            let column = Column::new(column_name, s.values.clone());
            return Ok(Value::table(Table::new(vec![column], s.index.clone())));
        }
        "nlargest" | "nsmallest" => {
            let n = args.int_or(0, "n", 5)?.max(0) as usize;
            let rows: Vec<usize> = sort_positions(&[s.values.as_slice()], &[name == "nsmallest"])
                .into_iter()
                .filter(|&r| !s.values[r].is_null())
                .take(n)
                .collect();
            s.take(&rows)
        }
        "corr" => {
            let Value::Series(other) = args.require(0, "other", name)? else {
                return Err(ScriptError::type_error("corr() expects another series"));
            };
            if other.len() != s.len() {
                return Err(ScriptError::value("series lengths differ"));
            }
            return Ok(Value::Float(agg::pearson(&s.values, &other.values).unwrap_or(f64::NAN)));
        }
        "copy" => (**s).clone(),
        "rename" => {
            let mut out = (**s).clone();
            out.name = args.get(0, "index").map(Value::to_text);
            out
        }
        "diff" | "shift" | "pct_change" => {
            let periods = args.int_or(0, "periods", 1)?;
            shifted(s, name, periods)?
        }
        "drop_duplicates" => {
            let mut rows = Vec::new();
            for r in 0..s.len() {
                if !rows.iter().any(|&p: &usize| cells_equal(&s.values[p], &s.values[r])) {
                    rows.push(r);
                }
            }
            s.take(&rows)
        }
        "clip" => {
            let lower = args.f64(0, "lower")?;
            let upper = args.f64(1, "upper")?;
            let values = s
                .values
                .iter()
                .map(|v| match v.as_f64() {
                    Some(x) if lower.is_some_and(|l| x < l) => lower.map_or(v.clone(), CellValue::Float),
                    Some(x) if upper.is_some_and(|u| x > u) => upper.map_or(v.clone(), CellValue::Float),
                    _ => v.clone(),
                })
                .collect();
            derived(s, values)
        }
        "replace" => {
            let pairs: Vec<(CellValue, CellValue)> = match (args.positional.first(), args.positional.get(1)) {
                (Some(Value::Dict(entries)), _) => entries
                    .iter()
                    .map(|(k, v)| Ok((k.require_cell()?, v.require_cell()?)))
                    .collect::<ScriptResult<Vec<_>>>()?,
                (Some(old), Some(new)) => vec![(old.require_cell()?, new.require_cell()?)],
                _ => return Err(ScriptError::type_error("replace() expects a mapping or old and new values")),
            };
            let values = s
                .values
                .iter()
                .map(|v| {
                    pairs
                        .iter()
                        .find(|(old, _)| cells_equal(old, v))
                        .map_or(v.clone(), |(_, new)| new.clone())
                })
                .collect();
            derived(s, values)
        }
        "to_dict" => {
            return Ok(Value::Dict(
                s.labels()
                    .into_iter()
                    .zip(values_of(s))
                    .map(|(label, value)| (Value::from_cell(label), value))
                    .collect(),
            ));
        }
        "item" => {
            return match s.values.as_slice() {
                [only] => Ok(Value::from_cell(only.clone())),
                _ => Err(ScriptError::value("can only convert a series of size 1 to a scalar")),
            };
        }
        "agg" | "aggregate" => {
            return match args.require(0, "func", name)? {
                Value::List(funcs) => {
                    let aggs = funcs.iter().map(agg_of).collect::<ScriptResult<Vec<_>>>()?;
                    let labels = aggs.iter().map(|a| CellValue::Text(a.name().to_string())).collect();
                    let values = aggs.iter().map(|a| a.apply(&s.values)).collect::<ScriptResult<Vec<_>>>()?;
                    Ok(labelled_series(s.name.clone(), labels, values))
                }
                func => Ok(Value::from_cell(agg_of(func)?.apply(&s.values)?)),
            };
        }
        "to_string" => return Ok(Value::Str(s.render_text())),
        _ => return Err(ScriptError::attribute("Series", name)),
    };
    Ok(Value::series(series))
}

fn shifted(s: &Series, name: &str, periods: i64) -> ScriptResult<Series> {
    let len = s.len() as i64;
    let source = |r: i64| {
        let from = r - periods;
        (0..len).contains(&from).then(|| &s.values[from as usize])
    };
    let values = (0..len)
        .map(|r| {
            let current = &s.values[r as usize];
            Ok(match (name, source(r)) {
                (_, None) => CellValue::Null,
                ("shift", Some(prev)) => prev.clone(),
                ("diff", Some(prev)) => ops::cell_binary(BinOp::Sub, current, prev)?,
                (_, Some(prev)) => match (current.as_f64(), prev.as_f64()) {
                    (Some(x), Some(p)) if p != 0.0 => CellValue::Float(x / p - 1.0),
                    _ => CellValue::Null,
                },
            })
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(derived(s, values))
}

/// Distinct non-null values with their counts, most frequent first.
/// Ties keep first-appearance order.
pub(crate) fn count_values(values: &[CellValue]) -> Vec<(CellValue, usize)> {
    let mut counts: Vec<(CellValue, usize)> = Vec::new();
    for v in values.iter().filter(|v| !v.is_null()) {
        match counts.iter_mut().find(|(seen, _)| cells_equal(seen, v)) {
            Some((_, n)) => *n += 1,
            None => counts.push((v.clone(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

/// Index becomes a leading column, values a second one.
pub(crate) fn reset_to_table(s: &Series) -> Table {
    let index_name = s
        .index
        .as_ref()
        .and_then(|i| i.name.clone())
        .unwrap_or_else(|| "index".to_string());
    let value_name = s.name.clone().unwrap_or_else(|| "0".to_string());
    let value_name = if value_name == index_name { format!("{}_value", value_name) } else { value_name };
    Table::new(
        vec![
            Column::new(index_name, s.labels()),
            Column::new(value_name, s.values.clone()),
        ],
        None,
    )
}

/// `s[key]`.
pub fn subscript(s: &Rc<Series>, key: &Value) -> ScriptResult<Value> {
    if let Some(rows) = bool_mask(key, s.len())? {
        return Ok(Value::series(s.take(&rows)));
    }
    match key {
        Value::Slice(bounds) if bounds.is_positional() => {
            Ok(Value::series(s.take(&bounds.positions(s.len())?)))
        }
        Value::Slice(bounds) => match label_slice(bounds, s.len(), |label| label_position(s, label))? {
            Pick::Many(rows) => Ok(Value::series(s.take(&rows))),
            Pick::One(row) => Ok(Value::from_cell(s.values[row].clone())),
        },
        Value::List(items) => {
            let rows = items
                .iter()
                .map(|item| label_position(s, &item.require_cell()?))
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::series(s.take(&rows)))
        }
        scalar => Ok(Value::from_cell(s.get(&scalar.require_cell()?)?)),
    }
}

fn label_position(s: &Series, label: &CellValue) -> ScriptResult<usize> {
    let found = match &s.index {
        Some(index) => index.position(label),
        None => match label {
            CellValue::Int(i) if *i >= 0 && (*i as usize) < s.len() => Some(*i as usize),
            _ => None,
        },
    };
    found.ok_or_else(|| ScriptError::key(format!("{}", label)))
}

fn pick(s: &Series, key: &Value, positional: bool) -> ScriptResult<Pick> {
    if let Some(rows) = bool_mask(key, s.len())? {
        return Ok(Pick::Many(rows));
    }
    let one = |key: &Value| -> ScriptResult<usize> {
        match (key, positional) {
            (Value::Int(i), true) => sequence_index(*i, s.len()),
            (other, true) => Err(ScriptError::type_error(format!(
                "positional indexing needs integers, got '{}'",
                other.type_name()
            ))),
            (other, false) => label_position(s, &other.require_cell()?),
        }
    };
    match key {
        Value::Slice(bounds) if positional => Ok(Pick::Many(bounds.positions(s.len())?)),
        Value::Slice(bounds) => label_slice(bounds, s.len(), |label| label_position(s, label)),
        Value::List(items) => items.iter().map(&one).collect::<ScriptResult<Vec<_>>>().map(Pick::Many),
        scalar => one(scalar).map(Pick::One),
    }
}

/// `s.loc[key]` / `s.iloc[key]`.
pub fn loc(s: &Rc<Series>, key: &Value, positional: bool) -> ScriptResult<Value> {
    Ok(match pick(s, key, positional)? {
        Pick::One(row) => Value::from_cell(s.values[row].clone()),
        Pick::Many(rows) => Value::series(s.take(&rows)),
    })
}

fn assign(s: &Series, rows: Vec<usize>, value: &Value) -> ScriptResult<Series> {
    let cells = broadcast(value, rows.len())?;
    let mut values = s.values.clone();
    for (row, cell) in rows.into_iter().zip(cells) {
        values[row] = cell;
    }
    Ok(derived(s, values))
}

/// `s[key] = value`.
pub fn set_item(s: &Rc<Series>, key: &Value, value: Value) -> ScriptResult<Series> {
    let rows = pick(s, key, false)?.positions();
    assign(s, rows, &value)
}

/// `s.loc[key] = value` / `s.iloc[key] = value`.
pub fn set_loc(s: &Rc<Series>, key: &Value, value: Value, positional: bool) -> ScriptResult<Series> {
    let rows = pick(s, key, positional)?.positions();
    assign(s, rows, &value)
}
