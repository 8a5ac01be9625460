//! The `pd` namespace.

use crate::dataset::{CellValue, parse_timestamp};
use crate::script::{ScriptError, ScriptResult};

use super::args::Args;
use super::frame::{Column, Index, Series, Table};
use super::interp::Interpreter;
use super::table::{self, broadcast};
use super::value::{Namespace, Value};

const FUNCTIONS: &[&str] = &[
    "DataFrame", "Series", "to_datetime", "to_numeric", "concat", "merge", "isna", "isnull",
    "notna", "notnull",
];

pub fn attribute(name: &str) -> Option<Value> {
    match name {
        "NA" | "NaT" => Some(Value::None),
        _ if FUNCTIONS.contains(&name) => Some(Value::Method(
            Box::new(Value::Namespace(Namespace::Pandas)),
            name.to_string(),
        )),
        _ => None,
    }
}

pub fn call(interp: &mut Interpreter, name: &str, args: Args) -> ScriptResult<Value> {
    match name {
        "DataFrame" => Ok(Value::table(data_frame(&args)?)),
        "Series" => series(&args),
        "to_datetime" => to_datetime(&args),
        "to_numeric" => to_numeric(&args),
        "concat" => concat(&args),
        "merge" => {
            let mut positional = args.positional.into_iter();
            let left = match positional.next() {
                Some(Value::Table(t)) => t,
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "merge() expects a DataFrame, got '{}'",
                        other.type_name()
                    )));
                }
                None => return Err(ScriptError::type_error("merge() missing required argument: 'left'")),
            };
            table::call(interp, &left, "merge", Args::new(positional.collect(), args.keywords))
        }
        "isna" | "isnull" | "notna" | "notnull" => {
            let value = args.get(0, "obj").cloned().unwrap_or(Value::None);
            let missing = match &value {
                Value::Series(_) | Value::Table(_) => {
                    return interp.call(&Value::Method(Box::new(value), name.to_string()), Args::default());
                }
                Value::None => true,
                Value::Float(x) => x.is_nan(),
                _ => false,
            };
            Ok(Value::Bool(missing == name.starts_with("is")))
        }
        _ => Err(ScriptError::attribute("pandas", name)),
    }
}

/// `pd.DataFrame(...)` from a dict of columns, a list of records or a list
/// of rows with `columns=`.
fn data_frame(args: &Args) -> ScriptResult<Table> {
    let columns_arg = args.names(usize::MAX, "columns")?;
    let data = match args.get(0, "data") {
        None => {
            let names = columns_arg.unwrap_or_default();
            return Ok(Table::new(names.into_iter().map(|n| Column::new(n, Vec::new())).collect(), None));
        }
        Some(data) => data,
    };
    let mut table = match data {
        Value::Dict(entries) => {
            let len = entries
                .iter()
                .filter_map(|(_, v)| match v {
                    Value::Series(s) => Some(s.len()),
                    Value::List(items) | Value::Tuple(items) => Some(items.len()),
                    Value::Range { .. } => v.iterate().ok().map(|items| items.len()),
                    _ => None,
                })
                .max()
                .ok_or_else(|| ScriptError::value("if using all scalar values, you must pass an index"))?;
            let mut columns = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                columns.push(Column::new(key.to_text(), broadcast(value, len)?));
            }
            Table::new(columns, None)
        }
        Value::Table(t) => (**t).clone(),
        Value::List(rows) | Value::Tuple(rows) => from_rows(rows, columns_arg.as_deref())?,
        other => {
            return Err(ScriptError::type_error(format!(
                "DataFrame constructor not properly called with '{}'",
                other.type_name()
            )));
        }
    };
    if let (Some(names), Value::Dict(_) | Value::Table(_)) = (&columns_arg, data) {
        table = table.select(names)?;
    }
    if let Some(index) = args.keyword("index") {
        let labels = broadcast(index, table.num_rows())?;
        table.index = Some(Index::new(None, labels));
    }
    Ok(table)
}

fn from_rows(rows: &[Value], names: Option<&[String]>) -> ScriptResult<Table> {
    // Records: a list of dicts keyed by column name.
    if rows.iter().all(|r| matches!(r, Value::Dict(_))) && !rows.is_empty() {
        let mut order: Vec<String> = Vec::new();
        for row in rows {
            if let Value::Dict(entries) = row {
                for (k, _) in entries {
                    let key = k.to_text();
                    if !order.contains(&key) {
                        order.push(key);
                    }
                }
            }
        }
        let columns = order
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| match row {
                        Value::Dict(entries) => entries
                            .iter()
                            .find(|(k, _)| k.to_text() == name)
                            .map_or(Ok(CellValue::Null), |(_, v)| v.require_cell()),
                        _ => Ok(CellValue::Null),
                    })
                    .collect::<ScriptResult<Vec<_>>>()?;
                Ok(Column::new(name, values))
            })
            .collect::<ScriptResult<Vec<_>>>()?;
        let table = Table::new(columns, None);
        return match names {
            Some(names) => table.select(names),
            None => Ok(table),
        };
    }
    let cells: Vec<Vec<CellValue>> = rows
        .iter()
        .map(|row| match row {
            Value::List(_) | Value::Tuple(_) => row.iterate()?.iter().map(Value::require_cell).collect(),
            scalar => Ok(vec![scalar.require_cell()?]),
        })
        .collect::<ScriptResult<_>>()?;
    let width = cells.iter().map(Vec::len).max().unwrap_or(0);
    let names: Vec<String> = match names {
        Some(names) if names.len() == width || cells.is_empty() => names.to_vec(),
        Some(names) => {
            return Err(ScriptError::value(format!(
                "{} columns passed, passed data had {} columns",
                names.len(),
                width
            )));
        }
        None => (0..width).map(|i| i.to_string()).collect(),
    };
    let columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let values = cells.iter().map(|row| row.get(i).cloned().unwrap_or(CellValue::Null)).collect();
            Column::new(name, values)
        })
        .collect();
    Ok(Table::new(columns, None))
}

fn series(args: &Args) -> ScriptResult<Value> {
    let name = args.str(usize::MAX, "name")?;
    let (values, labels) = match args.get(0, "data") {
        None => (Vec::new(), None),
        Some(Value::Dict(entries)) => {
            let labels = entries.iter().map(|(k, _)| k.require_cell()).collect::<ScriptResult<Vec<_>>>()?;
            let values = entries.iter().map(|(_, v)| v.require_cell()).collect::<ScriptResult<Vec<_>>>()?;
            (values, Some(labels))
        }
        Some(Value::Series(s)) => (s.values.clone(), s.index.as_ref().map(|i| i.labels.clone())),
        Some(data @ (Value::List(_) | Value::Tuple(_) | Value::Range { .. })) => {
            let len = data.iterate()?.len();
            (broadcast(data, len)?, None)
        }
        Some(other) => (vec![other.require_cell()?], None),
    };
    let labels = match args.keyword("index").or_else(|| args.positional.get(1)) {
        Some(index) => Some(broadcast(index, values.len())?),
        None => labels,
    };
    Ok(Value::series(
        Series::new(name, values).with_index(labels.map(|l| Index::new(None, l))),
    ))
}

/// `errors='coerce'` turns unparseable cells into nulls; the default raises.
fn coerce_errors(args: &Args) -> ScriptResult<bool> {
    match args.str(usize::MAX, "errors")?.as_deref() {
        None | Some("raise") => Ok(false),
        Some("coerce") | Some("ignore") => Ok(true),
        Some(other) => Err(ScriptError::value(format!("invalid errors value '{}'", other))),
    }
}

fn map_cells(
    value: &Value,
    what: &str,
    f: impl Fn(&CellValue) -> Option<CellValue>,
    coerce: bool,
) -> ScriptResult<Value> {
    let convert = |cell: &CellValue| -> ScriptResult<CellValue> {
        if cell.is_null() {
            return Ok(CellValue::Null);
        }
        match f(cell) {
            Some(converted) => Ok(converted),
            None if coerce => Ok(CellValue::Null),
            None => Err(ScriptError::value(format!("unable to parse '{}' as {}", cell, what))),
        }
    };
    match value {
        Value::Series(s) => {
            let values = s.values.iter().map(convert).collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::series(Series::new(s.name.clone(), values).with_index(s.index.clone())))
        }
        Value::List(_) | Value::Tuple(_) => {
            let items = value.iterate()?;
            let cells = items.iter().map(Value::require_cell).collect::<ScriptResult<Vec<_>>>()?;
            let values = cells.iter().map(convert).collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::series(Series::new(None, values)))
        }
        scalar => Ok(match convert(&scalar.require_cell()?)? {
            CellValue::Null => Value::None,
            cell => Value::from_cell(cell),
        }),
    }
}

fn to_datetime(args: &Args) -> ScriptResult<Value> {
    let value = args.require(0, "arg", "to_datetime")?;
    let coerce = coerce_errors(args)?;
    let unit = args.str(usize::MAX, "unit")?;
    let scale = match unit.as_deref() {
        None | Some("ms") => 1,
        Some("s") => 1_000,
        Some("D") => 86_400_000,
        Some(other) => return Err(ScriptError::value(format!("unsupported unit '{}'", other))),
    };
    map_cells(
        value,
        "a datetime",
        |cell| match cell {
            CellValue::Timestamp(ms) => Some(CellValue::Timestamp(*ms)),
            CellValue::Text(s) => parse_timestamp(s.trim()).map(CellValue::Timestamp),
            CellValue::Int(i) => i.checked_mul(scale).map(CellValue::Timestamp),
            CellValue::Float(x) => Some(CellValue::Timestamp((x * scale as f64) as i64)),
            _ => None,
        },
        coerce,
    )
}

fn to_numeric(args: &Args) -> ScriptResult<Value> {
    let value = args.require(0, "arg", "to_numeric")?;
    let coerce = coerce_errors(args)?;
    map_cells(
        value,
        "a number",
        |cell| match cell {
            CellValue::Int(_) | CellValue::Float(_) => Some(cell.clone()),
            CellValue::Bool(b) => Some(CellValue::Int(i64::from(*b))),
            CellValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(CellValue::Int)
                    .or_else(|_| s.parse::<f64>().map(CellValue::Float))
                    .ok()
            }
            _ => None,
        },
        coerce,
    )
}

fn concat(args: &Args) -> ScriptResult<Value> {
    let items = args.require(0, "objs", "concat")?.iterate()?;
    let ignore_index = args.bool_or(usize::MAX, "ignore_index", false)?;
    let side_by_side = args.axis_is_columns(usize::MAX)?;
    if items.is_empty() {
        return Err(ScriptError::value("no objects to concatenate"));
    }
    if items.iter().all(|v| matches!(v, Value::Series(_))) && !side_by_side {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for item in &items {
            if let Value::Series(s) = item {
                values.extend(s.values.iter().cloned());
                labels.extend(s.labels());
            }
        }
        let name = match &items[0] {
            Value::Series(s) => s.name.clone(),
            _ => None,
        };
        let index = (!ignore_index).then(|| Index::new(None, labels));
        return Ok(Value::series(Series::new(name, values).with_index(index)));
    }
    let tables = items
        .iter()
        .map(|item| match item {
            Value::Table(t) => Ok((**t).clone()),
            Value::Series(s) => Ok(s.to_table()),
            other => Err(ScriptError::type_error(format!(
                "cannot concatenate object of type '{}'",
                other.type_name()
            ))),
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    if side_by_side {
        let rows = tables[0].num_rows();
        let mut out = Table::new(Vec::new(), tables[0].index.clone());
        for t in tables {
            if t.num_rows() != rows {
                return Err(ScriptError::value("tables concatenated along columns must have equal length"));
            }
            for column in t.columns {
                out.set_column(column)?;
            }
        }
        return Ok(Value::table(out));
    }
    let mut names: Vec<String> = Vec::new();
    for t in &tables {
        for name in t.column_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    let columns = names
        .iter()
        .map(|name| {
            let values = tables
                .iter()
                .flat_map(|t| match t.column(name) {
                    Some(c) => c.values.clone(),
                    None => vec![CellValue::Null; t.num_rows()],
                })
                .collect();
            Column::new(name.clone(), values)
        })
        .collect();
    let index = (!ignore_index).then(|| {
        let labels = tables.iter().flat_map(|t| (0..t.num_rows()).map(|r| t.row_label(r))).collect();
        Index::new(None, labels)
    });
    Ok(Value::table(Table::new(columns, index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interpreter {
        Interpreter::new(Table::default())
    }

    #[test]
    fn test_frame_from_dict_broadcasts_scalars() {
        let dict = Value::Dict(vec![
            (Value::str("a"), Value::List(vec![Value::Int(1), Value::Int(2)])),
            (Value::str("b"), Value::str("x")),
        ]);
        let t = data_frame(&Args::positional(vec![dict])).unwrap();
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.column("b").unwrap().values[1], CellValue::Text("x".into()));
    }

    #[test]
    fn test_frame_from_records() {
        let records = Value::List(vec![
            Value::Dict(vec![(Value::str("a"), Value::Int(1))]),
            Value::Dict(vec![(Value::str("b"), Value::Int(2))]),
        ]);
        let t = data_frame(&Args::positional(vec![records])).unwrap();
        assert_eq!(t.column_names(), vec!["a", "b"]);
        assert!(t.column("a").unwrap().values[1].is_null());
    }

    #[test]
    fn test_frame_from_rows_checks_width() {
        let rows = Value::List(vec![Value::List(vec![Value::Int(1), Value::Int(2)])]);
        let columns = Value::List(vec![Value::str("x")]);
        let args = Args::new(vec![rows], vec![("columns".into(), columns)]);
        assert!(data_frame(&args).is_err());
    }

    #[test]
    fn test_to_numeric_coerce() {
        let s = Value::series(Series::new(None, vec![CellValue::Text("1.5".into()), CellValue::Text("x".into())]));
        assert!(to_numeric(&Args::positional(vec![s.clone()])).is_err());
        let args = Args::new(vec![s], vec![("errors".into(), Value::str("coerce"))]);
        let Value::Series(out) = to_numeric(&args).unwrap() else {
            panic!("expected a series");
        };
        assert_eq!(out.values, vec![CellValue::Float(1.5), CellValue::Null]);
    }

    #[test]
    fn test_to_datetime_parses_text() {
        let out = to_datetime(&Args::positional(vec![Value::str("1970-01-02")])).unwrap();
        assert!(matches!(out, Value::Timestamp(86_400_000)));
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = Value::table(Table::new(vec![Column::new("x", vec![CellValue::Int(1)])], None));
        let b = Value::table(Table::new(vec![Column::new("y", vec![CellValue::Int(2)])], None));
        let args = Args::new(
            vec![Value::List(vec![a, b])],
            vec![("ignore_index".into(), Value::Bool(true))],
        );
        let Value::Table(t) = concat(&args).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.column_names(), vec!["x", "y"]);
        assert!(t.index.is_none());
    }

    #[test]
    fn test_scalar_isna() {
        let mut interp = interp();
        let out = call(&mut interp, "isna", Args::positional(vec![Value::Float(f64::NAN)])).unwrap();
        assert!(matches!(out, Value::Bool(true)));
        let out = call(&mut interp, "notna", Args::positional(vec![Value::Int(1)])).unwrap();
        assert!(matches!(out, Value::Bool(true)));
    }
}
