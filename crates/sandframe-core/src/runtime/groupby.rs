//! Grouped aggregation.
//!
//! A single grouping key becomes the row index of the result. With several
//! keys the key values are emitted as leading columns instead.

use std::rc::Rc;

use crate::dataset::CellValue;
use crate::script::{ScriptError, ScriptResult};

use super::agg::Agg;
use super::args::{Args, names_of};
use super::frame::{Column, GroupBy, Series, Table, missing_column};
use super::interp::Interpreter;
use super::table::{agg_of, group_index};
use super::value::Value;

type Groups = Vec<(Vec<CellValue>, Vec<usize>)>;

const METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "size", "std", "var", "nunique", "first",
    "last", "prod", "agg", "aggregate", "apply", "transform",
];

pub fn attribute(g: &Rc<GroupBy>, name: &str) -> ScriptResult<Option<Value>> {
    if name == "ngroups" {
        return Ok(Some(Value::Int(g.groups().len() as i64)));
    }
    if METHODS.contains(&name) {
        return Ok(Some(Value::Method(Box::new(Value::GroupBy(g.clone())), name.to_string())));
    }
    if g.table.column(name).is_some() {
        return subscript(g, &Value::str(name)).map(Some);
    }
    Ok(None)
}

/// `grouped['col']` or `grouped[['a', 'b']]`.
pub fn subscript(g: &Rc<GroupBy>, key: &Value) -> ScriptResult<Value> {
    let names = names_of(key)?;
    for name in &names {
        if g.table.column(name).is_none() {
            return Err(missing_column(name));
        }
    }
    let mut selected = (**g).clone();
    selected.single = matches!(key, Value::Str(_));
    selected.selection = Some(names);
    Ok(Value::GroupBy(Rc::new(selected)))
}

pub fn call(interp: &mut Interpreter, g: &Rc<GroupBy>, name: &str, args: Args) -> ScriptResult<Value> {
    if name == "size" {
        let groups = g.groups();
        let counts = groups.iter().map(|(_, rows)| CellValue::Int(rows.len() as i64)).collect();
        if g.keys.len() == 1 {
            let series = Series::new(None, counts).with_index(Some(group_index(&g.keys, &groups)));
            return Ok(Value::series(series));
        }
        let mut columns = key_columns(g, &groups);
        columns.push(Column::new("size", counts));
        return Ok(Value::table(Table::new(columns, None)));
    }
    if let Some(agg) = Agg::from_name(name) {
        return aggregate_all(g, agg);
    }
    match name {
        "agg" | "aggregate" => aggregate(g, &args),
        "apply" => {
            let func = args.require(0, "func", name)?.clone();
            let groups = g.groups();
            let mut cells = Vec::with_capacity(groups.len());
            for (_, rows) in &groups {
                let part = group_part(g, rows)?;
                let result = interp.call(&func, Args::positional(vec![part]))?;
                cells.push(result.to_cell().ok_or_else(|| {
                    ScriptError::unsupported("groupby apply must return a scalar per group")
                })?);
            }
            Ok(assemble(g, &groups, vec![Column::new(selection_label(g), cells)]))
        }
        "transform" => {
            let func = args.require(0, "func", name)?.clone();
            let column = single_column(g)?;
            let mut values = vec![CellValue::Null; g.table.num_rows()];
            for (_, rows) in g.groups() {
                let cells: Vec<CellValue> = rows.iter().map(|&r| column.values[r].clone()).collect();
                let reduced = match agg_of(&func) {
                    Ok(agg) => agg.apply(&cells)?,
                    Err(_) => {
                        let part = Value::series(Series::new(Some(column.name.clone()), cells));
                        interp.call(&func, Args::positional(vec![part]))?.require_cell()?
                    }
                };
                for r in rows {
                    values[r] = reduced.clone();
                }
            }
            let series = Series::new(Some(column.name.clone()), values).with_index(g.table.index.clone());
            Ok(Value::series(series))
        }
        _ => Err(ScriptError::attribute("DataFrameGroupBy", name)),
    }
}

fn single_column(g: &GroupBy) -> ScriptResult<&Column> {
    match g.value_columns().as_slice() {
        [only] => Ok(*only),
        _ => Err(ScriptError::unsupported("transform needs a single selected column")),
    }
}

fn selection_label(g: &GroupBy) -> String {
    match &g.selection {
        Some(names) if names.len() == 1 => names[0].clone(),
        _ => "value".to_string(),
    }
}

fn group_part(g: &GroupBy, rows: &[usize]) -> ScriptResult<Value> {
    let part = g.table.take_rows(rows);
    match (&g.selection, g.single) {
        (Some(names), true) => Ok(Value::series(part.series(&names[0])?)),
        (Some(names), false) => Ok(Value::table(part.select(names)?)),
        (None, _) => Ok(Value::table(part)),
    }
}

fn key_columns(g: &GroupBy, groups: &Groups) -> Vec<Column> {
    g.keys
        .iter()
        .enumerate()
        .map(|(i, key)| Column::new(key.clone(), groups.iter().map(|(k, _)| k[i].clone()).collect()))
        .collect()
}

/// Shape per-group columns into a series or table.
fn assemble(g: &GroupBy, groups: &Groups, columns: Vec<Column>) -> Value {
    if g.keys.len() > 1 {
        let mut all = key_columns(g, groups);
        all.extend(columns);
        return Value::table(Table::new(all, None));
    }
    let index = group_index(&g.keys, groups);
    match columns.as_slice() {
        [only] if g.single => {
            Value::series(Series::new(Some(only.name.clone()), only.values.clone()).with_index(Some(index)))
        }
        _ => Value::table(Table::new(columns, Some(index))),
    }
}

fn reduce_column(column: &Column, groups: &Groups, agg: Agg) -> ScriptResult<Vec<CellValue>> {
    groups
        .iter()
        .map(|(_, rows)| {
            let cells: Vec<CellValue> = rows.iter().map(|&r| column.values[r].clone()).collect();
            agg.apply(&cells)
        })
        .collect()
}

fn aggregate_all(g: &GroupBy, agg: Agg) -> ScriptResult<Value> {
    let groups = g.groups();
    let explicit = g.selection.is_some();
    let mut columns = Vec::new();
    for column in g.value_columns() {
        if !explicit && !agg.applies_to(column.dtype) {
            continue;
        }
        columns.push(Column::new(column.name.clone(), reduce_column(column, &groups, agg)?));
    }
    Ok(assemble(g, &groups, columns))
}

fn aggregate(g: &GroupBy, args: &Args) -> ScriptResult<Value> {
    let groups = g.groups();

    // Named aggregation: agg(total=('sales', 'sum')).
    if args.positional.is_empty() && !args.keywords.is_empty() {
        let mut columns = Vec::new();
        for (output, spec) in &args.keywords {
            let (source, func) = match spec {
                Value::Tuple(parts) | Value::List(parts) if parts.len() == 2 => (&parts[0], &parts[1]),
                _ => {
                    return Err(ScriptError::type_error(format!(
                        "named aggregation '{}' must be a (column, function) pair",
                        output
                    )));
                }
            };
            let source = source
                .as_str()
                .ok_or_else(|| ScriptError::type_error("aggregation source must be a column name"))?;
            let column = g.table.require_column(source)?;
            columns.push(Column::new(output.clone(), reduce_column(column, &groups, agg_of(func)?)?));
        }
        let mut plain = g.clone();
        plain.single = false;
        return Ok(assemble(&plain, &groups, columns));
    }

    let func = args.require(0, "func", "agg")?;
    match func {
        Value::List(funcs) => {
            let aggs = funcs.iter().map(agg_of).collect::<ScriptResult<Vec<_>>>()?;
            let mut columns = Vec::new();
            let values = g.value_columns();
            let single = values.len() == 1;
            for column in values {
                for agg in &aggs {
                    if g.selection.is_none() && !agg.applies_to(column.dtype) {
                        continue;
                    }
                    let name = if single {
                        agg.name().to_string()
                    } else {
                        format!("{}_{}", column.name, agg.name())
                    };
                    columns.push(Column::new(name, reduce_column(column, &groups, *agg)?));
                }
            }
            let mut plain = g.clone();
            plain.single = false;
            Ok(assemble(&plain, &groups, columns))
        }
        Value::Dict(entries) => {
            let mut columns = Vec::new();
            for (name, spec) in entries {
                let name = name
                    .as_str()
                    .ok_or_else(|| ScriptError::type_error("aggregation keys must be column names"))?;
                let column = g.table.require_column(name)?;
                match spec {
                    Value::List(funcs) => {
                        for func in funcs {
                            let agg = agg_of(func)?;
                            let label = format!("{}_{}", name, agg.name());
                            columns.push(Column::new(label, reduce_column(column, &groups, agg)?));
                        }
                    }
                    func => {
                        let agg = agg_of(func)?;
                        columns.push(Column::new(name.to_string(), reduce_column(column, &groups, agg)?));
                    }
                }
            }
            let mut plain = g.clone();
            plain.single = false;
            Ok(assemble(&plain, &groups, columns))
        }
        single => aggregate_all(g, agg_of(single)?),
    }
}

/// Group sizes as a table of key columns plus `count`.
pub(crate) fn size_table(g: &GroupBy) -> Table {
    let groups = g.groups();
    let mut columns = key_columns(g, &groups);
    columns.push(Column::new(
        "count",
        groups.iter().map(|(_, rows)| CellValue::Int(rows.len() as i64)).collect(),
    ));
    Table::new(columns, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnSnapshot, DatasetSnapshot};

    fn grouped(keys: &[&str]) -> Rc<GroupBy> {
        let snapshot = DatasetSnapshot::new(vec![
            ColumnSnapshot::text("region", ["north", "south", "north", "south", "east"]),
            ColumnSnapshot::text("kind", ["a", "a", "b", "a", "b"]),
            ColumnSnapshot::numeric("sales", [10.0, 30.0, 20.0, 5.0, 1.0]),
        ])
        .unwrap();
        let table = Rc::new(Table::from_snapshot(snapshot));
        Rc::new(GroupBy::new(table, keys.iter().map(|k| k.to_string()).collect()).unwrap())
    }

    fn run(g: &Rc<GroupBy>, name: &str, args: Args) -> Value {
        let mut interp = Interpreter::new(Table::default());
        call(&mut interp, g, name, args).unwrap()
    }

    #[test]
    fn test_single_column_sum_is_series_sorted_by_key() {
        let g = grouped(&["region"]);
        let Value::GroupBy(selected) = subscript(&g, &Value::str("sales")).unwrap() else {
            panic!("expected a grouping");
        };
        let Value::Series(sums) = run(&selected, "sum", Args::default()) else {
            panic!("expected a series");
        };
        assert_eq!(
            sums.labels(),
            vec![
                CellValue::Text("east".into()),
                CellValue::Text("north".into()),
                CellValue::Text("south".into())
            ]
        );
        assert_eq!(sums.values, vec![CellValue::Int(1), CellValue::Int(30), CellValue::Int(35)]);
        assert_eq!(sums.name.as_deref(), Some("sales"));
    }

    #[test]
    fn test_mean_over_all_columns_skips_text() {
        let Value::Table(means) = run(&grouped(&["region"]), "mean", Args::default()) else {
            panic!("expected a table");
        };
        assert_eq!(means.column_names(), vec!["sales"]);
        assert_eq!(means.index.as_ref().unwrap().name.as_deref(), Some("region"));
    }

    #[test]
    fn test_multi_key_emits_key_columns() {
        let Value::Table(counts) = run(&grouped(&["region", "kind"]), "size", Args::default()) else {
            panic!("expected a table");
        };
        assert_eq!(counts.column_names(), vec!["region", "kind", "size"]);
        assert_eq!(counts.num_rows(), 4);
        assert!(counts.index.is_none());
    }

    #[test]
    fn test_named_aggregation() {
        let args = Args::new(
            Vec::new(),
            vec![(
                "total".to_string(),
                Value::Tuple(vec![Value::str("sales"), Value::str("sum")]),
            )],
        );
        let Value::Table(table) = run(&grouped(&["region"]), "agg", args) else {
            panic!("expected a table");
        };
        assert_eq!(table.column_names(), vec!["total"]);
    }

    #[test]
    fn test_transform_broadcasts_group_result() {
        let g = grouped(&["region"]);
        let Value::GroupBy(selected) = subscript(&g, &Value::str("sales")).unwrap() else {
            panic!("expected a grouping");
        };
        let Value::Series(totals) = run(&selected, "transform", Args::positional(vec![Value::str("sum")])) else {
            panic!("expected a series");
        };
        assert_eq!(totals.len(), 5);
        assert_eq!(totals.values[0], CellValue::Int(30));
        assert_eq!(totals.values[3], CellValue::Int(35));
    }

    #[test]
    fn test_unknown_column_selection_fails() {
        assert!(subscript(&grouped(&["region"]), &Value::str("profit")).is_err());
    }
}
