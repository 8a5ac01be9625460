//! The whitelisted builtin functions.

use std::cmp::Ordering;

use crate::dataset::CellValue;
use crate::script::ast::BinOp;
use crate::script::{ScriptError, ScriptResult};

use super::agg::Agg;
use super::args::Args;
use super::frame::Series;
use super::interp::{Interpreter, dict_insert};
use super::ops;
use super::value::{Builtin, MAX_ELEMENTS, Value, compare_values, range_len};

pub fn call(interp: &mut Interpreter, builtin: Builtin, args: Args) -> ScriptResult<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Len => len(args.require(0, "obj", name)?),
        Builtin::Sum => sum(&args),
        Builtin::Min => extreme(interp, &args, Ordering::Less, name),
        Builtin::Max => extreme(interp, &args, Ordering::Greater, name),
        Builtin::Abs => abs(args.require(0, "x", name)?),
        Builtin::Round => {
            let ndigits = args.int(1, "ndigits")?;
            round(args.require(0, "number", name)?, ndigits)
        }
        Builtin::Sorted => {
            let items = args.require(0, "iterable", name)?.iterate()?;
            let key = args.keyword("key").cloned();
            let reverse = args.bool_or(usize::MAX, "reverse", false)?;
            Ok(Value::List(sort_values(interp, items, key.as_ref(), reverse)?))
        }
        Builtin::List => Ok(Value::List(optional_items(&args)?)),
        Builtin::Tuple => Ok(Value::Tuple(optional_items(&args)?)),
        Builtin::Dict => dict(args),
        Builtin::Str => Ok(Value::Str(
            args.positional.first().map(Value::to_text).unwrap_or_default(),
        )),
        Builtin::Int => to_int(args.positional.first().unwrap_or(&Value::Int(0))),
        Builtin::Float => to_float(args.positional.first().unwrap_or(&Value::Float(0.0))),
        Builtin::Bool => Ok(Value::Bool(match args.positional.first() {
            Some(value) => value.truthy()?,
            None => false,
        })),
        Builtin::Range => range(&args),
        Builtin::Zip => zip(&args),
        Builtin::Enumerate => {
            let start = args.int_or(1, "start", 0)?;
            let items = args.require(0, "iterable", name)?.iterate()?;
            Ok(Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::Tuple(vec![Value::Int(start + i as i64), item]))
                    .collect(),
            ))
        }
        Builtin::Any | Builtin::All => {
            let items = args.require(0, "iterable", name)?.iterate()?;
            let want = builtin == Builtin::Any;
            for item in items {
                if item.truthy()? == want {
                    return Ok(Value::Bool(want));
                }
            }
            Ok(Value::Bool(!want))
        }
        Builtin::Print => {
            let sep = args.str(usize::MAX, "sep")?.unwrap_or_else(|| " ".to_string());
            let line = args
                .positional
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(&sep);
            interp.print(line);
            Ok(Value::None)
        }
    }
}

fn len(value: &Value) -> ScriptResult<Value> {
    let n = match value {
        Value::Str(s) => s.chars().count() as i64,
        Value::List(items) | Value::Tuple(items) => items.len() as i64,
        Value::Dict(entries) => entries.len() as i64,
        Value::Range { start, stop, step } => range_len(*start, *stop, *step),
        Value::Table(table) => table.num_rows() as i64,
        Value::Series(series) => series.len() as i64,
        Value::GroupBy(grouped) => grouped.groups().len() as i64,
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    Ok(Value::Int(n))
}

fn sum(args: &Args) -> ScriptResult<Value> {
    let iterable = args.require(0, "iterable", "sum")?;
    let start = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
    match iterable {
        Value::Series(series) => {
            let total = Value::from_cell(Agg::Sum.apply(&series.values)?);
            ops::binary(BinOp::Add, &start, &total)
        }
        // Ranges are summed without materializing them.
        Value::Range { start: lo, stop, step } => {
            let mut acc = start;
            let mut i = *lo;
            while (*step > 0 && i < *stop) || (*step < 0 && i > *stop) {
                acc = ops::binary(BinOp::Add, &acc, &Value::Int(i))?;
                i = match i.checked_add(*step) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(acc)
        }
        other => {
            let mut acc = start;
            for item in other.iterate()? {
                acc = ops::binary(BinOp::Add, &acc, &item)?;
            }
            Ok(acc)
        }
    }
}

fn extreme(interp: &mut Interpreter, args: &Args, want: Ordering, name: &str) -> ScriptResult<Value> {
    let items = match args.positional.as_slice() {
        [] => return Err(ScriptError::type_error(format!("{}() expected at least 1 argument", name))),
        [Value::Series(series)] => {
            let agg = if want == Ordering::Less { Agg::Min } else { Agg::Max };
            return Ok(Value::from_cell(agg.apply(&series.values)?));
        }
        [single] => single.iterate()?,
        many => many.to_vec(),
    };
    let key = args.keyword("key").cloned();
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let rank = match &key {
            Some(f) => interp.call(f, Args::positional(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => compare_values(&rank, best_rank)? == want,
        };
        if replace {
            best = Some((rank, item));
        }
    }
    match best {
        Some((_, item)) => Ok(item),
        None => args
            .keyword("default")
            .cloned()
            .ok_or_else(|| ScriptError::value(format!("{}() arg is an empty sequence", name))),
    }
}

fn abs(value: &Value) -> ScriptResult<Value> {
    match value {
        Value::Int(i) => Ok(i.checked_abs().map_or(Value::Float((*i as f64).abs()), Value::Int)),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Series(series) => map_series(series, |cell| match cell {
            CellValue::Int(i) => Ok(CellValue::Int(i.saturating_abs())),
            CellValue::Float(x) => Ok(CellValue::Float(x.abs())),
            CellValue::Null => Ok(CellValue::Null),
            other => Err(ScriptError::type_error(format!("bad operand type for abs(): '{}'", other))),
        }),
        other => Err(ScriptError::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}

/// Round half to even, like Python.
pub fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let factor = 10f64.powi(ndigits.clamp(-308, 308) as i32);
    let scaled = x * factor;
    if !scaled.is_finite() {
        return x;
    }
    scaled.round_ties_even() / factor
}

pub fn round(value: &Value, ndigits: Option<i64>) -> ScriptResult<Value> {
    match (value, ndigits) {
        (Value::Int(_), _) | (Value::Bool(_), None) => Ok(value.clone()),
        (Value::Float(x), None) => {
            let rounded = x.round_ties_even();
            if rounded.is_finite() && rounded.abs() < 9.2e18 {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(ScriptError::value(format!("cannot convert float {} to integer", x)))
            }
        }
        (Value::Float(x), Some(n)) => Ok(Value::Float(round_float(*x, n))),
        (Value::Series(series), n) => {
            let n = n.unwrap_or(0);
            map_series(series, |cell| match cell {
                CellValue::Float(x) => Ok(CellValue::Float(round_float(*x, n))),
                other => Ok(other.clone()),
            })
        }
        (other, _) => Err(ScriptError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn map_series(series: &Series, f: impl Fn(&CellValue) -> ScriptResult<CellValue>) -> ScriptResult<Value> {
    let values = series.values.iter().map(f).collect::<ScriptResult<Vec<_>>>()?;
    Ok(Value::series(
        Series::new(series.name.clone(), values).with_index(series.index.clone()),
    ))
}

/// Stable sort with an optional key function.
pub fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> ScriptResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let rank = match key {
            Some(f) => interp.call(f, Args::positional(vec![item.clone()]))?,
            None => item.clone(),
        };
        keyed.push((rank, item));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| match compare_values(a, b) {
        Ok(ordering) if reverse => ordering.reverse(),
        Ok(ordering) => ordering,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
    }
}

fn optional_items(args: &Args) -> ScriptResult<Vec<Value>> {
    match args.positional.first() {
        Some(value) => value.iterate(),
        None => Ok(Vec::new()),
    }
}

fn dict(args: Args) -> ScriptResult<Value> {
    let mut entries: Vec<(Value, Value)> = Vec::new();
    match args.positional.first() {
        None => {}
        Some(Value::Dict(existing)) => entries = existing.clone(),
        Some(Value::Series(series)) => {
            for (label, cell) in series.labels().into_iter().zip(&series.values) {
                dict_insert(&mut entries, Value::from_cell(label), Value::from_cell(cell.clone()));
            }
        }
        Some(other) => {
            for pair in other.iterate()? {
                match pair.iterate()?.as_slice() {
                    [k, v] => dict_insert(&mut entries, k.clone(), v.clone()),
                    _ => {
                        return Err(ScriptError::value(
                            "dictionary update sequence element has wrong length; 2 is required",
                        ));
                    }
                }
            }
        }
    }
    for (k, v) in args.keywords {
        dict_insert(&mut entries, Value::Str(k), v);
    }
    Ok(Value::Dict(entries))
}

fn to_int(value: &Value) -> ScriptResult<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(x) if x.is_finite() && x.abs() < 9.2e18 => Ok(Value::Int(x.trunc() as i64)),
        Value::Float(x) => Err(ScriptError::value(format!("cannot convert float {} to integer", x))),
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| {
                ScriptError::value(format!("invalid literal for int() with base 10: {}", value.repr()))
            }),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> ScriptResult<Value> {
    match value {
        Value::Str(s) => {
            let text = s.trim().to_lowercase();
            let parsed = match text.as_str() {
                "nan" => Some(f64::NAN),
                "inf" | "infinity" | "+inf" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                t => t.replace('_', "").parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                ScriptError::value(format!("could not convert string to float: {}", value.repr()))
            })
        }
        other => other.as_f64().map(Value::Float).ok_or_else(|| {
            ScriptError::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

fn range(args: &Args) -> ScriptResult<Value> {
    let ints = args
        .positional
        .iter()
        .map(|v| match v {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(ScriptError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => {
            return Err(ScriptError::type_error(format!(
                "range expected 1 to 3 arguments, got {}",
                ints.len()
            )));
        }
    };
    if step == 0 {
        return Err(ScriptError::value("range() arg 3 must not be zero"));
    }
    Ok(Value::Range { start, stop, step })
}

fn zip(args: &Args) -> ScriptResult<Value> {
    let columns = args
        .positional
        .iter()
        .map(Value::iterate)
        .collect::<ScriptResult<Vec<_>>>()?;
    let shortest = columns.iter().map(Vec::len).min().unwrap_or(0).min(MAX_ELEMENTS);
    Ok(Value::List(
        (0..shortest)
            .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::frame::Table;

    fn run(builtin: Builtin, positional: Vec<Value>) -> ScriptResult<Value> {
        let mut interp = Interpreter::new(Table::default());
        call(&mut interp, builtin, Args::positional(positional))
    }

    #[test]
    fn test_sum_of_range_and_list() {
        let range = Value::Range { start: 1, stop: 5, step: 1 };
        assert!(matches!(run(Builtin::Sum, vec![range]).unwrap(), Value::Int(10)));
        let list = Value::List(vec![Value::Int(1), Value::Float(0.5)]);
        assert!(matches!(run(Builtin::Sum, vec![list]).unwrap(), Value::Float(x) if x == 1.5));
    }

    #[test]
    fn test_round_half_even() {
        assert!(matches!(round(&Value::Float(2.5), None).unwrap(), Value::Int(2)));
        assert!(matches!(round(&Value::Float(3.5), None).unwrap(), Value::Int(4)));
        assert!(matches!(round(&Value::Float(1.2345), Some(2)).unwrap(), Value::Float(x) if x == 1.23));
    }

    #[test]
    fn test_min_max_of_args_and_iterable() {
        let max = run(Builtin::Max, vec![Value::Int(3), Value::Int(9), Value::Int(4)]).unwrap();
        assert!(matches!(max, Value::Int(9)));
        let min = run(Builtin::Min, vec![Value::List(vec![Value::str("b"), Value::str("a")])]).unwrap();
        assert_eq!(min.as_str(), Some("a"));
        assert!(run(Builtin::Min, vec![Value::List(vec![])]).is_err());
    }

    #[test]
    fn test_conversions() {
        assert!(matches!(to_int(&Value::str(" 42 ")).unwrap(), Value::Int(42)));
        assert!(matches!(to_int(&Value::Float(-3.9)).unwrap(), Value::Int(-3)));
        assert!(to_int(&Value::str("3.5")).is_err());
        assert!(matches!(to_float(&Value::str("1e3")).unwrap(), Value::Float(x) if x == 1000.0));
        assert!(to_float(&Value::str("abc")).is_err());
    }

    #[test]
    fn test_range_rejects_zero_step() {
        let err = run(Builtin::Range, vec![Value::Int(0), Value::Int(5), Value::Int(0)]).unwrap_err();
        assert!(err.message.contains("must not be zero"));
    }

    #[test]
    fn test_sorted_mixed_types_fails() {
        let mut interp = Interpreter::new(Table::default());
        let items = vec![Value::Int(1), Value::str("a")];
        assert!(sort_values(&mut interp, items, None, false).is_err());
    }

    #[test]
    fn test_print_is_captured() {
        let mut interp = Interpreter::new(Table::default());
        call(&mut interp, Builtin::Print, Args::positional(vec![Value::str("n ="), Value::Int(3)])).unwrap();
        assert_eq!(interp.printed(), ["n = 3".to_string()]);
    }

    #[test]
    fn test_len_of_unsized_fails() {
        assert!(run(Builtin::Len, vec![Value::Int(3)]).is_err());
        assert!(matches!(run(Builtin::Len, vec![Value::str("héllo")]).unwrap(), Value::Int(5)));
    }
}
