//! Runtime values.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::chart::Chart;
use crate::dataset::{CellValue, format_float, format_timestamp};
use crate::script::ast::LambdaDef;
use crate::script::{ScriptError, ScriptResult};

use super::frame::{GroupBy, Series, Table};
use super::styled::StyledTable;

/// Largest collection a single operation may materialize.
pub const MAX_ELEMENTS: usize = 10_000_000;

/// Whitelisted builtin functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Sum,
    Min,
    Max,
    Abs,
    Round,
    Sorted,
    List,
    Tuple,
    Dict,
    Str,
    Int,
    Float,
    Bool,
    Range,
    Zip,
    Enumerate,
    Any,
    All,
    Print,
}

impl Builtin {
    pub const ALL: [Builtin; 20] = [
        Builtin::Len,
        Builtin::Sum,
        Builtin::Min,
        Builtin::Max,
        Builtin::Abs,
        Builtin::Round,
        Builtin::Sorted,
        Builtin::List,
        Builtin::Tuple,
        Builtin::Dict,
        Builtin::Str,
        Builtin::Int,
        Builtin::Float,
        Builtin::Bool,
        Builtin::Range,
        Builtin::Zip,
        Builtin::Enumerate,
        Builtin::Any,
        Builtin::All,
        Builtin::Print,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Sum => "sum",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Sorted => "sorted",
            Builtin::List => "list",
            Builtin::Tuple => "tuple",
            Builtin::Dict => "dict",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::Range => "range",
            Builtin::Zip => "zip",
            Builtin::Enumerate => "enumerate",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Print => "print",
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// Library namespaces bound as globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Pandas,
    Pyplot,
}

/// Attribute objects such as `df.plot`, `s.str` and `df.loc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Plot,
    Str,
    Dt,
    Loc,
    ILoc,
}

impl AccessorKind {
    fn name(self) -> &'static str {
        match self {
            AccessorKind::Plot => "PlotAccessor",
            AccessorKind::Str => "StringMethods",
            AccessorKind::Dt => "DatetimeProperties",
            AccessorKind::Loc => "_LocIndexer",
            AccessorKind::ILoc => "_iLocIndexer",
        }
    }
}

/// `start:stop:step` inside a subscript.
#[derive(Debug, Clone)]
pub struct SliceBounds {
    pub start: Option<Value>,
    pub stop: Option<Value>,
    pub step: Option<Value>,
}

impl SliceBounds {
    fn bound(value: &Option<Value>, what: &str) -> ScriptResult<Option<i64>> {
        match value {
            None | Some(Value::None) => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(Value::Bool(b)) => Ok(Some(i64::from(*b))),
            Some(other) => Err(ScriptError::type_error(format!(
                "slice {} must be an integer, not '{}'",
                what,
                other.type_name()
            ))),
        }
    }

    /// Whether every bound is an integer or absent.
    pub fn is_positional(&self) -> bool {
        [&self.start, &self.stop, &self.step].iter().all(|b| {
            matches!(b, None | Some(Value::None) | Some(Value::Int(_)) | Some(Value::Bool(_)))
        })
    }

    /// Positions selected from a sequence of `len` items.
    pub fn positions(&self, len: usize) -> ScriptResult<Vec<usize>> {
        let len = len as i64;
        let step = Self::bound(&self.step, "step")?.unwrap_or(1);
        if step == 0 {
            return Err(ScriptError::value("slice step cannot be zero"));
        }
        let normalize = |i: i64, low: i64, high: i64| {
            let i = if i < 0 { i + len } else { i };
            i.clamp(low, high)
        };
        let mut out = Vec::new();
        if step > 0 {
            let start = Self::bound(&self.start, "start")?.map_or(0, |i| normalize(i, 0, len));
            let stop = Self::bound(&self.stop, "stop")?.map_or(len, |i| normalize(i, 0, len));
            let mut i = start;
            while i < stop {
                out.push(i as usize);
                i += step;
            }
        } else {
            let start = Self::bound(&self.start, "start")?.map_or(len - 1, |i| normalize(i, -1, len - 1));
            let stop = Self::bound(&self.stop, "stop")?.map_or(-1, |i| normalize(i, -1, len - 1));
            let mut i = start;
            while i > stop {
                out.push(i as usize);
                i += step;
            }
        }
        Ok(out)
    }
}

/// A lambda together with the enclosing lambda parameters it can see.
#[derive(Debug)]
pub struct Closure {
    pub def: Rc<LambdaDef>,
    pub captured: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Insertion-ordered mapping.
    Dict(Vec<(Value, Value)>),
    Range {
        start: i64,
        stop: i64,
        step: i64,
    },
    Table(Rc<Table>),
    Series(Rc<Series>),
    GroupBy(Rc<GroupBy>),
    /// Figures are shared: `fig, ax = plt.subplots()` names one chart twice.
    Chart(Rc<RefCell<Chart>>),
    Styled(Rc<StyledTable>),
    Builtin(Builtin),
    Namespace(Namespace),
    Accessor(AccessorKind, Box<Value>),
    Method(Box<Value>, String),
    Lambda(Rc<Closure>),
    Slice(Box<SliceBounds>),
}

impl Value {
    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(text.into())
    }

    pub fn table(table: Table) -> Value {
        Value::Table(Rc::new(table))
    }

    pub fn series(series: Series) -> Value {
        Value::Series(Rc::new(series))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Timestamp(_) => "Timestamp",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Range { .. } => "range",
            Value::Table(_) => "DataFrame",
            Value::Series(_) => "Series",
            Value::GroupBy(_) => "DataFrameGroupBy",
            Value::Chart(_) => "Figure",
            Value::Styled(_) => "Styler",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Namespace(_) => "module",
            Value::Accessor(kind, _) => kind.name(),
            Value::Method(..) => "method",
            Value::Lambda(_) => "function",
            Value::Slice(_) => "slice",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Builtin(_)
                | Value::Method(..)
                | Value::Lambda(_)
                | Value::Accessor(AccessorKind::Plot, _)
        )
    }

    pub fn truthy(&self) -> ScriptResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            Value::Dict(entries) => !entries.is_empty(),
            Value::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            Value::Table(_) | Value::Series(_) => {
                return Err(ScriptError::value(format!(
                    "the truth value of a {} is ambiguous; use .empty, .any() or .all()",
                    self.type_name()
                )));
            }
            _ => true,
        })
    }

    /// Convert to a table cell, if this is a primitive.
    pub fn to_cell(&self) -> Option<CellValue> {
        Some(match self {
            Value::None => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Int(i) => CellValue::Int(*i),
            Value::Float(x) => CellValue::Float(*x),
            Value::Str(s) => CellValue::Text(s.clone()),
            Value::Timestamp(ms) => CellValue::Timestamp(*ms),
            _ => return None,
        })
    }

    pub fn require_cell(&self) -> ScriptResult<CellValue> {
        self.to_cell().ok_or_else(|| {
            ScriptError::type_error(format!(
                "'{}' cannot be stored in a table cell",
                self.type_name()
            ))
        })
    }

    pub fn from_cell(cell: CellValue) -> Value {
        match cell {
            CellValue::Null => Value::Float(f64::NAN),
            CellValue::Int(i) => Value::Int(i),
            CellValue::Float(x) => Value::Float(x),
            CellValue::Text(s) => Value::Str(s),
            CellValue::Bool(b) => Value::Bool(b),
            CellValue::Timestamp(ms) => Value::Timestamp(ms),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Python `repr()`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => format_float(*x),
            Value::Str(s) => quote(s),
            Value::Timestamp(ms) => format!("Timestamp('{}')", format_timestamp(*ms)),
            Value::List(items) => format!("[{}]", join_repr(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Dict(entries) => format!(
                "{{{}}}",
                entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            Value::Range { start, stop, step } if *step == 1 => {
                format!("range({}, {})", start, stop)
            }
            Value::Range { start, stop, step } => format!("range({}, {}, {})", start, stop, step),
            Value::Table(table) => table.render_text(),
            Value::Series(series) => series.render_text(),
            Value::GroupBy(grouped) => format!(
                "<DataFrameGroupBy by {} with {} groups>",
                grouped.keys.join(", "),
                grouped.groups().len()
            ),
            Value::Chart(chart) => chart.borrow().describe(),
            Value::Styled(styled) => format!(
                "<Styler over {} rows x {} columns>",
                styled.table.num_rows(),
                styled.table.num_columns()
            ),
            Value::Builtin(b) => format!("<built-in function {}>", b.name()),
            Value::Namespace(Namespace::Pandas) => "<module 'pandas'>".to_string(),
            Value::Namespace(Namespace::Pyplot) => "<module 'matplotlib.pyplot'>".to_string(),
            Value::Accessor(kind, _) => format!("<{} object>", kind.name()),
            Value::Method(receiver, name) => {
                format!("<bound method {}.{}>", receiver.type_name(), name)
            }
            Value::Lambda(_) => "<function <lambda>>".to_string(),
            Value::Slice(bounds) => {
                let part = |b: &Option<Value>| b.as_ref().map_or("None".to_string(), Value::repr);
                format!(
                    "slice({}, {}, {})",
                    part(&bounds.start),
                    part(&bounds.stop),
                    part(&bounds.step)
                )
            }
        }
    }

    /// Python `str()`.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Timestamp(ms) => format_timestamp(*ms),
            Value::Float(x) if x.is_nan() => "nan".to_string(),
            other => other.repr(),
        }
    }

    /// Iterate a value the way a `for` clause would.
    pub fn iterate(&self) -> ScriptResult<Vec<Value>> {
        match self {
            Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            Value::Range { start, stop, step } => {
                let len = range_len(*start, *stop, *step);
                if len > MAX_ELEMENTS as i64 {
                    return Err(ScriptError::value(format!(
                        "range of {} elements is too large to materialize",
                        len
                    )));
                }
                Ok((0..len).map(|i| Value::Int(start + i * step)).collect())
            }
            Value::Series(series) => Ok(series
                .values
                .iter()
                .cloned()
                .map(Value::from_cell)
                .collect()),
            Value::Table(table) => Ok(table.column_names().into_iter().map(Value::Str).collect()),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }
}

pub fn range_len(start: i64, stop: i64, step: i64) -> i64 {
    if step > 0 && stop > start {
        (stop - start - 1) / step + 1
    } else if step < 0 && stop < start {
        (start - stop - 1) / (-step) + 1
    } else {
        0
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('\n', "\\n");
    if s.contains('\'') && !s.contains('"') {
        format!("\"{}\"", escaped)
    } else {
        format!("'{}'", escaped.replace('\'', "\\'"))
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

/// Python `==` on scalars and containers.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Timestamp(x), Value::Timestamp(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.iter()
                        .any(|(k2, v2)| values_equal(k, k2) && values_equal(v, v2))
                })
        }
        (Value::Table(x), Value::Table(y)) => Rc::ptr_eq(x, y),
        (Value::Series(x), Value::Series(y)) => Rc::ptr_eq(x, y),
        (Value::Chart(x), Value::Chart(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Python ordering for `<`, `sorted`, `min` and `max`.
pub fn compare_values(a: &Value, b: &Value) -> ScriptResult<Ordering> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Ok(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) | (Value::Tuple(x), Value::Tuple(y)) => {
            for (p, q) in x.iter().zip(y) {
                let ordering = compare_values(p, q)?;
                if ordering.is_ne() {
                    return Ok(ordering);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
            _ => Err(ScriptError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr() {
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::str("a"), Value::None]).repr(),
            "[1, 'a', None]"
        );
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::Dict(vec![(Value::str("k"), Value::Bool(true))]).repr(),
            "{'k': True}"
        );
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::str("").truthy().unwrap());
        assert!(Value::List(vec![Value::None]).truthy().unwrap());
        assert!(!Value::Range { start: 3, stop: 3, step: 1 }.truthy().unwrap());
        let series = Value::series(Series::new(None, vec![]));
        assert!(series.truthy().is_err());
    }

    #[test]
    fn test_numeric_equality_crosses_types() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!values_equal(&Value::str("1"), &Value::Int(1)));
    }

    #[test]
    fn test_compare_mismatched_types_fails() {
        let err = compare_values(&Value::str("a"), &Value::Int(1)).unwrap_err();
        assert!(err.message.contains("'<' not supported"));
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 10, 3), 4);
        assert_eq!(range_len(10, 0, -2), 5);
        assert_eq!(range_len(0, 0, 1), 0);
    }

    #[test]
    fn test_slice_positions() {
        let bounds = |start: Option<i64>, stop: Option<i64>, step: Option<i64>| SliceBounds {
            start: start.map(Value::Int),
            stop: stop.map(Value::Int),
            step: step.map(Value::Int),
        };
        assert_eq!(bounds(Some(1), None, None).positions(4).unwrap(), vec![1, 2, 3]);
        assert_eq!(bounds(None, Some(-1), None).positions(4).unwrap(), vec![0, 1, 2]);
        assert_eq!(bounds(None, None, Some(-1)).positions(3).unwrap(), vec![2, 1, 0]);
        assert_eq!(bounds(Some(10), None, None).positions(3).unwrap(), Vec::<usize>::new());
        assert!(bounds(None, None, Some(0)).positions(3).is_err());
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(Builtin::lookup("len"), Some(Builtin::Len));
        assert_eq!(Builtin::lookup("open"), None);
        assert_eq!(Builtin::lookup("eval"), None);
    }
}
