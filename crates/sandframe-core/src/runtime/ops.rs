//! Operators on scalars, and element-wise on series and tables.

use std::rc::Rc;

use crate::dataset::CellValue;
use crate::script::ast::{BinOp, CmpOp, UnaryOp};
use crate::script::{ScriptError, ScriptResult};

use super::frame::{Column, Series, Table, cells_equal};
use super::value::{MAX_ELEMENTS, Value, compare_values, values_equal};

pub fn binary(op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    match (left, right) {
        (Value::Series(_), _) | (_, Value::Series(_)) => {
            elementwise(left, right, |a, b| cell_binary(op, a, b))
        }
        (Value::Table(table), other) if other.to_cell().is_some() => {
            let cell = other.require_cell()?;
            table_map(table, |a| cell_binary(op, a, &cell))
        }
        (other, Value::Table(table)) if other.to_cell().is_some() => {
            let cell = other.require_cell()?;
            table_map(table, |b| cell_binary(op, &cell, b))
        }
        _ => scalar_binary(op, left, right),
    }
}

fn unsupported_operands(op: BinOp, left: &Value, right: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn scalar_binary(op: BinOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    use Value::*;

    match (op, left, right) {
        (BinOp::Add, Str(a), Str(b)) => return Ok(Str(format!("{}{}", a, b))),
        (BinOp::Add, List(a), List(b)) => {
            return Ok(List(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Add, Tuple(a), Tuple(b)) => {
            return Ok(Tuple(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Mul, Str(s), Int(n)) | (BinOp::Mul, Int(n), Str(s)) => {
            let n = (*n).max(0) as usize;
            check_size(s.len().saturating_mul(n))?;
            return Ok(Str(s.repeat(n)));
        }
        (BinOp::Mul, List(items), Int(n)) | (BinOp::Mul, Int(n), List(items)) => {
            let n = (*n).max(0) as usize;
            check_size(items.len().saturating_mul(n))?;
            let mut out = Vec::with_capacity(items.len() * n);
            for _ in 0..n {
                out.extend(items.iter().cloned());
            }
            return Ok(List(out));
        }
        (BinOp::BitAnd, Bool(a), Bool(b)) => return Ok(Bool(*a && *b)),
        (BinOp::BitOr, Bool(a), Bool(b)) => return Ok(Bool(*a || *b)),
        (BinOp::Sub, Timestamp(a), Timestamp(b)) => {
            return Ok(Float((a - b) as f64 / 86_400_000.0));
        }
        _ => {}
    }

    let as_int = |v: &Value| match v {
        Int(i) => Some(*i),
        Bool(b) => Some(i64::from(*b)),
        _ => Option::None,
    };

    if let (Some(a), Some(b)) = (as_int(left), as_int(right)) {
        return int_binary(op, a, b);
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => float_binary(op, a, b).map(Float),
        _ => Err(unsupported_operands(op, left, right)),
    }
}

fn check_size(len: usize) -> ScriptResult<()> {
    if len > MAX_ELEMENTS {
        Err(ScriptError::value(format!(
            "result of {} elements is too large",
            len
        )))
    } else {
        Ok(())
    }
}

fn int_binary(op: BinOp, a: i64, b: i64) -> ScriptResult<Value> {
    let overflowed = || float_binary(op, a as f64, b as f64).map(Value::Float);
    match op {
        BinOp::Add => a.checked_add(b).map_or_else(overflowed, |v| Ok(Value::Int(v))),
        BinOp::Sub => a.checked_sub(b).map_or_else(overflowed, |v| Ok(Value::Int(v))),
        BinOp::Mul => a.checked_mul(b).map_or_else(overflowed, |v| Ok(Value::Int(v))),
        BinOp::Div => {
            if b == 0 {
                Err(ScriptError::zero_division())
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        BinOp::FloorDiv => {
            if b == 0 {
                Err(ScriptError::zero_division())
            } else {
                a.checked_div_euclid(b)
                    .map(|q| {
                        // Python floors toward negative infinity.
                        if b < 0 && a.rem_euclid(b) != 0 { q - 1 } else { q }
                    })
                    .map_or_else(overflowed, |v| Ok(Value::Int(v)))
            }
        }
        BinOp::Mod => {
            if b == 0 {
                Err(ScriptError::zero_division())
            } else {
                // Only i64::MIN % -1 overflows, and its remainder is zero.
                let r = a.checked_rem_euclid(b).unwrap_or(0);
                Ok(Value::Int(if b < 0 && r != 0 { r + b } else { r }))
            }
        }
        BinOp::Pow => {
            if b < 0 {
                float_binary(op, a as f64, b as f64).map(Value::Float)
            } else {
                u32::try_from(b)
                    .ok()
                    .and_then(|e| a.checked_pow(e))
                    .map_or_else(overflowed, |v| Ok(Value::Int(v)))
            }
        }
        BinOp::BitAnd => Ok(Value::Int(a & b)),
        BinOp::BitOr => Ok(Value::Int(a | b)),
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> ScriptResult<f64> {
    Ok(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ScriptError::zero_division());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ScriptError::zero_division());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ScriptError::zero_division());
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => a.powf(b),
        BinOp::BitAnd | BinOp::BitOr => {
            return Err(ScriptError::type_error(format!(
                "unsupported operand type(s) for {}: 'float' and 'float'",
                op.symbol()
            )));
        }
    })
}

/// Cell arithmetic with table semantics: nulls propagate and division by
/// zero yields infinities instead of raising.
pub fn cell_binary(op: BinOp, a: &CellValue, b: &CellValue) -> ScriptResult<CellValue> {
    if a.is_null() || b.is_null() {
        return Ok(match (op, a, b) {
            (BinOp::BitAnd, _, _) => CellValue::Bool(false),
            (BinOp::BitOr, CellValue::Bool(x), _) | (BinOp::BitOr, _, CellValue::Bool(x)) => {
                CellValue::Bool(*x)
            }
            _ => CellValue::Null,
        });
    }
    let left = Value::from_cell(a.clone());
    let right = Value::from_cell(b.clone());
    let result = match (op, left.as_f64(), right.as_f64()) {
        (BinOp::Div | BinOp::FloorDiv | BinOp::Mod, Some(x), Some(y)) if y == 0.0 => {
            Value::Float(if op == BinOp::Mod || x == 0.0 {
                f64::NAN
            } else {
                x.signum() * f64::INFINITY
            })
        }
        _ => scalar_binary(op, &left, &right)?,
    };
    result.require_cell()
}

/// Apply `f` pairwise over a series and a scalar, or two equal-length series.
pub fn elementwise(
    left: &Value,
    right: &Value,
    f: impl Fn(&CellValue, &CellValue) -> ScriptResult<CellValue>,
) -> ScriptResult<Value> {
    let (values, template) = match (left, right) {
        (Value::Series(a), Value::Series(b)) => {
            if a.len() != b.len() {
                return Err(ScriptError::value(format!(
                    "cannot combine series of length {} and {}",
                    a.len(),
                    b.len()
                )));
            }
            let values = a
                .values
                .iter()
                .zip(&b.values)
                .map(|(x, y)| f(x, y))
                .collect::<ScriptResult<Vec<_>>>()?;
            let name = if a.name == b.name { a.name.clone() } else { None };
            (values, Series { name, ..(**a).clone() })
        }
        (Value::Series(a), other) => {
            let cell = operand_cell(other)?;
            let values = a
                .values
                .iter()
                .map(|x| f(x, &cell))
                .collect::<ScriptResult<Vec<_>>>()?;
            (values, (**a).clone())
        }
        (other, Value::Series(b)) => {
            let cell = operand_cell(other)?;
            let values = b
                .values
                .iter()
                .map(|y| f(&cell, y))
                .collect::<ScriptResult<Vec<_>>>()?;
            (values, (**b).clone())
        }
        _ => {
            return Err(ScriptError::type_error(format!(
                "expected a series operand, got '{}' and '{}'",
                left.type_name(),
                right.type_name()
            )));
        }
    };
    let series = Series::new(template.name, values).with_index(template.index);
    Ok(Value::series(series))
}

fn operand_cell(value: &Value) -> ScriptResult<CellValue> {
    value.to_cell().ok_or_else(|| {
        ScriptError::type_error(format!(
            "cannot combine a series with '{}'",
            value.type_name()
        ))
    })
}

fn table_map(
    table: &Rc<Table>,
    f: impl Fn(&CellValue) -> ScriptResult<CellValue>,
) -> ScriptResult<Value> {
    let columns = table
        .columns
        .iter()
        .map(|c| {
            let values = c.values.iter().map(&f).collect::<ScriptResult<Vec<_>>>()?;
            Ok(Column::new(c.name.clone(), values))
        })
        .collect::<ScriptResult<Vec<_>>>()?;
    Ok(Value::table(Table::new(columns, table.index.clone())))
}

pub fn unary(op: UnaryOp, operand: &Value) -> ScriptResult<Value> {
    match (op, operand) {
        (_, Value::Series(series)) => {
            let values = series
                .values
                .iter()
                .map(|cell| {
                    if cell.is_null() {
                        return Ok(CellValue::Null);
                    }
                    match (op, cell) {
                        (UnaryOp::Invert, CellValue::Bool(b)) => Ok(CellValue::Bool(!b)),
                        _ => unary(op, &Value::from_cell(cell.clone()))?.require_cell(),
                    }
                })
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::series(
                Series::new(series.name.clone(), values).with_index(series.index.clone()),
            ))
        }
        (UnaryOp::Neg, Value::Int(i)) => Ok(i
            .checked_neg()
            .map_or(Value::Float(-(*i as f64)), Value::Int)),
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Pos, Value::Int(_) | Value::Float(_)) => Ok(operand.clone()),
        (UnaryOp::Pos, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (UnaryOp::Invert, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Int(!i64::from(*b))),
        _ => Err(ScriptError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                UnaryOp::Invert => "~",
            },
            operand.type_name()
        ))),
    }
}

/// Evaluate one comparison. Series operands produce boolean masks.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    match op {
        CmpOp::In => return contains(right, left).map(Value::Bool),
        CmpOp::NotIn => return contains(right, left).map(|b| Value::Bool(!b)),
        CmpOp::Is => return Ok(Value::Bool(is_same(left, right))),
        CmpOp::IsNot => return Ok(Value::Bool(!is_same(left, right))),
        _ => {}
    }

    if matches!(left, Value::Series(_)) || matches!(right, Value::Series(_)) {
        return elementwise(left, right, |a, b| Ok(CellValue::Bool(cell_compare(op, a, b))));
    }

    let result = match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        _ => {
            if left.as_f64().is_some_and(f64::is_nan) || right.as_f64().is_some_and(f64::is_nan) {
                false
            } else {
                let ordering = compare_values(left, right)?;
                match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::Le => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }
            }
        }
    };
    Ok(Value::Bool(result))
}

/// Comparison of cells; anything involving a null is false except `!=`.
pub fn cell_compare(op: CmpOp, a: &CellValue, b: &CellValue) -> bool {
    if a.is_null() || b.is_null() {
        return op == CmpOp::NotEq;
    }
    match op {
        CmpOp::Eq => cells_equal(a, b),
        CmpOp::NotEq => !cells_equal(a, b),
        _ => {
            let comparable = matches!(
                (a, b),
                (CellValue::Text(_), CellValue::Text(_))
                    | (CellValue::Timestamp(_), CellValue::Timestamp(_))
            ) || (a.as_f64().is_some() && b.as_f64().is_some());
            if !comparable {
                return false;
            }
            let ordering = a.total_cmp(b);
            match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
    }
}

fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
        (Value::Series(a), Value::Series(b)) => Rc::ptr_eq(a, b),
        (Value::Chart(a), Value::Chart(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

/// Membership test backing `in`.
pub fn contains(container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::List(items) | Value::Tuple(items) => {
            Ok(items.iter().any(|v| values_equal(v, item)))
        }
        Value::Dict(entries) => Ok(entries.iter().any(|(k, _)| values_equal(k, item))),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ScriptError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range { start, stop, step } => Ok(match item {
            Value::Int(i) => {
                let in_bounds = if *step > 0 {
                    i >= start && i < stop
                } else {
                    i <= start && i > stop
                };
                in_bounds && (i - start) % step == 0
            }
            _ => false,
        }),
        Value::Table(table) => Ok(item
            .as_str()
            .is_some_and(|name| table.column(name).is_some())),
        Value::Series(series) => {
            let Some(cell) = item.to_cell() else {
                return Ok(false);
            };
            Ok(series.labels().iter().any(|l| cells_equal(l, &cell)))
        }
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: Vec<CellValue>) -> Value {
        Value::series(Series::new(Some("x".into()), values))
    }

    #[test]
    fn test_integer_arithmetic() {
        assert!(matches!(binary(BinOp::Add, &Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5)));
        assert!(matches!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2)).unwrap(), Value::Float(x) if x == 3.5));
        assert!(matches!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2)).unwrap(), Value::Int(-4)));
        assert!(matches!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(3)).unwrap(), Value::Int(2)));
        assert!(matches!(binary(BinOp::Pow, &Value::Int(10), &Value::Int(15)).unwrap(), Value::Int(1_000_000_000_000_000)));
    }

    #[test]
    fn test_remainder_of_min_by_minus_one_is_zero() {
        let result = binary(BinOp::Mod, &Value::Int(i64::MIN), &Value::Int(-1)).unwrap();
        assert!(matches!(result, Value::Int(0)));
        assert!(matches!(binary(BinOp::Mod, &Value::Int(7), &Value::Int(-3)).unwrap(), Value::Int(-2)));
    }

    #[test]
    fn test_overflow_promotes_to_float() {
        let result = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2)).unwrap();
        assert!(matches!(result, Value::Float(_)));
    }

    #[test]
    fn test_division_by_zero_raises_for_scalars() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.class, crate::script::ErrorClass::ZeroDivision);
    }

    #[test]
    fn test_series_division_by_zero_is_infinite() {
        let s = series(vec![CellValue::Int(1), CellValue::Int(0)]);
        let Value::Series(out) = binary(BinOp::Div, &s, &Value::Int(0)).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(out.values[0], CellValue::Float(f64::INFINITY));
        assert!(out.values[1].is_null());
    }

    #[test]
    fn test_series_comparison_mask() {
        let s = series(vec![CellValue::Int(1), CellValue::Null, CellValue::Int(5)]);
        let Value::Series(mask) = compare(CmpOp::Gt, &s, &Value::Int(2)).unwrap() else {
            panic!("expected series");
        };
        assert_eq!(
            mask.values,
            vec![CellValue::Bool(false), CellValue::Bool(false), CellValue::Bool(true)]
        );
    }

    #[test]
    fn test_string_ops() {
        assert!(matches!(binary(BinOp::Add, &Value::str("a"), &Value::str("b")).unwrap(), Value::Str(s) if s == "ab"));
        assert!(binary(BinOp::Add, &Value::str("a"), &Value::Int(1)).is_err());
        assert!(binary(BinOp::Mul, &Value::str("a"), &Value::Int(i64::MAX)).is_err());
    }

    #[test]
    fn test_membership() {
        let list = Value::List(vec![Value::Int(1), Value::str("b")]);
        assert!(contains(&list, &Value::Float(1.0)).unwrap());
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap());
        assert!(contains(&Value::Range { start: 0, stop: 10, step: 2 }, &Value::Int(4)).unwrap());
        assert!(!contains(&Value::Range { start: 0, stop: 10, step: 2 }, &Value::Int(5)).unwrap());
    }

    #[test]
    fn test_nan_comparisons_are_false() {
        let result = compare(CmpOp::Lt, &Value::Float(f64::NAN), &Value::Int(1)).unwrap();
        assert!(matches!(result, Value::Bool(false)));
    }
}
