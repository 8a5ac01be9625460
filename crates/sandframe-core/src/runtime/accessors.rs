//! `.str` and `.dt` accessors on series, plus attribute lookup on the
//! other accessor objects.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::dataset::CellValue;
use crate::script::{ScriptError, ScriptResult};

use super::args::Args;
use super::frame::{Column, Series, Table};
use super::interp::{Interpreter, not_subscriptable};
use super::plotting;
use super::value::{AccessorKind, SliceBounds, Value};

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "title", "capitalize", "len", "contains",
    "startswith", "endswith", "replace", "split", "slice", "get", "zfill", "count", "isdigit",
    "isnumeric", "isalpha", "find",
];

const DT_METHODS: &[&str] = &["day_name", "month_name", "strftime"];

pub fn attribute(kind: AccessorKind, target: &Value, name: &str) -> ScriptResult<Option<Value>> {
    let method = || {
        Some(Value::Method(
            Box::new(Value::Accessor(kind, Box::new(target.clone()))),
            name.to_string(),
        ))
    };
    Ok(match kind {
        AccessorKind::Str if STR_METHODS.contains(&name) => method(),
        AccessorKind::Dt if DT_METHODS.contains(&name) => method(),
        AccessorKind::Dt => match target {
            Value::Series(s) => date_part(s, name)?.map(Value::series),
            _ => None,
        },
        AccessorKind::Plot if plotting::is_plot_kind(name) => method(),
        _ => None,
    })
}

pub fn call(
    _interp: &mut Interpreter,
    kind: AccessorKind,
    target: &Value,
    name: &str,
    args: Args,
) -> ScriptResult<Value> {
    let Value::Series(series) = target else {
        return Err(ScriptError::attribute(target.type_name(), name));
    };
    match kind {
        AccessorKind::Str => string_method(series, name, &args),
        AccessorKind::Dt => date_method(series, name, &args),
        _ => Err(ScriptError::attribute(target.type_name(), name)),
    }
}

fn text_map(s: &Series, f: impl Fn(&str) -> CellValue) -> Series {
    let values = s
        .values
        .iter()
        .map(|cell| match cell {
            CellValue::Text(text) => f(text),
            _ => CellValue::Null,
        })
        .collect();
    Series::new(s.name.clone(), values).with_index(s.index.clone())
}

fn text(value: String) -> CellValue {
    CellValue::Text(value)
}

fn string_method(s: &Series, name: &str, args: &Args) -> ScriptResult<Value> {
    let chars_arg = match name {
        "strip" | "lstrip" | "rstrip" => args.str(0, "to_strip")?,
        _ => None,
    };
    let strip_set = |c: char| match &chars_arg {
        Some(set) => set.contains(c),
        None => c.is_whitespace(),
    };
    let mapped = match name {
        "lower" => text_map(s, |t| text(t.to_lowercase())),
        "upper" => text_map(s, |t| text(t.to_uppercase())),
        "strip" => text_map(s, |t| text(t.trim_matches(strip_set).to_string())),
        "lstrip" => text_map(s, |t| text(t.trim_start_matches(strip_set).to_string())),
        "rstrip" => text_map(s, |t| text(t.trim_end_matches(strip_set).to_string())),
        "title" => text_map(s, |t| text(title_case(t))),
        "capitalize" => text_map(s, |t| {
            let mut chars = t.chars();
            text(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }),
        "len" => text_map(s, |t| CellValue::Int(t.chars().count() as i64)),
        "contains" => {
            let pattern = args.require_str(0, "pat", name)?;
            let case = args.bool_or(1, "case", true)?;
            let na = args.keyword("na").map(Value::require_cell).transpose()?;
            let matched = if case {
                text_map(s, |t| CellValue::Bool(t.contains(pattern.as_str())))
            } else {
                let lowered = pattern.to_lowercase();
                text_map(s, |t| CellValue::Bool(t.to_lowercase().contains(lowered.as_str())))
            };
            match na {
                Some(na) => {
                    let values = matched
                        .values
                        .into_iter()
                        .map(|v| if v.is_null() { na.clone() } else { v })
                        .collect();
                    Series::new(matched.name, values).with_index(matched.index)
                }
                None => matched,
            }
        }
        "startswith" | "endswith" => {
            let pattern = args.require_str(0, "pat", name)?;
            let starts = name == "startswith";
            text_map(s, |t| {
                CellValue::Bool(if starts { t.starts_with(pattern.as_str()) } else { t.ends_with(pattern.as_str()) })
            })
        }
        "replace" => {
            let pattern = args.require_str(0, "pat", name)?;
            let replacement = args.require_str(1, "repl", name)?;
            text_map(s, |t| text(t.replace(pattern.as_str(), &replacement)))
        }
        "split" => {
            if !args.bool_or(usize::MAX, "expand", false)? {
                return Err(ScriptError::unsupported(
                    "str.split needs expand=True; table cells cannot hold lists",
                ));
            }
            let separator = args.str(0, "pat")?;
            return Ok(Value::table(split_expand(s, separator.as_deref())));
        }
        "slice" => {
            let bounds = SliceBounds {
                start: args.get(0, "start").cloned(),
                stop: args.get(1, "stop").cloned(),
                step: args.get(2, "step").cloned(),
            };
            char_slice(s, &bounds)?
        }
        "get" => {
            let i = args.int(0, "i")?.unwrap_or(0);
            text_map(s, |t| char_at(t, i))
        }
        "zfill" => {
            let width = args.int_or(0, "width", 0)?.max(0) as usize;
            text_map(s, |t| {
                let len = t.chars().count();
                if len >= width {
                    return text(t.to_string());
                }
                let pad = "0".repeat(width - len);
                text(match t.strip_prefix('-') {
                    Some(rest) => format!("-{}{}", pad, rest),
                    None => format!("{}{}", pad, t),
                })
            })
        }
        "count" => {
            let pattern = args.require_str(0, "pat", name)?;
            text_map(s, |t| CellValue::Int(if pattern.is_empty() { 0 } else { t.matches(pattern.as_str()).count() as i64 }))
        }
        "find" => {
            let pattern = args.require_str(0, "sub", name)?;
            text_map(s, |t| {
                CellValue::Int(t.find(pattern.as_str()).map_or(-1, |byte| t[..byte].chars().count() as i64))
            })
        }
        "isdigit" | "isnumeric" => {
            text_map(s, |t| CellValue::Bool(!t.is_empty() && t.chars().all(|c| c.is_numeric())))
        }
        "isalpha" => text_map(s, |t| CellValue::Bool(!t.is_empty() && t.chars().all(char::is_alphabetic))),
        _ => return Err(ScriptError::attribute("StringMethods", name)),
    };
    Ok(Value::series(mapped))
}

fn title_case(t: &str) -> String {
    let mut out = String::with_capacity(t.len());
    let mut boundary = true;
    for c in t.chars() {
        if c.is_alphabetic() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(c);
            boundary = true;
        }
    }
    out
}

fn char_at(t: &str, i: i64) -> CellValue {
    let chars: Vec<char> = t.chars().collect();
    let len = chars.len() as i64;
    let i = if i < 0 { i + len } else { i };
    if (0..len).contains(&i) {
        CellValue::Text(chars[i as usize].to_string())
    } else {
        CellValue::Null
    }
}

fn char_slice(s: &Series, bounds: &SliceBounds) -> ScriptResult<Series> {
    let mut values = Vec::with_capacity(s.len());
    for cell in &s.values {
        values.push(match cell {
            CellValue::Text(t) => {
                let chars: Vec<char> = t.chars().collect();
                CellValue::Text(bounds.positions(chars.len())?.into_iter().map(|p| chars[p]).collect())
            }
            _ => CellValue::Null,
        });
    }
    Ok(Series::new(s.name.clone(), values).with_index(s.index.clone()))
}

fn split_expand(s: &Series, separator: Option<&str>) -> Table {
    let parts: Vec<Vec<String>> = s
        .values
        .iter()
        .map(|cell| match cell {
            CellValue::Text(t) => match separator {
                Some(sep) if !sep.is_empty() => t.split(sep).map(str::to_string).collect(),
                _ => t.split_whitespace().map(str::to_string).collect(),
            },
            _ => Vec::new(),
        })
        .collect();
    let width = parts.iter().map(Vec::len).max().unwrap_or(0);
    let columns = (0..width)
        .map(|i| {
            let values = parts
                .iter()
                .map(|p| p.get(i).map_or(CellValue::Null, |part| CellValue::Text(part.clone())))
                .collect();
            Column::new(i.to_string(), values)
        })
        .collect();
    Table::new(columns, s.index.clone())
}

/// `s.str[0]` / `s.str[:3]`.
pub fn str_subscript(target: &Value, key: &Value) -> ScriptResult<Value> {
    let Value::Series(s) = target else {
        return Err(not_subscriptable(target));
    };
    match key {
        Value::Int(i) => Ok(Value::series(text_map(s, |t| char_at(t, *i)))),
        Value::Slice(bounds) => Ok(Value::series(char_slice(s, bounds)?)),
        other => Err(ScriptError::type_error(format!(
            "string indices must be integers or slices, not '{}'",
            other.type_name()
        ))),
    }
}

fn timestamp_map(s: &Series, f: impl Fn(DateTime<Utc>) -> CellValue) -> Series {
    let values = s
        .values
        .iter()
        .map(|cell| match cell {
            CellValue::Timestamp(ms) => DateTime::<Utc>::from_timestamp_millis(*ms).map_or(CellValue::Null, &f),
            _ => CellValue::Null,
        })
        .collect();
    Series::new(s.name.clone(), values).with_index(s.index.clone())
}

fn date_part(s: &Series, name: &str) -> ScriptResult<Option<Series>> {
    let int = |x: u32| CellValue::Int(i64::from(x));
    let part = match name {
        "year" => timestamp_map(s, |d| CellValue::Int(i64::from(d.year()))),
        "month" => timestamp_map(s, |d| int(d.month())),
        "day" => timestamp_map(s, |d| int(d.day())),
        "hour" => timestamp_map(s, |d| int(d.hour())),
        "minute" => timestamp_map(s, |d| int(d.minute())),
        "second" => timestamp_map(s, |d| int(d.second())),
        "dayofweek" | "weekday" | "day_of_week" => {
            timestamp_map(s, |d| int(d.weekday().num_days_from_monday()))
        }
        "dayofyear" | "day_of_year" => timestamp_map(s, |d| int(d.ordinal())),
        "quarter" => timestamp_map(s, |d| int((d.month() - 1) / 3 + 1)),
        "date" => timestamp_map(s, |d| {
            let midnight = d.timestamp_millis().saturating_sub(d.timestamp_millis().rem_euclid(86_400_000));
            CellValue::Timestamp(midnight)
        }),
        _ => return Ok(None),
    };
    Ok(Some(part))
}

fn date_method(s: &Series, name: &str, args: &Args) -> ScriptResult<Value> {
    let mapped = match name {
        "day_name" => timestamp_map(s, |d| CellValue::Text(d.format("%A").to_string())),
        "month_name" => timestamp_map(s, |d| CellValue::Text(d.format("%B").to_string())),
        "strftime" => {
            let format = args.require_str(0, "date_format", name)?;
            validate_strftime(&format)?;
            timestamp_map(s, |d| CellValue::Text(d.format(&format).to_string()))
        }
        _ => return Err(ScriptError::attribute("DatetimeProperties", name)),
    };
    Ok(Value::series(mapped))
}

/// Reject format strings chrono cannot render instead of panicking on them.
pub(crate) fn validate_strftime(format: &str) -> ScriptResult<()> {
    use chrono::format::{Item, StrftimeItems};
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ScriptError::value(format!("invalid date format '{}'", format)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::frame::Index;

    fn names() -> Series {
        Series::new(
            Some("name".into()),
            vec![CellValue::Text("  Ana ".into()), CellValue::Null, CellValue::Text("bob smith".into())],
        )
    }

    fn str_call(name: &str, args: Args) -> Series {
        match string_method(&names(), name, &args).unwrap() {
            Value::Series(s) => (*s).clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strip_and_case() {
        let stripped = str_call("strip", Args::default());
        assert_eq!(stripped.values[0], CellValue::Text("Ana".into()));
        assert!(stripped.values[1].is_null());
        let titled = str_call("title", Args::default());
        assert_eq!(titled.values[2], CellValue::Text("Bob Smith".into()));
    }

    #[test]
    fn test_contains_is_substring_match() {
        let found = str_call("contains", Args::positional(vec![Value::str("smi")]));
        assert_eq!(found.values[2], CellValue::Bool(true));
        assert_eq!(found.values[0], CellValue::Bool(false));
        let args = Args::new(vec![Value::str("ANA")], vec![("case".into(), Value::Bool(false))]);
        assert_eq!(str_call("contains", args).values[0], CellValue::Bool(true));
    }

    #[test]
    fn test_split_requires_expand() {
        assert!(string_method(&names(), "split", &Args::default()).is_err());
        let args = Args::new(vec![Value::str(" ")], vec![("expand".into(), Value::Bool(true))]);
        let Value::Table(parts) = string_method(&names(), "split", &args).unwrap() else {
            panic!("expected a table");
        };
        assert_eq!(parts.num_rows(), 3);
    }

    #[test]
    fn test_date_parts() {
        // 2024-03-15 12:30:00 UTC
        let s = Series::new(None, vec![CellValue::Timestamp(1_710_505_800_000), CellValue::Null])
            .with_index(Some(Index::new(None, vec![CellValue::Int(0), CellValue::Int(1)])));
        let year = date_part(&s, "year").unwrap().unwrap();
        assert_eq!(year.values, vec![CellValue::Int(2024), CellValue::Null]);
        assert_eq!(date_part(&s, "quarter").unwrap().unwrap().values[0], CellValue::Int(1));
        let Value::Series(days) = date_method(&s, "day_name", &Args::default()).unwrap() else {
            panic!("expected a series");
        };
        assert_eq!(days.values[0], CellValue::Text("Friday".into()));
    }

    #[test]
    fn test_bad_strftime_is_rejected() {
        assert!(validate_strftime("%Y-%m").is_ok());
        assert!(validate_strftime("%Q").is_err());
    }
}
