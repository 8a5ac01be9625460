//! Methods, attributes and subscripts of plain values: strings, lists,
//! tuples, dicts, timestamps and numbers.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::script::{ScriptError, ScriptResult};

use super::accessors::validate_strftime;
use super::args::Args;
use super::format::format_template;
use super::interp::{Interpreter, not_subscriptable};
use super::table::sequence_index;
use super::value::{Value, range_len, values_equal};

const STR_METHODS: &[&str] = &[
    "lower", "upper", "strip", "lstrip", "rstrip", "title", "capitalize", "replace", "split",
    "rsplit", "join", "startswith", "endswith", "find", "count", "format", "zfill", "isdigit",
    "isnumeric", "isalpha", "isalnum", "isupper", "islower", "center", "ljust", "rjust",
    "splitlines",
];
const LIST_METHODS: &[&str] = &["index", "count", "copy"];
const LIST_MUTATORS: &[&str] = &["append", "extend", "insert", "pop", "remove", "sort", "reverse", "clear"];
const DICT_METHODS: &[&str] = &["keys", "values", "items", "get", "copy"];
const TIMESTAMP_METHODS: &[&str] = &["strftime", "isoformat", "day_name", "month_name", "date", "weekday"];

pub fn attribute(value: &Value, name: &str) -> ScriptResult<Option<Value>> {
    let method = || Some(Value::Method(Box::new(value.clone()), name.to_string()));
    Ok(match value {
        Value::Str(_) if STR_METHODS.contains(&name) => method(),
        Value::List(_) if LIST_METHODS.contains(&name) || LIST_MUTATORS.contains(&name) => method(),
        Value::Tuple(_) if matches!(name, "index" | "count") => method(),
        Value::Dict(_) if DICT_METHODS.contains(&name) => method(),
        Value::Timestamp(_) if TIMESTAMP_METHODS.contains(&name) => method(),
        Value::Timestamp(ms) => timestamp_field(*ms, name)?,
        Value::Float(_) if name == "is_integer" => method(),
        Value::Float(x) if name == "real" => Some(Value::Float(*x)),
        Value::Int(i) if name == "real" => Some(Value::Int(*i)),
        _ => None,
    })
}

fn datetime(ms: i64) -> ScriptResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| ScriptError::value(format!("timestamp {} is out of range", ms)))
}

fn timestamp_field(ms: i64, name: &str) -> ScriptResult<Option<Value>> {
    let d = datetime(ms)?;
    let int = |x: u32| Some(Value::Int(i64::from(x)));
    Ok(match name {
        "year" => Some(Value::Int(i64::from(d.year()))),
        "month" => int(d.month()),
        "day" => int(d.day()),
        "hour" => int(d.hour()),
        "minute" => int(d.minute()),
        "second" => int(d.second()),
        "dayofweek" | "day_of_week" => int(d.weekday().num_days_from_monday()),
        "dayofyear" | "day_of_year" => int(d.ordinal()),
        "quarter" => int((d.month() - 1) / 3 + 1),
        _ => None,
    })
}

pub fn call(_interp: &mut Interpreter, value: &Value, name: &str, args: Args) -> ScriptResult<Value> {
    match value {
        Value::Str(s) => string_method(s, name, &args),
        Value::List(_) if LIST_MUTATORS.contains(&name) => Err(ScriptError::unsupported(format!(
                "list.{}() mutates in place; build a new list instead (e.g. items = items + [x])",
                name
            ))),
        Value::List(items) | Value::Tuple(items) => sequence_method(value, items, name, &args),
        Value::Dict(entries) => dict_method(entries, name, &args),
        Value::Timestamp(ms) => timestamp_method(*ms, name, &args),
        Value::Float(x) if name == "is_integer" => Ok(Value::Bool(x.fract() == 0.0)),
        other => Err(ScriptError::attribute(other.type_name(), name)),
    }
}

fn string_method(s: &str, name: &str, args: &Args) -> ScriptResult<Value> {
    Ok(match name {
        "lower" => Value::str(s.to_lowercase()),
        "upper" => Value::str(s.to_uppercase()),
        "strip" | "lstrip" | "rstrip" => {
            let chars = args.str(0, "chars")?;
            let test = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::str(match name {
                "strip" => s.trim_matches(test),
                "lstrip" => s.trim_start_matches(test),
                _ => s.trim_end_matches(test),
            })
        }
        "title" => Value::str(title_case(s)),
        "capitalize" => {
            let mut chars = s.chars();
            Value::str(match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            })
        }
        "replace" => {
            let old = args.require_str(0, "old", name)?;
            let new = args.require_str(1, "new", name)?;
            match args.int(2, "count")? {
                Some(n) if n >= 0 => Value::str(s.replacen(old.as_str(), &new, n as usize)),
                _ => Value::str(s.replace(old.as_str(), &new)),
            }
        }
        "split" | "rsplit" => {
            let separator = args.str(0, "sep")?;
            let limit = args.int(1, "maxsplit")?.filter(|n| *n >= 0).map(|n| n as usize + 1);
            let parts: Vec<String> = match (separator.as_deref(), limit) {
                (Some(""), _) => return Err(ScriptError::value("empty separator")),
                (Some(sep), Some(n)) if name == "rsplit" => {
                    let mut parts: Vec<String> = s.rsplitn(n, sep).map(str::to_string).collect();
                    parts.reverse();
                    parts
                }
                (Some(sep), Some(n)) => s.splitn(n, sep).map(str::to_string).collect(),
                (Some(sep), None) => s.split(sep).map(str::to_string).collect(),
                (None, _) => s.split_whitespace().map(str::to_string).collect(),
            };
            Value::List(parts.into_iter().map(Value::Str).collect())
        }
        "splitlines" => Value::List(s.lines().map(Value::str).collect()),
        "join" => {
            let items = args.require(0, "iterable", name)?.iterate()?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(part) => parts.push(part),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "sequence item: expected str instance, {} found",
                            other.type_name()
                        )));
                    }
                }
            }
            Value::str(parts.join(s))
        }
        "startswith" | "endswith" => {
            let prefixes = match args.require(0, "prefix", name)? {
                Value::Tuple(options) => options.iter().filter_map(Value::as_str).map(str::to_string).collect(),
                Value::Str(single) => vec![single.clone()],
                other => {
                    return Err(ScriptError::type_error(format!(
                        "{} first arg must be str or a tuple of str, not {}",
                        name,
                        other.type_name()
                    )));
                }
            };
            let starts = name == "startswith";
            Value::Bool(prefixes.iter().any(|p| {
                if starts { s.starts_with(p.as_str()) } else { s.ends_with(p.as_str()) }
            }))
        }
        "find" => {
            let needle = args.require_str(0, "sub", name)?;
            Value::Int(s.find(needle.as_str()).map_or(-1, |byte| s[..byte].chars().count() as i64))
        }
        "count" => {
            let needle = args.require_str(0, "sub", name)?;
            Value::Int(if needle.is_empty() {
                s.chars().count() as i64 + 1
            } else {
                s.matches(needle.as_str()).count() as i64
            })
        }
        "format" => Value::Str(format_template(s, &args.positional, &args.keywords)?),
        "zfill" => {
            let width = args.int_or(0, "width", 0)?.max(0) as usize;
            let len = s.chars().count();
            if len >= width {
                Value::str(s)
            } else {
                let pad = "0".repeat(width - len);
                Value::str(match s.strip_prefix(['-', '+']) {
                    Some(rest) => format!("{}{}{}", &s[..1], pad, rest),
                    None => format!("{}{}", pad, s),
                })
            }
        }
        "center" | "ljust" | "rjust" => {
            let width = args.int_or(0, "width", 0)?.max(0) as usize;
            let fill = match args.str(1, "fillchar")? {
                Some(f) if f.chars().count() == 1 => f,
                Some(_) => return Err(ScriptError::type_error("the fill character must be exactly one character long")),
                None => " ".to_string(),
            };
            let missing = width.saturating_sub(s.chars().count());
            Value::str(match name {
                "ljust" => format!("{}{}", s, fill.repeat(missing)),
                "rjust" => format!("{}{}", fill.repeat(missing), s),
                _ => {
                    let right = missing / 2;
                    format!("{}{}{}", fill.repeat(missing - right), s, fill.repeat(right))
                }
            })
        }
        "isdigit" | "isnumeric" => Value::Bool(!s.is_empty() && s.chars().all(char::is_numeric)),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        "isalnum" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphanumeric)),
        "isupper" => Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_lowercase)),
        "islower" => Value::Bool(s.chars().any(char::is_alphabetic) && !s.chars().any(char::is_uppercase)),
        _ => return Err(ScriptError::attribute("str", name)),
    })
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
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

fn sequence_method(value: &Value, items: &[Value], name: &str, args: &Args) -> ScriptResult<Value> {
    match name {
        "index" => {
            let needle = args.require(0, "value", name)?;
            items
                .iter()
                .position(|item| values_equal(item, needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| ScriptError::value(format!("{} is not in {}", needle.repr(), value.type_name())))
        }
        "count" => {
            let needle = args.require(0, "value", name)?;
            Ok(Value::Int(items.iter().filter(|item| values_equal(item, needle)).count() as i64))
        }
        "copy" => Ok(value.clone()),
        _ => Err(ScriptError::attribute(value.type_name(), name)),
    }
}

fn dict_method(entries: &[(Value, Value)], name: &str, args: &Args) -> ScriptResult<Value> {
    Ok(match name {
        "keys" => Value::List(entries.iter().map(|(k, _)| k.clone()).collect()),
        "values" => Value::List(entries.iter().map(|(_, v)| v.clone()).collect()),
        "items" => Value::List(
            entries
                .iter()
                .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                .collect(),
        ),
        "get" => {
            let key = args.require(0, "key", name)?;
            entries
                .iter()
                .find(|(k, _)| values_equal(k, key))
                .map(|(_, v)| v.clone())
                .or_else(|| args.positional.get(1).cloned())
                .unwrap_or(Value::None)
        }
        "copy" => Value::Dict(entries.to_vec()),
        _ => return Err(ScriptError::attribute("dict", name)),
    })
}

fn timestamp_method(ms: i64, name: &str, args: &Args) -> ScriptResult<Value> {
    let d = datetime(ms)?;
    Ok(match name {
        "strftime" => {
            let format = args.require_str(0, "format", name)?;
            validate_strftime(&format)?;
            Value::str(d.format(&format).to_string())
        }
        "isoformat" => Value::str(d.format("%Y-%m-%dT%H:%M:%S").to_string()),
        "day_name" => Value::str(d.format("%A").to_string()),
        "month_name" => Value::str(d.format("%B").to_string()),
        "date" => Value::Timestamp(ms.saturating_sub(ms.rem_euclid(86_400_000))),
        "weekday" => Value::Int(i64::from(d.weekday().num_days_from_monday())),
        _ => return Err(ScriptError::attribute("Timestamp", name)),
    })
}

/// An integer position into a sequence of `len` items.
pub(crate) fn sequence_position(key: &Value, len: usize) -> ScriptResult<usize> {
    match key {
        Value::Int(i) => sequence_index(*i, len),
        Value::Bool(b) => sequence_index(i64::from(*b), len),
        other => Err(ScriptError::type_error(format!(
            "indices must be integers, not '{}'",
            other.type_name()
        ))),
    }
}

pub fn subscript(value: &Value, key: &Value) -> ScriptResult<Value> {
    match value {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match key {
                Value::Slice(bounds) => Ok(Value::Str(
                    bounds.positions(chars.len())?.into_iter().map(|p| chars[p]).collect(),
                )),
                _ => Ok(Value::Str(chars[sequence_position(key, chars.len())?].to_string())),
            }
        }
        Value::List(items) | Value::Tuple(items) => match key {
            Value::Slice(bounds) => {
                let picked = bounds
                    .positions(items.len())?
                    .into_iter()
                    .map(|p| items[p].clone())
                    .collect();
                Ok(match value {
                    Value::Tuple(_) => Value::Tuple(picked),
                    _ => Value::List(picked),
                })
            }
            _ => Ok(items[sequence_position(key, items.len())?].clone()),
        },
        Value::Dict(entries) => entries
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ScriptError::key(key.repr())),
        Value::Range { start, stop, step } => {
            let len = range_len(*start, *stop, *step).max(0) as usize;
            let position = sequence_position(key, len)? as i64;
            Ok(Value::Int(start + position * step))
        }
        other => Err(not_subscriptable(other)),
    }
}
