//! Format-spec handling for f-strings, `str.format` and `format()`.

use crate::script::{ScriptError, ScriptResult};

use super::value::Value;

#[derive(Debug, Default, PartialEq)]
struct Spec {
    fill: Option<char>,
    align: Option<char>,
    sign: Option<char>,
    zero: bool,
    width: Option<usize>,
    grouping: bool,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_spec(spec: &str) -> ScriptResult<Spec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = Some(chars[0]);
        parsed.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        parsed.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        parsed.width = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if matches!(chars.get(i), Some(',') | Some('_')) {
        parsed.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return Err(ScriptError::value(format!("format specifier missing precision: '{}'", spec)));
        }
        parsed.precision = chars[start..i].iter().collect::<String>().parse().ok();
    }
    if let Some(&c) = chars.get(i) {
        parsed.kind = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(ScriptError::value(format!("invalid format specifier '{}'", spec)));
    }
    Ok(parsed)
}

/// Apply a format spec to a value, like Python's `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return Ok(value.to_text());
    }
    let spec = parse_spec(spec)?;

    let body = match (spec.kind, value) {
        (Some('s'), _) | (None, Value::Str(_)) => {
            let text = value.to_text();
            match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            }
        }
        (Some('d'), Value::Int(i)) => group(&i.unsigned_abs().to_string(), spec.grouping, *i < 0, spec.sign),
        (Some('d'), Value::Bool(b)) => i64::from(*b).to_string(),
        (Some(kind @ ('f' | 'F' | '%' | 'e' | 'E' | 'g' | 'G' | 'n')), v) => {
            let x = v.as_f64().ok_or_else(|| unknown_code(kind, v))?;
            float_body(x, kind, spec.precision, spec.grouping, spec.sign)
        }
        (None, v) if v.as_f64().is_some() => {
            let x = v.as_f64().unwrap_or_default();
            match (spec.precision, v) {
                (Some(p), _) => float_body(x, 'g', Some(p), spec.grouping, spec.sign),
                (None, Value::Int(i)) => {
                    group(&i.unsigned_abs().to_string(), spec.grouping, *i < 0, spec.sign)
                }
                _ => {
                    let text = value.to_text();
                    if spec.grouping {
                        float_body(x, 'f', Some(decimals(&text)), true, spec.sign)
                    } else {
                        signed(text, x < 0.0, spec.sign)
                    }
                }
            }
        }
        (None, v) => v.to_text(),
        (Some(kind), v) => return Err(unknown_code(kind, v)),
    };

    Ok(pad(body, &spec, value.as_f64().is_some() && !matches!(value, Value::Str(_))))
}

fn unknown_code(kind: char, value: &Value) -> ScriptError {
    ScriptError::value(format!(
        "unknown format code '{}' for object of type '{}'",
        kind,
        value.type_name()
    ))
}

fn decimals(text: &str) -> usize {
    text.split_once('.').map_or(0, |(_, frac)| frac.len())
}

fn float_body(x: f64, kind: char, precision: Option<usize>, grouping: bool, sign: Option<char>) -> String {
    let precision = precision.unwrap_or(6);
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return signed("inf".to_string(), x < 0.0, sign);
    }
    let negative = x < 0.0;
    let x = x.abs();
    let text = match kind {
        '%' => format!("{:.*}%", precision, x * 100.0),
        'e' | 'E' => {
            let raw = format!("{:.*e}", precision, x);
            let formatted = python_exponent(&raw);
            if kind == 'E' { formatted.to_uppercase() } else { formatted }
        }
        'g' | 'G' | 'n' => {
            let p = precision.max(1);
            let exponent = if x == 0.0 { 0 } else { x.log10().floor() as i32 };
            if exponent < -4 || exponent >= p as i32 {
                python_exponent(&format!("{:.*e}", p - 1, x))
            } else {
                let fixed = format!("{:.*}", (p as i32 - 1 - exponent).max(0) as usize, x);
                if fixed.contains('.') {
                    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
                } else {
                    fixed
                }
            }
        }
        _ => format!("{:.*}", precision, x),
    };
    let text = if grouping {
        match text.split_once('.') {
            Some((int, frac)) => format!("{}.{}", insert_commas(int), frac),
            None => match text.strip_suffix('%') {
                Some(int) => format!("{}%", insert_commas(int)),
                None => insert_commas(&text),
            },
        }
    } else {
        text
    };
    signed(text, negative, sign)
}

/// Rust writes `1.5e3`; Python writes `1.5e+03`.
fn python_exponent(raw: &str) -> String {
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw.to_string(),
    }
}

fn group(digits: &str, grouping: bool, negative: bool, sign: Option<char>) -> String {
    let body = if grouping { insert_commas(digits) } else { digits.to_string() };
    signed(body, negative, sign)
}

fn signed(body: String, negative: bool, sign: Option<char>) -> String {
    let body = body.trim_start_matches('-').to_string();
    match (negative, sign) {
        (true, _) => format!("-{}", body),
        (false, Some('+')) => format!("+{}", body),
        (false, Some(' ')) => format!(" {}", body),
        _ => body,
    }
}

fn insert_commas(digits: &str) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::new();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*c);
    }
    out
}

fn pad(body: String, spec: &Spec, numeric: bool) -> String {
    let Some(width) = spec.width else {
        return body;
    };
    let len = body.chars().count();
    if len >= width {
        return body;
    }
    let missing = width - len;
    if spec.zero && spec.align.is_none() && numeric {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None => ("", body.clone()),
        };
        return format!("{}{}{}", sign, "0".repeat(missing), digits);
    }
    let fill = spec.fill.unwrap_or(' ').to_string();
    let align = spec.align.unwrap_or(if numeric { '>' } else { '<' });
    match align {
        '>' | '=' => format!("{}{}", fill.repeat(missing), body),
        '^' => {
            let left = missing / 2;
            format!("{}{}{}", fill.repeat(left), body, fill.repeat(missing - left))
        }
        _ => format!("{}{}", body, fill.repeat(missing)),
    }
}

/// `"{} of {name:.1f}".format(...)`.
pub fn format_template(template: &str, args: &[Value], keywords: &[(String, Value)]) -> ScriptResult<String> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => {
                            return Err(ScriptError::value("unmatched '{' in format string"));
                        }
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((name, spec)) => (name.trim(), spec),
                    None => (field.trim(), ""),
                };
                let name = name.trim_end_matches("!r").trim_end_matches("!s");
                let value = if name.is_empty() {
                    let value = args.get(auto_index);
                    auto_index += 1;
                    value
                } else if let Ok(position) = name.parse::<usize>() {
                    args.get(position)
                } else {
                    keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
                };
                let value = value.ok_or_else(|| {
                    ScriptError::index(format!("replacement field '{}' has no argument", name))
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            '}' => return Err(ScriptError::value("single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_value(&value, spec).unwrap()
    }

    #[test]
    fn test_fixed_and_percent() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Float(0.256), ".1%"), "25.6%");
        assert_eq!(fmt(Value::Int(5), ".2f"), "5.00");
        assert_eq!(fmt(Value::Float(-1.5), "+.1f"), "-1.5");
        assert_eq!(fmt(Value::Float(1.5), "+.1f"), "+1.5");
    }

    #[test]
    fn test_grouping() {
        assert_eq!(fmt(Value::Int(1234567), ","), "1,234,567");
        assert_eq!(fmt(Value::Float(1234.5), ",.2f"), "1,234.50");
        assert_eq!(fmt(Value::Int(-1000), ","), "-1,000");
    }

    #[test]
    fn test_width_and_alignment() {
        assert_eq!(fmt(Value::Int(42), "5"), "   42");
        assert_eq!(fmt(Value::str("ab"), "5"), "ab   ");
        assert_eq!(fmt(Value::str("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::Int(7), "03"), "007");
        assert_eq!(fmt(Value::Int(-7), "04d"), "-007");
    }

    #[test]
    fn test_exponent_and_general() {
        assert_eq!(fmt(Value::Float(12345.678), ".2e"), "1.23e+04");
        assert_eq!(fmt(Value::Float(0.0001234), ".3g"), "0.000123");
        assert_eq!(fmt(Value::Float(1234567.0), ".3g"), "1.23e+06");
    }

    #[test]
    fn test_bad_spec() {
        assert!(format_value(&Value::str("x"), ".2f").is_err());
        assert!(format_value(&Value::Float(1.0), ".f").is_err());
    }

    #[test]
    fn test_template() {
        let text = format_template(
            "{} rows, mean {avg:.1f} ({{ok}})",
            &[Value::Int(3)],
            &[("avg".to_string(), Value::Float(2.26))],
        )
        .unwrap();
        assert_eq!(text, "3 rows, mean 2.3 ({ok})");
    }
}
