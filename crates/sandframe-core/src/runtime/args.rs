//! Call arguments and typed accessors for them.

use crate::script::{ScriptError, ScriptResult};

use super::value::Value;

/// Positional and keyword arguments of one call.
///
/// Parameters are addressed by position and name at once, so `head(3)` and
/// `head(n=3)` read the same way. An explicit `None` counts as absent.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn positional(values: Vec<Value>) -> Self {
        Self::new(values, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .or_else(|| self.positional.get(index))
            .filter(|v| !v.is_none())
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.get(usize::MAX, name)
    }

    pub fn require(&self, index: usize, name: &str, func: &str) -> ScriptResult<&Value> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() missing required argument: '{}'",
                func, name
            ))
        })
    }

    pub fn str(&self, index: usize, name: &str) -> ScriptResult<Option<String>> {
        match self.get(index, name) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_type(name, "str", other)),
        }
    }

    pub fn require_str(&self, index: usize, name: &str, func: &str) -> ScriptResult<String> {
        match self.require(index, name, func)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(wrong_type(name, "str", other)),
        }
    }

    pub fn bool_or(&self, index: usize, name: &str, default: bool) -> ScriptResult<bool> {
        match self.get(index, name) {
            None => Ok(default),
            Some(value) => value.truthy(),
        }
    }

    pub fn int(&self, index: usize, name: &str) -> ScriptResult<Option<i64>> {
        match self.get(index, name) {
            None => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(Value::Bool(b)) => Ok(Some(i64::from(*b))),
            Some(Value::Float(x)) if x.fract() == 0.0 => Ok(Some(*x as i64)),
            Some(other) => Err(wrong_type(name, "int", other)),
        }
    }

    pub fn int_or(&self, index: usize, name: &str, default: i64) -> ScriptResult<i64> {
        Ok(self.int(index, name)?.unwrap_or(default))
    }

    pub fn f64(&self, index: usize, name: &str) -> ScriptResult<Option<f64>> {
        match self.get(index, name) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| wrong_type(name, "float", value)),
        }
    }

    /// A column name or a list of column names.
    pub fn names(&self, index: usize, name: &str) -> ScriptResult<Option<Vec<String>>> {
        match self.get(index, name) {
            None => Ok(None),
            Some(value) => names_of(value).map(Some),
        }
    }

    /// `axis=1` / `axis='columns'`.
    pub fn axis_is_columns(&self, index: usize) -> ScriptResult<bool> {
        match self.get(index, "axis") {
            None => Ok(false),
            Some(Value::Int(i)) => Ok(*i == 1),
            Some(Value::Str(s)) => Ok(s == "columns"),
            Some(other) => Err(wrong_type("axis", "int", other)),
        }
    }
}

/// Accept a single name or a list/tuple of names.
pub fn names_of(value: &Value) -> ScriptResult<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|item| match item {
                Value::Str(s) => Ok(s.clone()),
                other => Err(ScriptError::type_error(format!(
                    "column names must be strings, got '{}'",
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(ScriptError::type_error(format!(
            "expected a column name or list of names, got '{}'",
            other.type_name()
        ))),
    }
}

fn wrong_type(name: &str, expected: &str, got: &Value) -> ScriptError {
    ScriptError::type_error(format!(
        "argument '{}' must be {}, not '{}'",
        name,
        expected,
        got.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_wins_over_position() {
        let args = Args::new(
            vec![Value::Int(3)],
            vec![("n".to_string(), Value::Int(7))],
        );
        assert_eq!(args.int(0, "n").unwrap(), Some(7));
    }

    #[test]
    fn test_explicit_none_is_absent() {
        let args = Args::positional(vec![Value::None]);
        assert!(args.get(0, "by").is_none());
        assert_eq!(args.int_or(0, "n", 5).unwrap(), 5);
    }

    #[test]
    fn test_names_accepts_str_or_list() {
        let single = Args::positional(vec![Value::str("a")]);
        assert_eq!(single.names(0, "by").unwrap(), Some(vec!["a".to_string()]));
        let list = Args::positional(vec![Value::List(vec![Value::str("a"), Value::str("b")])]);
        assert_eq!(list.names(0, "by").unwrap().unwrap().len(), 2);
        let bad = Args::positional(vec![Value::Int(1)]);
        assert!(bad.names(0, "by").is_err());
    }

    #[test]
    fn test_require_reports_function() {
        let err = Args::default().require(0, "func", "apply").unwrap_err();
        assert!(err.message.contains("apply()"));
    }
}
