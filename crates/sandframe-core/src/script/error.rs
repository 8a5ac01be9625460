//! Faults raised while parsing or evaluating a script.

use std::fmt;

use thiserror::Error;

/// Broad class of a script fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Syntax,
    Name,
    Type,
    Value,
    Key,
    Index,
    Attribute,
    ZeroDivision,
    Import,
    Unsupported,
    Recursion,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Syntax => "syntax error",
            ErrorClass::Name => "name error",
            ErrorClass::Type => "type error",
            ErrorClass::Value => "value error",
            ErrorClass::Key => "key error",
            ErrorClass::Index => "index error",
            ErrorClass::Attribute => "attribute error",
            ErrorClass::ZeroDivision => "division by zero",
            ErrorClass::Import => "import denied",
            ErrorClass::Unsupported => "unsupported",
            ErrorClass::Recursion => "recursion limit",
            ErrorClass::Internal => "internal error",
        })
    }
}

/// A fault with the line it was raised on, when known.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{class}: {message}")]
pub struct ScriptError {
    pub class: ErrorClass,
    pub message: String,
    pub line: Option<usize>,
}

/// Result type for script parsing and evaluation.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

impl ScriptError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            line: None,
        }
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(ErrorClass::Syntax, message).at_line(line)
    }

    pub fn name(name: &str) -> Self {
        Self::new(ErrorClass::Name, format!("name '{}' is not defined", name))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Type, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Value, message)
    }

    pub fn key(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Key, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Index, message)
    }

    pub fn attribute(type_name: &str, attr: &str) -> Self {
        Self::new(
            ErrorClass::Attribute,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    pub fn zero_division() -> Self {
        Self::new(ErrorClass::ZeroDivision, "division by zero")
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unsupported, message)
    }

    /// Attach a line number unless one is already set.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Diagnostic text: the fault plus the offending source line.
    pub fn trace(&self, source: &str) -> String {
        let mut text = self.to_string();
        if let Some(line) = self.line {
            let code = source.lines().nth(line.saturating_sub(1)).unwrap_or("").trim();
            text.push_str(&format!("\n  at line {}: {}", line, code));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_includes_source_line() {
        let err = ScriptError::name("foo").at_line(2);
        let trace = err.trace("x = 1\nresult = foo + x\n");
        assert_eq!(
            trace,
            "name error: name 'foo' is not defined\n  at line 2: result = foo + x"
        );
    }

    #[test]
    fn test_at_line_keeps_first_line() {
        let err = ScriptError::zero_division().at_line(3).at_line(9);
        assert_eq!(err.line, Some(3));
    }
}
