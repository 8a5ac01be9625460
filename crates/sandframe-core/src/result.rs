//! The tagged result returned for every execution.

use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

use crate::dataset::{CellValue, format_float, format_timestamp};

/// Classification of a failed execution.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, serde::Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The worker process could not be created.
    SpawnFailure,
    /// The worker exceeded its deadline and was terminated.
    TimeoutExceeded,
    /// The script raised while executing.
    RuntimeFault,
    /// A result could not cross the process boundary.
    SerializationFailure,
    /// The worker exited without producing a result.
    NoOutput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SpawnFailure => "spawn failure",
            ErrorKind::TimeoutExceeded => "timeout exceeded",
            ErrorKind::RuntimeFault => "runtime fault",
            ErrorKind::SerializationFailure => "serialization failure",
            ErrorKind::NoOutput => "no output",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A primitive output value.
///
/// Sequences and mappings travel as JSON text so the wire format stays flat.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ScalarValue {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
    /// Ordered sequence encoded as a JSON array.
    Sequence { json: String },
    /// Key-ordered mapping encoded as a JSON object.
    Mapping { json: String },
}

impl ScalarValue {
    /// Human-readable text for inline display.
    pub fn render_text(&self) -> String {
        match self {
            ScalarValue::None => "None".to_string(),
            ScalarValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            ScalarValue::Integer(i) => i.to_string(),
            ScalarValue::Float(x) => format_float(*x),
            ScalarValue::Text(s) => s.clone(),
            ScalarValue::Timestamp(ms) => format_timestamp(*ms),
            ScalarValue::Sequence { json } | ScalarValue::Mapping { json } => json.clone(),
        }
    }
}

/// Outcome of one execution request. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// A homogeneous table with named columns and ordered rows.
    Tabular {
        columns: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    },
    /// A primitive value.
    Scalar { value: ScalarValue },
    /// Raster image bytes.
    Image { data: Vec<u8>, mime: String },
    /// Pre-rendered, self-contained markup (SVG or HTML).
    Markup { html: String },
    /// The execution failed.
    Error { kind: ErrorKind, diagnostic: String },
}

impl ExecutionResult {
    /// Build an error result.
    pub fn error(kind: ErrorKind, diagnostic: impl Into<String>) -> Self {
        ExecutionResult::Error {
            kind,
            diagnostic: diagnostic.into(),
        }
    }

    /// Build a scalar result.
    pub fn scalar(value: ScalarValue) -> Self {
        ExecutionResult::Scalar { value }
    }

    /// Short name of the active variant.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExecutionResult::Tabular { .. } => "tabular",
            ExecutionResult::Scalar { .. } => "scalar",
            ExecutionResult::Image { .. } => "image",
            ExecutionResult::Markup { .. } => "markup",
            ExecutionResult::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error { .. })
    }

    /// The error kind, if this is an error result.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionResult::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Degrade any result into its plain-text form.
    ///
    /// Used when the full result cannot cross the process boundary.
    pub fn into_text_fallback(self) -> ExecutionResult {
        let text = match self {
            ExecutionResult::Tabular { columns, rows } => {
                format!("table with {} columns and {} rows: {}", columns.len(), rows.len(), columns.join(", "))
            }
            ExecutionResult::Scalar { value } => value.render_text(),
            ExecutionResult::Image { data, mime } => format!("<{} image, {} bytes>", mime, data.len()),
            ExecutionResult::Markup { html } => format!("<markup, {} bytes>", html.len()),
            error @ ExecutionResult::Error { .. } => return error,
        };
        ExecutionResult::scalar(ScalarValue::Text(truncate_chars(text, FALLBACK_TEXT_LIMIT)))
    }
}

/// Upper bound on the length of degraded text results.
const FALLBACK_TEXT_LIMIT: usize = 64 * 1024;

fn truncate_chars(mut text: String, limit: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(limit) {
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_fallback_summarizes_tables() {
        let result = ExecutionResult::Tabular {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![CellValue::Int(1), CellValue::Int(2)]],
        };
        match result.into_text_fallback() {
            ExecutionResult::Scalar {
                value: ScalarValue::Text(text),
            } => assert_eq!(text, "table with 2 columns and 1 rows: a, b"),
            other => panic!("unexpected fallback: {:?}", other),
        }
    }

    #[test]
    fn test_text_fallback_keeps_errors() {
        let error = ExecutionResult::error(ErrorKind::NoOutput, "gone");
        assert_eq!(error.clone().into_text_fallback(), error);
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo".to_string(), 2), "hé...");
        assert_eq!(truncate_chars("hi".to_string(), 5), "hi");
    }
}
