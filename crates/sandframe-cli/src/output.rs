//! Formatting of execution results for the terminal and for JSON consumers.

use base64::Engine;
use sandframe_core::dataset::format_timestamp;
use sandframe_core::{CellValue, ExecutionResult, ScalarValue};
use serde_json::{Value as Json, json};

/// JSON form of a result, tagged by `kind`. Image bytes are base64 encoded.
pub fn to_json(result: &ExecutionResult) -> Json {
    match result {
        ExecutionResult::Tabular { columns, rows } => json!({
            "kind": result.kind_name(),
            "columns": columns,
            "rows": rows,
        }),
        ExecutionResult::Scalar { value } => json!({
            "kind": result.kind_name(),
            "value": scalar_json(value),
        }),
        ExecutionResult::Image { data, mime } => json!({
            "kind": result.kind_name(),
            "mime": mime,
            "data": base64::engine::general_purpose::STANDARD.encode(data),
        }),
        ExecutionResult::Markup { html } => json!({
            "kind": result.kind_name(),
            "html": html,
        }),
        ExecutionResult::Error { kind, diagnostic } => json!({
            "kind": result.kind_name(),
            "error": kind,
            "diagnostic": diagnostic,
        }),
    }
}

fn scalar_json(value: &ScalarValue) -> Json {
    match value {
        ScalarValue::None => Json::Null,
        ScalarValue::Bool(b) => json!(b),
        ScalarValue::Integer(i) => json!(i),
        ScalarValue::Float(x) => json!(x),
        ScalarValue::Text(s) => json!(s),
        ScalarValue::Timestamp(ms) => json!(format_timestamp(*ms)),
        ScalarValue::Sequence { json } | ScalarValue::Mapping { json } => {
            serde_json::from_str(json).unwrap_or_else(|_| Json::String(json.clone()))
        }
    }
}

/// Plain-text form of a non-error result.
pub fn render_text(result: &ExecutionResult) -> String {
    match result {
        ExecutionResult::Tabular { columns, rows } => render_table(columns, rows),
        ExecutionResult::Scalar { value } => value.render_text(),
        ExecutionResult::Image { data, mime } => format!("<{} image, {} bytes>", mime, data.len()),
        ExecutionResult::Markup { html } => html.clone(),
        ExecutionResult::Error { kind, diagnostic } => format!("{}: {}", kind, diagnostic),
    }
}

/// Column-aligned table: text left, numbers right.
fn render_table(columns: &[String], rows: &[Vec<CellValue>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let numeric: Vec<bool> = (0..columns.len())
        .map(|i| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .all(|cell| matches!(cell, CellValue::Int(_) | CellValue::Float(_) | CellValue::Null))
        })
        .collect();

    let line = |values: &[String]| {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let width = widths.get(i).copied().unwrap_or(0);
                if numeric.get(i).copied().unwrap_or(false) {
                    format!("{:>width$}", value)
                } else {
                    format!("{:<width$}", value)
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(line(columns));
    lines.extend(cells.iter().map(|row| line(row.as_slice())));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandframe_core::ErrorKind;

    #[test]
    fn test_table_alignment() {
        let text = render_text(&ExecutionResult::Tabular {
            columns: vec!["region".to_string(), "units".to_string()],
            rows: vec![
                vec![CellValue::Text("north".to_string()), CellValue::Int(5)],
                vec![CellValue::Text("east".to_string()), CellValue::Float(12.5)],
                vec![CellValue::Null, CellValue::Null],
            ],
        });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "region  units");
        assert_eq!(lines[1], "north       5");
        assert_eq!(lines[2], "east     12.5");
        assert_eq!(lines[3], "null     null");
    }

    #[test]
    fn test_scalar_json() {
        let json = to_json(&ExecutionResult::scalar(ScalarValue::Integer(5)));
        assert_eq!(json["kind"], "scalar");
        assert_eq!(json["value"], 5);

        let json = to_json(&ExecutionResult::scalar(ScalarValue::Sequence {
            json: "[1,2]".to_string(),
        }));
        assert_eq!(json["value"], json!([1, 2]));
    }

    #[test]
    fn test_image_json_is_base64() {
        let json = to_json(&ExecutionResult::Image {
            data: vec![0x89, b'P', b'N', b'G'],
            mime: "image/png".to_string(),
        });
        assert_eq!(json["mime"], "image/png");
        assert_eq!(json["data"], "iVBORw==");
    }

    #[test]
    fn test_error_json() {
        let json = to_json(&ExecutionResult::error(
            ErrorKind::TimeoutExceeded,
            "execution exceeded 1.0s",
        ));
        assert_eq!(json["kind"], "error");
        assert_eq!(json["error"], "timeout_exceeded");
        assert_eq!(json["diagnostic"], "execution exceeded 1.0s");
    }
}
