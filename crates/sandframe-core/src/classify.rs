//! Mapping of a script's output value onto an [`ExecutionResult`].

use serde_json::{Map, Number};

use crate::config::{ChartOutput, WorkerOptions};
use crate::dataset::format_timestamp;
use crate::render::Render;
use crate::result::{ExecutionResult, ScalarValue};
use crate::runtime::value::Value;

/// What an output value can be presented as. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// A figure: rendered to SVG markup or a PNG image.
    Chart,
    /// A styled table: rendered to HTML.
    Styled,
    /// A table or series.
    Tabular,
    /// Numbers, text, booleans, timestamps, None and plain containers.
    Primitive,
    /// Has a meaningful textual form but no structured one.
    Described,
    /// Functions, modules and other values with nothing to show.
    Opaque,
}

impl Capability {
    pub fn of(value: &Value) -> Capability {
        match value {
            Value::Chart(_) => Capability::Chart,
            Value::Styled(_) => Capability::Styled,
            Value::Table(_) | Value::Series(_) => Capability::Tabular,
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Timestamp(_)
            | Value::List(_)
            | Value::Tuple(_)
            | Value::Dict(_) => Capability::Primitive,
            Value::Range { .. } | Value::GroupBy(_) | Value::Slice(_) | Value::Accessor(..) => {
                Capability::Described
            }
            Value::Builtin(_) | Value::Namespace(_) | Value::Method(..) | Value::Lambda(_) => {
                Capability::Opaque
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub chart_output: ChartOutput,
}

impl From<&WorkerOptions> for ClassifyOptions {
    fn from(options: &WorkerOptions) -> Self {
        Self {
            chart_output: options.chart_output,
        }
    }
}

pub fn classify(value: &Value, options: &ClassifyOptions) -> ExecutionResult {
    let capability = Capability::of(value);
    tracing::debug!(?capability, type_name = value.type_name(), "classifying output");
    match value {
        Value::Chart(chart) => {
            let chart = chart.borrow();
            if options.chart_output == ChartOutput::Raster {
                if let Some(image) = chart.render_image() {
                    return ExecutionResult::Image {
                        data: image.data,
                        mime: image.mime_type,
                    };
                }
                tracing::warn!("raster output unavailable, falling back to markup");
            }
            markup(chart.render_html(), chart.render_text())
        }
        Value::Styled(styled) => match Render::render_html(styled.as_ref()) {
            Some(html) => ExecutionResult::Markup { html },
            None => tabular(styled.table.render_rows(), styled.table.render_text()),
        },
        Value::Table(table) => tabular(table.render_rows(), table.render_text()),
        Value::Series(series) => tabular(series.render_rows(), series.render_text()),
        _ => match capability {
            Capability::Primitive => ExecutionResult::scalar(scalar(value)),
            Capability::Described => ExecutionResult::scalar(ScalarValue::Text(value.repr())),
            _ => ExecutionResult::scalar(ScalarValue::Text(format!(
                "<{} object>",
                value.type_name()
            ))),
        },
    }
}

fn markup(html: Option<String>, text: String) -> ExecutionResult {
    match html {
        Some(html) => ExecutionResult::Markup { html },
        None => ExecutionResult::scalar(ScalarValue::Text(text)),
    }
}

fn tabular(rows: Option<crate::render::TabularRows>, text: String) -> ExecutionResult {
    match rows {
        Some((columns, rows)) => ExecutionResult::Tabular { columns, rows },
        None => ExecutionResult::scalar(ScalarValue::Text(text)),
    }
}

fn scalar(value: &Value) -> ScalarValue {
    match value {
        Value::None => ScalarValue::None,
        Value::Bool(b) => ScalarValue::Bool(*b),
        Value::Int(i) => ScalarValue::Integer(*i),
        Value::Float(x) => ScalarValue::Float(*x),
        Value::Str(s) => ScalarValue::Text(s.clone()),
        Value::Timestamp(ms) => ScalarValue::Timestamp(*ms),
        Value::List(_) | Value::Tuple(_) | Value::Dict(_) => match to_json(value) {
            Some(json) => {
                let text = json.to_string();
                if json.is_object() {
                    ScalarValue::Mapping { json: text }
                } else {
                    ScalarValue::Sequence { json: text }
                }
            }
            None => {
                tracing::debug!("container is not JSON-representable, using its text form");
                ScalarValue::Text(value.repr())
            }
        },
        other => ScalarValue::Text(other.repr()),
    }
}

/// JSON form of a primitive. `None` for non-finite floats and for anything
/// that is not itself a primitive.
fn to_json(value: &Value) -> Option<serde_json::Value> {
    Some(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(x) => serde_json::Value::Number(Number::from_f64(*x)?),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Timestamp(ms) => serde_json::Value::String(format_timestamp(*ms)),
        Value::List(items) | Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(to_json).collect::<Option<_>>()?)
        }
        Value::Dict(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.to_text(), to_json(value)?);
            }
            serde_json::Value::Object(map)
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::chart::{Chart, Mark, XValues};
    use crate::dataset::CellValue;
    use crate::runtime::frame::{Column, Series, Table};
    use crate::runtime::styled::StyledTable;
    use crate::runtime::value::Builtin;

    fn chart() -> Value {
        let mut chart = Chart::default();
        chart.add_trace(None, Mark::Bar, XValues::Categories(vec!["a".into()]), vec![1.0]);
        Value::Chart(Rc::new(RefCell::new(chart)))
    }

    #[test]
    fn test_chart_defaults_to_markup() {
        match classify(&chart(), &ClassifyOptions::default()) {
            ExecutionResult::Markup { html } => assert!(html.starts_with("<svg")),
            other => panic!("expected markup, got {:?}", other),
        }
    }

    #[test]
    fn test_chart_raster_is_png() {
        let options = ClassifyOptions {
            chart_output: ChartOutput::Raster,
        };
        match classify(&chart(), &options) {
            ExecutionResult::Image { data, mime } => {
                assert_eq!(mime, "image/png");
                assert!(image::load_from_memory(&data).is_ok());
            }
            other => panic!("expected image, got {:?}", other),
        }
    }

    #[test]
    fn test_table_keeps_columns_in_order() {
        let table = Table::new(
            vec![
                Column::new("b", vec![CellValue::Int(1), CellValue::Int(2)]),
                Column::new("a", vec![CellValue::Null, CellValue::Int(4)]),
            ],
            None,
        );
        match classify(&Value::table(table), &ClassifyOptions::default()) {
            ExecutionResult::Tabular { columns, rows } => {
                assert_eq!(columns, vec!["b", "a"]);
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0], vec![CellValue::Int(1), CellValue::Null]);
            }
            other => panic!("expected tabular, got {:?}", other),
        }
    }

    #[test]
    fn test_series_gets_index_column() {
        let series = Series::new(Some("x".into()), vec![CellValue::Int(7)]);
        match classify(&Value::series(series), &ClassifyOptions::default()) {
            ExecutionResult::Tabular { columns, .. } => assert_eq!(columns, vec!["index", "x"]),
            other => panic!("expected tabular, got {:?}", other),
        }
    }

    #[test]
    fn test_styled_table_is_markup() {
        let table = Table::new(vec![Column::new("a", vec![CellValue::Int(1)])], None);
        let styled = Value::Styled(Rc::new(StyledTable::new(Rc::new(table))));
        assert_eq!(classify(&styled, &ClassifyOptions::default()).kind_name(), "markup");
    }

    #[test]
    fn test_primitives() {
        let options = ClassifyOptions::default();
        assert_eq!(
            classify(&Value::Int(5), &options),
            ExecutionResult::scalar(ScalarValue::Integer(5))
        );
        assert_eq!(classify(&Value::None, &options), ExecutionResult::scalar(ScalarValue::None));
        let dict = Value::Dict(vec![(Value::str("b"), Value::Int(1)), (Value::str("a"), Value::Float(0.5))]);
        assert_eq!(
            classify(&dict, &options),
            ExecutionResult::scalar(ScalarValue::Mapping {
                json: r#"{"b":1,"a":0.5}"#.into()
            })
        );
    }

    #[test]
    fn test_nan_in_sequence_degrades_to_text() {
        let list = Value::List(vec![Value::Int(1), Value::Float(f64::NAN)]);
        assert_eq!(
            classify(&list, &ClassifyOptions::default()),
            ExecutionResult::scalar(ScalarValue::Text("[1, nan]".into()))
        );
    }

    #[test]
    fn test_described_and_opaque() {
        let options = ClassifyOptions::default();
        let range = Value::Range { start: 0, stop: 3, step: 1 };
        assert_eq!(Capability::of(&range), Capability::Described);
        assert_eq!(
            classify(&range, &options),
            ExecutionResult::scalar(ScalarValue::Text("range(0, 3)".into()))
        );
        let builtin = Value::Builtin(Builtin::Len);
        assert_eq!(Capability::of(&builtin), Capability::Opaque);
        assert_eq!(
            classify(&builtin, &options),
            ExecutionResult::scalar(ScalarValue::Text("<builtin_function_or_method object>".into()))
        );
    }
}
