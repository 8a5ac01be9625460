//! Styled tables (`df.style`) and their HTML rendering.

use std::rc::Rc;

use crate::chart::colormap::{Colormap, contrast, hex};
use crate::dataset::{CellValue, ColumnType};
use crate::render::html_escape;
use crate::script::{ScriptError, ScriptResult};

use super::args::{Args, names_of};
use super::format::format_template;
use super::frame::{Column, Table};
use super::value::Value;

const METHODS: &[&str] = &[
    "background_gradient", "highlight_max", "highlight_min", "highlight_null", "bar", "format",
    "set_caption", "set_precision", "hide", "hide_index", "set_properties", "set_table_styles",
    "to_html",
];

/// Default float precision, as pandas' `display.precision`.
const DEFAULT_PRECISION: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum StyleRule {
    Gradient {
        colormap: Colormap,
        subset: Option<Vec<String>>,
    },
    Highlight {
        max: bool,
        color: String,
        subset: Option<Vec<String>>,
    },
    HighlightNull {
        color: String,
    },
    Bar {
        color: String,
        subset: Option<Vec<String>>,
    },
}

/// A table plus presentation rules. Immutable: every styler method returns
/// a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledTable {
    pub table: Rc<Table>,
    pub rules: Vec<StyleRule>,
    /// Format template per column; `None` applies to every column.
    pub formats: Vec<(Option<String>, String)>,
    pub caption: Option<String>,
    pub precision: Option<usize>,
    pub hide_index: bool,
}

impl StyledTable {
    pub fn new(table: Rc<Table>) -> Self {
        Self {
            table,
            rules: Vec::new(),
            formats: Vec::new(),
            caption: None,
            precision: None,
            hide_index: false,
        }
    }

    fn applies(subset: &Option<Vec<String>>, column: &Column) -> bool {
        match subset {
            Some(names) => names.contains(&column.name),
            None => column.dtype == ColumnType::Numeric,
        }
    }

    /// CSS declarations per cell, `[column][row]`.
    fn cell_styles(&self) -> Vec<Vec<Vec<String>>> {
        let t = &self.table;
        let mut styles = vec![vec![Vec::new(); t.num_rows()]; t.num_columns()];
        for rule in &self.rules {
            for (c, column) in t.columns.iter().enumerate() {
                let numbers: Vec<Option<f64>> = column.values.iter().map(CellValue::as_f64).collect();
                let (lo, hi) = numbers
                    .iter()
                    .flatten()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
                match rule {
                    StyleRule::Gradient { colormap, subset } if Self::applies(subset, column) => {
                        for (r, v) in numbers.iter().enumerate() {
                            if let Some(v) = v {
                                let ratio = if hi > lo { (v - lo) / (hi - lo) } else { 0.5 };
                                let fill = colormap.sample(ratio);
                                styles[c][r].push(format!("background-color: {}", hex(fill)));
                                styles[c][r].push(format!("color: {}", hex(contrast(fill))));
                            }
                        }
                    }
                    StyleRule::Highlight { max, color, subset } if Self::applies(subset, column) => {
                        let target = if *max { hi } else { lo };
                        for (r, v) in numbers.iter().enumerate() {
                            if *v == Some(target) {
                                styles[c][r].push(format!("background-color: {}", color));
                            }
                        }
                    }
                    StyleRule::HighlightNull { color } => {
                        for (r, v) in column.values.iter().enumerate() {
                            if v.is_null() {
                                styles[c][r].push(format!("background-color: {}", color));
                            }
                        }
                    }
                    StyleRule::Bar { color, subset } if Self::applies(subset, column) => {
                        let base = lo.min(0.0);
                        for (r, v) in numbers.iter().enumerate() {
                            if let Some(v) = v {
                                let pct = if hi > base { (v - base) / (hi - base) * 100.0 } else { 0.0 };
                                styles[c][r].push(format!(
                                    "background: linear-gradient(90deg, {color} {pct:.1}%, transparent {pct:.1}%)"
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        styles
    }

    fn display(&self, column: &str, cell: &CellValue) -> ScriptResult<String> {
        let format = self
            .formats
            .iter()
            .rev()
            .find(|(target, _)| target.as_deref().is_none_or(|t| t == column));
        if let Some((target, template)) = format {
            if !cell.is_null() {
                match format_template(template, &[Value::from_cell(cell.clone())], &[]) {
                    Ok(text) => return Ok(text),
                    // A table-wide format skips cells it cannot format, such as text under `{:.1f}`.
                    Err(_) if target.is_none() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(match cell {
            CellValue::Null => "nan".to_string(),
            CellValue::Float(x) => format!("{:.*}", self.precision.unwrap_or(DEFAULT_PRECISION), x),
            other => other.to_string(),
        })
    }

    /// Render as an HTML `<table>`.
    pub fn render_html(&self) -> ScriptResult<String> {
        let t = &self.table;
        let styles = self.cell_styles();
        let mut html = String::from("<table class=\"sandframe-styled\">");
        if let Some(caption) = &self.caption {
            html.push_str(&format!("<caption>{}</caption>", html_escape(caption)));
        }
        html.push_str("<thead><tr>");
        if !self.hide_index {
            html.push_str("<th></th>");
        }
        for column in &t.columns {
            html.push_str(&format!("<th>{}</th>", html_escape(&column.name)));
        }
        html.push_str("</tr></thead><tbody>");
        for r in 0..t.num_rows() {
            html.push_str("<tr>");
            if !self.hide_index {
                html.push_str(&format!("<th>{}</th>", html_escape(&t.row_label(r).to_string())));
            }
            for (c, column) in t.columns.iter().enumerate() {
                let text = html_escape(&self.display(&column.name, &column.values[r])?);
                if styles[c][r].is_empty() {
                    html.push_str(&format!("<td>{}</td>", text));
                } else {
                    html.push_str(&format!("<td style=\"{}\">{}</td>", styles[c][r].join("; "), text));
                }
            }
            html.push_str("</tr>");
        }
        html.push_str("</tbody></table>");
        Ok(html)
    }
}

pub fn attribute(styler: &Rc<StyledTable>, name: &str) -> Option<Value> {
    match name {
        "data" => Some(Value::Table(styler.table.clone())),
        _ if METHODS.contains(&name) => Some(Value::Method(Box::new(Value::Styled(styler.clone())), name.to_string())),
        _ => None,
    }
}

fn subset(args: &Args) -> ScriptResult<Option<Vec<String>>> {
    args.keyword("subset").map(names_of).transpose()
}

/// CSS color values only: names, hex and rgb() forms.
fn css_color(value: Option<String>, default: &str) -> ScriptResult<String> {
    let color = value.unwrap_or_else(|| default.to_string());
    let valid = color
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '(' | ')' | ',' | ' ' | '.' | '%'));
    if !valid {
        return Err(ScriptError::value(format!("invalid color '{}'", color)));
    }
    Ok(color)
}

pub fn call(styler: &Rc<StyledTable>, name: &str, args: Args) -> ScriptResult<Value> {
    let mut next = (**styler).clone();
    match name {
        "background_gradient" => {
            let colormap = Colormap::by_name(args.str(0, "cmap")?.as_deref().unwrap_or("Blues"));
            next.rules.push(StyleRule::Gradient { colormap, subset: subset(&args)? });
        }
        "highlight_max" | "highlight_min" => {
            let color = css_color(args.str(usize::MAX, "color")?, "yellow")?;
            next.rules.push(StyleRule::Highlight {
                max: name == "highlight_max",
                color,
                subset: subset(&args)?,
            });
        }
        "highlight_null" => {
            let color = args.str(0, "color")?.or(args.str(usize::MAX, "null_color")?);
            next.rules.push(StyleRule::HighlightNull { color: css_color(color, "red")? });
        }
        "bar" => {
            let color = css_color(args.str(usize::MAX, "color")?, "#d65f5f")?;
            next.rules.push(StyleRule::Bar { color, subset: subset(&args)? });
        }
        "format" => {
            if let Some(precision) = args.int(usize::MAX, "precision")? {
                next.precision = Some(precision.clamp(0, 20) as usize);
            }
            match args.get(0, "formatter") {
                None => {}
                Some(Value::Str(template)) => next.formats.push((None, template.clone())),
                Some(Value::Dict(entries)) => {
                    for (column, template) in entries {
                        let Value::Str(template) = template else {
                            return Err(ScriptError::type_error("format templates must be strings"));
                        };
                        next.formats.push((Some(column.to_text()), template.clone()));
                    }
                }
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "formatter must be a string or dict, not '{}'",
                        other.type_name()
                    )));
                }
            }
        }
        "set_caption" => next.caption = Some(args.require(0, "caption", name)?.to_text()),
        "set_precision" => next.precision = Some(args.int_or(0, "precision", 6)?.clamp(0, 20) as usize),
        "hide_index" => next.hide_index = true,
        "hide" => {
            let axis = args.str(usize::MAX, "axis")?;
            if axis.as_deref().is_none_or(|a| a == "index") && args.keyword("subset").is_none() {
                next.hide_index = true;
            }
        }
        "set_properties" | "set_table_styles" => {}
        "to_html" => return Ok(Value::Str(styler.render_html()?)),
        _ => return Err(ScriptError::attribute("Styler", name)),
    }
    Ok(Value::Styled(Rc::new(next)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn styler() -> Rc<StyledTable> {
        let table = Table::new(
            vec![
                Column::new("name", vec![CellValue::Text("a<b".into()), CellValue::Text("c".into())]),
                Column::new("score", vec![CellValue::Float(1.5), CellValue::Float(3.0)]),
            ],
            None,
        );
        Rc::new(StyledTable::new(Rc::new(table)))
    }

    fn styled(value: Value) -> Rc<StyledTable> {
        match value {
            Value::Styled(s) => s,
            other => panic!("expected a styler, got {:?}", other),
        }
    }

    #[test]
    fn test_plain_html_escapes_and_formats() {
        let html = styler().render_html().unwrap();
        assert!(html.starts_with("<table"));
        assert!(html.contains("<td>a&lt;b</td>"));
        assert!(html.contains("<td>1.500000</td>"));
    }

    #[test]
    fn test_gradient_colors_numeric_columns_only() {
        let next = styled(call(&styler(), "background_gradient", Args::default()).unwrap());
        let html = next.render_html().unwrap();
        assert_eq!(html.matches("background-color").count(), 2);
    }

    #[test]
    fn test_highlight_max() {
        let next = styled(call(&styler(), "highlight_max", Args::default()).unwrap());
        let html = next.render_html().unwrap();
        assert!(html.contains("<td style=\"background-color: yellow\">3.000000</td>"));
    }

    #[test]
    fn test_format_and_caption() {
        let formatted = styled(
            call(&styler(), "format", Args::positional(vec![Value::str("{:.1f}")])).unwrap(),
        );
        let captioned = styled(
            call(&formatted, "set_caption", Args::positional(vec![Value::str("Scores")])).unwrap(),
        );
        let hidden = styled(call(&captioned, "hide", Args::default()).unwrap());
        let html = hidden.render_html().unwrap();
        assert!(html.contains("<caption>Scores</caption>"));
        assert!(html.contains("<td>1.5</td>"));
        assert!(html.contains("<td>a&lt;b</td>"));
        assert!(!html.contains("<th></th>"));
    }

    #[test]
    fn test_targeted_format_still_reports_errors() {
        let formats = Value::Dict(vec![(Value::str("name"), Value::str("{:.1f}"))]);
        let formatted = styled(call(&styler(), "format", Args::positional(vec![formats])).unwrap());
        assert!(formatted.render_html().is_err());
    }

    #[test]
    fn test_rejects_css_injection() {
        let args = Args::new(vec![], vec![("color".into(), Value::str("red\" onclick=\"x"))]);
        assert!(call(&styler(), "highlight_max", args).is_err());
    }
}
