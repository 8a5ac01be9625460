//! Rich output rendering for runtime values.
//!
//! The [`Render`] trait lets each displayable runtime type offer a plain
//! text form plus optional HTML, image and structured-data forms. The
//! classifier picks among them.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::chart::Chart;
use crate::dataset::CellValue;
use crate::runtime::frame::{Index, Series, Table};
use crate::runtime::styled::StyledTable;

/// Output from rendering a value as an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOutput {
    /// MIME type (e.g., "image/png")
    pub mime_type: String,
    /// Raw image data
    pub data: Vec<u8>,
}

impl ImageOutput {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data,
        }
    }

    /// `data:` URI for inline embedding.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }
}

/// Types that can render rich output.
///
/// Only [`render_text`](Render::render_text) is required. Override the
/// other methods to provide richer representations.
pub trait Render {
    /// Plain text representation.
    fn render_text(&self) -> String;

    /// HTML (or SVG) markup. `None` falls back to text.
    fn render_html(&self) -> Option<String> {
        None
    }

    /// Image output.
    fn render_image(&self) -> Option<ImageOutput> {
        None
    }

    /// Column names and row cells for tabular output.
    fn render_rows(&self) -> Option<TabularRows> {
        None
    }
}

/// Column names plus row-major cells.
pub type TabularRows = (Vec<String>, Vec<Vec<CellValue>>);

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl Render for Chart {
    fn render_text(&self) -> String {
        self.describe()
    }

    fn render_html(&self) -> Option<String> {
        Some(self.to_svg())
    }

    fn render_image(&self) -> Option<ImageOutput> {
        match self.to_png() {
            Ok(data) => Some(ImageOutput::png(data)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to rasterize chart");
                None
            }
        }
    }
}

impl Render for StyledTable {
    fn render_text(&self) -> String {
        self.table.render_text()
    }

    fn render_html(&self) -> Option<String> {
        match StyledTable::render_html(self) {
            Ok(html) => Some(html),
            Err(e) => {
                tracing::debug!(error = %e.message, "styled table could not be rendered");
                None
            }
        }
    }
}

impl Render for Table {
    fn render_text(&self) -> String {
        Table::render_text(self)
    }

    /// The index, when present, becomes a leading column.
    fn render_rows(&self) -> Option<TabularRows> {
        let mut columns: Vec<String> = Vec::new();
        if let Some(index) = &self.index {
            columns.push(index.name.clone().unwrap_or_else(|| "index".to_string()));
        }
        columns.extend(self.column_names());
        let rows = (0..self.num_rows())
            .map(|r| {
                let mut row = Vec::with_capacity(columns.len());
                if self.index.is_some() {
                    row.push(self.row_label(r));
                }
                row.extend(self.columns.iter().map(|c| c.values[r].clone()));
                row
            })
            .collect();
        Some((columns, rows))
    }
}

impl Render for Series {
    fn render_text(&self) -> String {
        Series::render_text(self)
    }

    /// Labels always travel with a series, positional ones included.
    fn render_rows(&self) -> Option<TabularRows> {
        let mut table = self.to_table();
        if table.index.is_none() {
            table.index = Some(Index::new(None, self.labels()));
        }
        table.render_rows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{Mark, XValues};
    use crate::runtime::frame::Column;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn test_chart_renders_both_forms() {
        let mut chart = Chart::default();
        chart.add_trace(None, Mark::Line, XValues::Numeric(vec![0.0, 1.0]), vec![1.0, 2.0]);
        assert!(chart.render_html().unwrap().starts_with("<svg"));
        let image = chart.render_image().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert!(image.to_data_uri().starts_with("data:image/png;base64,iVBOR"));
    }

    #[test]
    fn test_table_rows_include_index() {
        let table = Table::new(
            vec![Column::new("n", vec![CellValue::Int(1), CellValue::Int(2)])],
            Some(Index::new(Some("k".into()), vec![CellValue::Text("a".into()), CellValue::Text("b".into())])),
        );
        let (columns, rows) = table.render_rows().unwrap();
        assert_eq!(columns, vec!["k", "n"]);
        assert_eq!(rows[1], vec![CellValue::Text("b".into()), CellValue::Int(2)]);
    }

    #[test]
    fn test_series_rows_get_positional_index() {
        let series = Series::new(Some("v".into()), vec![CellValue::Float(0.5)]);
        let (columns, rows) = series.render_rows().unwrap();
        assert_eq!(columns, vec!["index", "v"]);
        assert_eq!(rows[0], vec![CellValue::Int(0), CellValue::Float(0.5)]);
    }
}
