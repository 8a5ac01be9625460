//! Figure model built by the plotting primitives.
//!
//! A [`Chart`] records what was plotted. Layout happens once in
//! [`scene`], producing a display list that both the SVG and the PNG
//! renderers draw, so the two outputs never disagree about geometry.

pub mod colormap;
mod raster;
mod scene;
mod svg;

use colormap::Colormap;

pub use scene::{Scene, Shape};

/// Canvas width in pixels.
pub const WIDTH: u32 = 640;
/// Canvas height in pixels.
pub const HEIGHT: u32 = 400;

/// matplotlib's default categorical palette.
pub const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Line,
    Bar,
    BarH,
    Scatter,
    Area,
}

impl Mark {
    pub fn from_kind(kind: &str) -> Option<Mark> {
        Some(match kind {
            "line" | "plot" => Mark::Line,
            "bar" => Mark::Bar,
            "barh" => Mark::BarH,
            "scatter" => Mark::Scatter,
            "area" => Mark::Area,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Mark::Line => "line",
            Mark::Bar => "bar",
            Mark::BarH => "horizontal bar",
            Mark::Scatter => "scatter",
            Mark::Area => "area",
        }
    }
}

/// One plotted series. `xs` are positions on the category axis when the
/// chart has categories.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub name: Option<String>,
    pub mark: Mark,
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
}

/// The x values handed to [`Chart::add_trace`].
#[derive(Debug, Clone, PartialEq)]
pub enum XValues {
    Numeric(Vec<f64>),
    /// Milliseconds since the epoch; ticks are labelled as dates.
    Time(Vec<f64>),
    Categories(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatGrid {
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    /// Row-major; NaN marks a missing cell.
    pub values: Vec<Vec<f64>>,
    pub colormap: Colormap,
    pub annotate: bool,
}

impl HeatGrid {
    /// Finite value range, or `(0, 1)` when every cell is missing.
    pub fn range(&self) -> (f64, f64) {
        let finite = self.values.iter().flatten().copied().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if lo > hi { (0.0, 1.0) } else { (lo, hi) }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Plot {
    #[default]
    Empty,
    Cartesian {
        traces: Vec<Trace>,
        categories: Vec<String>,
        time_axis: bool,
    },
    Pie {
        labels: Vec<String>,
        values: Vec<f64>,
    },
    Heatmap(HeatGrid),
}

/// A figure. Figures are shared between `fig` and `ax` handles, so every
/// mutation goes through `&mut self` on one value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chart {
    pub title: Option<String>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    pub plot: Plot,
}

impl Chart {
    pub fn is_empty(&self) -> bool {
        matches!(self.plot, Plot::Empty)
    }

    /// Add a series. Categorical x values share one category axis across
    /// traces; a pie or heatmap already on the figure is replaced.
    pub fn add_trace(&mut self, name: Option<String>, mark: Mark, x: XValues, ys: Vec<f64>) {
        if !matches!(self.plot, Plot::Cartesian { .. }) {
            self.plot = Plot::Cartesian {
                traces: Vec::new(),
                categories: Vec::new(),
                time_axis: false,
            };
        }
        let Plot::Cartesian {
            traces,
            categories,
            time_axis,
        } = &mut self.plot
        else {
            return;
        };
        let xs = match x {
            XValues::Numeric(xs) => xs,
            XValues::Time(xs) => {
                *time_axis = true;
                xs
            }
            XValues::Categories(labels) => labels
                .into_iter()
                .map(|label| match categories.iter().position(|c| *c == label) {
                    Some(i) => i as f64,
                    None => {
                        categories.push(label);
                        (categories.len() - 1) as f64
                    }
                })
                .collect(),
        };
        traces.push(Trace { name, mark, xs, ys });
    }

    pub fn set_pie(&mut self, labels: Vec<String>, values: Vec<f64>) {
        self.plot = Plot::Pie { labels, values };
    }

    pub fn set_heatmap(&mut self, grid: HeatGrid) {
        self.plot = Plot::Heatmap(grid);
    }

    /// Short textual description, used for `repr()` and text fallbacks.
    pub fn describe(&self) -> String {
        let body = match &self.plot {
            Plot::Empty => "empty figure".to_string(),
            Plot::Cartesian { traces, .. } => {
                let mut marks: Vec<&str> = Vec::new();
                for t in traces {
                    if !marks.contains(&t.mark.name()) {
                        marks.push(t.mark.name());
                    }
                }
                format!(
                    "{} chart with {} series",
                    marks.join("/"),
                    traces.len()
                )
            }
            Plot::Pie { labels, .. } => format!("pie chart with {} slices", labels.len()),
            Plot::Heatmap(grid) => format!(
                "heatmap {}x{} ({})",
                grid.rows.len(),
                grid.columns.len(),
                grid.colormap.name()
            ),
        };
        match &self.title {
            Some(title) => format!("<Figure: {}, title '{}'>", body, title),
            None => format!("<Figure: {}>", body),
        }
    }

    pub fn scene(&self) -> Scene {
        scene::layout(self)
    }

    /// Render as a standalone SVG document.
    pub fn to_svg(&self) -> String {
        svg::render(&self.scene())
    }

    /// Render as PNG bytes. Text is not rasterized.
    pub fn to_png(&self) -> crate::Result<Vec<u8>> {
        raster::render(&self.scene())
    }
}

/// Evenly spaced round tick values covering `[lo, hi]`.
pub(crate) fn nice_ticks(lo: f64, hi: f64, target: usize) -> Vec<f64> {
    let (mut lo, mut hi) = if lo.is_finite() && hi.is_finite() { (lo, hi) } else { (0.0, 1.0) };
    // Halved differences stay finite across the whole f64 range.
    if (hi / 2.0 - lo / 2.0).abs() < 5e-13 {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.5 };
        lo = (lo - pad).max(f64::MIN);
        hi = (hi + pad).min(f64::MAX);
    }
    let target = target.max(1) as f64;
    let raw = hi / target - lo / target;
    let magnitude = 10f64.powf(raw.log10().floor());
    let normalized = raw / magnitude;
    let step = magnitude
        * if normalized < 1.5 {
            1.0
        } else if normalized < 3.0 {
            2.0
        } else if normalized < 7.0 {
            5.0
        } else {
            10.0
        };
    let start = (lo / step).floor() as i64;
    let end = (hi / step).ceil() as i64;
    let mut ticks: Vec<f64> = (start..=end)
        .map(|i| (i as f64 * step).clamp(f64::MIN, f64::MAX))
        .collect();
    ticks.dedup();
    if ticks.len() < 2 {
        ticks = vec![lo, hi];
    }
    ticks
}

/// Label for a tick, with as many decimals as the step needs.
pub(crate) fn tick_label(value: f64, step: f64, time_axis: bool) -> String {
    if time_axis {
        return chrono::DateTime::<chrono::Utc>::from_timestamp_millis(value as i64)
            .map_or_else(|| format!("{}", value), |d| d.format("%Y-%m-%d").to_string());
    }
    let decimals = if step > 0.0 && step < 1.0 {
        (-step.log10().floor()) as usize
    } else {
        0
    };
    let text = format!("{:.*}", decimals, value);
    if text.starts_with('-') && text.trim_start_matches(['-', '0', '.']).is_empty() {
        text[1..].to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_are_shared_across_traces() {
        let mut chart = Chart::default();
        chart.add_trace(
            Some("a".into()),
            Mark::Bar,
            XValues::Categories(vec!["x".into(), "y".into()]),
            vec![1.0, 2.0],
        );
        chart.add_trace(
            Some("b".into()),
            Mark::Bar,
            XValues::Categories(vec!["y".into(), "z".into()]),
            vec![3.0, 4.0],
        );
        let Plot::Cartesian { traces, categories, .. } = &chart.plot else {
            panic!("expected a cartesian plot");
        };
        assert_eq!(categories, &vec!["x".to_string(), "y".into(), "z".into()]);
        assert_eq!(traces[1].xs, vec![1.0, 2.0]);
    }

    #[test]
    fn test_pie_replaces_traces() {
        let mut chart = Chart::default();
        chart.add_trace(None, Mark::Line, XValues::Numeric(vec![0.0]), vec![1.0]);
        chart.set_pie(vec!["a".into()], vec![1.0]);
        assert!(matches!(chart.plot, Plot::Pie { .. }));
        assert!(chart.describe().contains("pie chart"));
    }

    #[test]
    fn test_nice_ticks() {
        assert_eq!(nice_ticks(0.0, 10.0, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        let ticks = nice_ticks(0.13, 0.87, 4);
        assert!(ticks[0] <= 0.13 && *ticks.last().unwrap() >= 0.87);
        assert!(nice_ticks(3.0, 3.0, 5).len() > 1);

        let extreme = nice_ticks(-1e308, 1e308, 5);
        assert!(extreme.len() > 1);
        assert!(extreme.iter().all(|t| t.is_finite()));
        assert!(extreme[0] < 0.0 && *extreme.last().unwrap() > 0.0);
    }

    #[test]
    fn test_tick_label() {
        assert_eq!(tick_label(2.0, 1.0, false), "2");
        assert_eq!(tick_label(0.25, 0.05, false), "0.25");
        assert_eq!(tick_label(-0.0, 0.5, false), "0.0");
        assert_eq!(tick_label(86_400_000.0, 1.0, true), "1970-01-02");
    }

    #[test]
    fn test_describe_mentions_title() {
        let mut chart = Chart::default();
        chart.title = Some("Sales".into());
        assert_eq!(chart.describe(), "<Figure: empty figure, title 'Sales'>");
    }
}
