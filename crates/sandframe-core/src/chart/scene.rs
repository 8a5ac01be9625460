//! Chart layout into a flat display list.

use std::f64::consts::PI;

use super::colormap::{Colormap, contrast};
use super::{Chart, HEIGHT, HeatGrid, Mark, PALETTE, Plot, Trace, WIDTH, nice_ticks, tick_label};

const AXIS: [u8; 3] = [64, 64, 64];
const GRID: [u8; 3] = [225, 225, 225];
const INK: [u8; 3] = [32, 32, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
    End,
}

/// Drawing primitive in pixel coordinates, origin top-left.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Rect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        fill: [u8; 3],
    },
    Polyline {
        points: Vec<(f64, f64)>,
        stroke: [u8; 3],
        width: f64,
    },
    /// Filled polygon drawn at reduced opacity.
    Polygon {
        points: Vec<(f64, f64)>,
        fill: [u8; 3],
    },
    Circle {
        cx: f64,
        cy: f64,
        r: f64,
        fill: [u8; 3],
    },
    /// Angles in radians, clockwise from twelve o'clock.
    Wedge {
        cx: f64,
        cy: f64,
        r: f64,
        start: f64,
        end: f64,
        fill: [u8; 3],
    },
    Text {
        x: f64,
        y: f64,
        text: String,
        size: f64,
        anchor: Anchor,
        /// Degrees, counter-clockwise negative like SVG.
        rotate: f64,
        color: [u8; 3],
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub shapes: Vec<Shape>,
}

impl Scene {
    fn text(&mut self, x: f64, y: f64, text: impl Into<String>, size: f64, anchor: Anchor) {
        self.shapes.push(Shape::Text {
            x,
            y,
            text: text.into(),
            size,
            anchor,
            rotate: 0.0,
            color: INK,
        });
    }

    fn line(&mut self, points: Vec<(f64, f64)>, stroke: [u8; 3], width: f64) {
        self.shapes.push(Shape::Polyline { points, stroke, width });
    }
}

/// Plot area in pixels.
#[derive(Debug, Clone, Copy)]
struct Area {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
}

impl Area {
    fn width(&self) -> f64 {
        self.right - self.left
    }

    fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Linear map from data to pixels.
#[derive(Debug, Clone, Copy)]
struct Scale {
    lo: f64,
    hi: f64,
    from: f64,
    to: f64,
}

impl Scale {
    fn map(&self, v: f64) -> f64 {
        // Work in halves so extreme finite ranges do not overflow to inf.
        let span = self.hi / 2.0 - self.lo / 2.0;
        let span = if span == 0.0 { 0.5 } else { span };
        self.from + (v / 2.0 - self.lo / 2.0) / span * (self.to - self.from)
    }
}

pub fn layout(chart: &Chart) -> Scene {
    let mut scene = Scene {
        width: WIDTH,
        height: HEIGHT,
        shapes: vec![Shape::Rect {
            x: 0.0,
            y: 0.0,
            w: f64::from(WIDTH),
            h: f64::from(HEIGHT),
            fill: [255, 255, 255],
        }],
    };
    if let Some(title) = &chart.title {
        scene.text(f64::from(WIDTH) / 2.0, 24.0, title.clone(), 16.0, Anchor::Middle);
    }
    let area = Area {
        left: 70.0,
        top: 40.0,
        right: f64::from(WIDTH) - 24.0,
        bottom: f64::from(HEIGHT) - 56.0,
    };
    match &chart.plot {
        Plot::Empty => cartesian(&mut scene, chart, area, &[], &[], false),
        Plot::Cartesian {
            traces,
            categories,
            time_axis,
        } => cartesian(&mut scene, chart, area, traces, categories, *time_axis),
        Plot::Pie { labels, values } => pie(&mut scene, area, labels, values),
        Plot::Heatmap(grid) => heatmap(&mut scene, area, grid),
    }
    scene
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (lo <= hi).then_some((lo, hi))
}

fn cartesian(
    scene: &mut Scene,
    chart: &Chart,
    area: Area,
    traces: &[Trace],
    categories: &[String],
    time_axis: bool,
) {
    let horizontal = traces.iter().any(|t| t.mark == Mark::BarH);
    let filled = traces.iter().any(|t| matches!(t.mark, Mark::Bar | Mark::BarH | Mark::Area));

    // Position axis: categories or data-driven ticks.
    let (pos_lo, pos_hi, pos_ticks): (f64, f64, Vec<(f64, String)>) = if !categories.is_empty() {
        let ticks = categories.iter().enumerate().map(|(i, c)| (i as f64, c.clone())).collect();
        (-0.5, categories.len() as f64 - 0.5, ticks)
    } else {
        let (lo, hi) = finite_range(traces.iter().flat_map(|t| t.xs.iter().copied())).unwrap_or((0.0, 1.0));
        let ticks = nice_ticks(lo, hi, 6);
        let step = ticks.get(1).zip(ticks.first()).map_or(1.0, |(b, a)| b - a);
        let (lo, hi) = bar_padding(traces, lo, hi, ticks[0], ticks[ticks.len() - 1]);
        let labelled = ticks
            .iter()
            .filter(|t| **t >= lo - 1e-9 && **t <= hi + 1e-9)
            .map(|t| (*t, tick_label(*t, step, time_axis)))
            .collect();
        (lo, hi, labelled)
    };

    let (mut val_lo, mut val_hi) =
        finite_range(traces.iter().flat_map(|t| t.ys.iter().copied())).unwrap_or((0.0, 1.0));
    if filled {
        val_lo = val_lo.min(0.0);
        val_hi = val_hi.max(0.0);
    }
    let value_ticks = nice_ticks(val_lo, val_hi, 5);
    let value_step = value_ticks.get(1).zip(value_ticks.first()).map_or(1.0, |(b, a)| b - a);
    val_lo = value_ticks[0];
    val_hi = value_ticks[value_ticks.len() - 1];

    let (pos_scale, val_scale) = if horizontal {
        (
            Scale { lo: pos_lo, hi: pos_hi, from: area.top, to: area.bottom },
            Scale { lo: val_lo, hi: val_hi, from: area.left, to: area.right },
        )
    } else {
        (
            Scale { lo: pos_lo, hi: pos_hi, from: area.left, to: area.right },
            Scale { lo: val_lo, hi: val_hi, from: area.bottom, to: area.top },
        )
    };
    let point = |pos: f64, val: f64| {
        if horizontal {
            (val_scale.map(val), pos_scale.map(pos))
        } else {
            (pos_scale.map(pos), val_scale.map(val))
        }
    };

    // Grid and value ticks.
    for &tick in &value_ticks {
        let label = tick_label(tick, value_step, false);
        if horizontal {
            let x = val_scale.map(tick);
            scene.line(vec![(x, area.top), (x, area.bottom)], GRID, 1.0);
            scene.text(x, area.bottom + 16.0, label, 11.0, Anchor::Middle);
        } else {
            let y = val_scale.map(tick);
            scene.line(vec![(area.left, y), (area.right, y)], GRID, 1.0);
            scene.text(area.left - 6.0, y + 4.0, label, 11.0, Anchor::End);
        }
    }
    let rotate = !horizontal && pos_ticks.len() > 8;
    for (pos, label) in &pos_ticks {
        if horizontal {
            let y = pos_scale.map(*pos);
            scene.text(area.left - 6.0, y + 4.0, shorten(label), 11.0, Anchor::End);
        } else {
            let x = pos_scale.map(*pos);
            scene.line(vec![(x, area.bottom), (x, area.bottom + 4.0)], AXIS, 1.0);
            scene.shapes.push(Shape::Text {
                x,
                y: area.bottom + 16.0,
                text: shorten(label),
                size: 11.0,
                anchor: if rotate { Anchor::End } else { Anchor::Middle },
                rotate: if rotate { -45.0 } else { 0.0 },
                color: INK,
            });
        }
    }

    let bar_traces: Vec<usize> = traces
        .iter()
        .enumerate()
        .filter(|(_, t)| matches!(t.mark, Mark::Bar | Mark::BarH))
        .map(|(i, _)| i)
        .collect();
    let spacing = if categories.is_empty() { min_spacing(traces) } else { 1.0 };
    let group = spacing * if categories.is_empty() && bar_traces.len() <= 1 { 1.0 } else { 0.8 };
    let slot = group / bar_traces.len().max(1) as f64;
    let baseline = 0.0f64.max(val_lo).min(val_hi);

    for (i, trace) in traces.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let pairs: Vec<(f64, f64)> = trace.xs.iter().copied().zip(trace.ys.iter().copied()).collect();
        match trace.mark {
            Mark::Bar | Mark::BarH => {
                let k = bar_traces.iter().position(|&b| b == i).unwrap_or(0);
                let offset = -group / 2.0 + slot * k as f64;
                for (x, y) in pairs.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
                    let (ax, ay) = point(x + offset, baseline);
                    let (bx, by) = point(x + offset + slot, y);
                    let inset = 0.5;
                    scene.shapes.push(Shape::Rect {
                        x: ax.min(bx) + inset,
                        y: ay.min(by),
                        w: ((bx - ax).abs() - 2.0 * inset).max(0.5),
                        h: (by - ay).abs().max(0.5),
                        fill: color,
                    });
                }
            }
            Mark::Line | Mark::Area => {
                let mut sorted = pairs;
                if categories.is_empty() {
                    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
                }
                for run in sorted.split(|(x, y)| !x.is_finite() || !y.is_finite()) {
                    if run.is_empty() {
                        continue;
                    }
                    let points: Vec<(f64, f64)> = run.iter().map(|(x, y)| point(*x, *y)).collect();
                    if trace.mark == Mark::Area {
                        let mut polygon = points.clone();
                        polygon.push(point(run[run.len() - 1].0, baseline));
                        polygon.push(point(run[0].0, baseline));
                        scene.shapes.push(Shape::Polygon { points: polygon, fill: color });
                    }
                    if points.len() == 1 {
                        scene.shapes.push(Shape::Circle { cx: points[0].0, cy: points[0].1, r: 2.5, fill: color });
                    } else {
                        scene.line(points, color, 2.0);
                    }
                }
            }
            Mark::Scatter => {
                for (x, y) in pairs.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
                    let (cx, cy) = point(x, y);
                    scene.shapes.push(Shape::Circle { cx, cy, r: 3.5, fill: color });
                }
            }
        }
    }

    // Axes over the marks.
    scene.line(vec![(area.left, area.top), (area.left, area.bottom), (area.right, area.bottom)], AXIS, 1.0);

    if let Some(label) = &chart.x_label {
        scene.text(area.left + area.width() / 2.0, f64::from(HEIGHT) - 10.0, label.clone(), 12.0, Anchor::Middle);
    }
    if let Some(label) = &chart.y_label {
        scene.shapes.push(Shape::Text {
            x: 16.0,
            y: area.top + area.height() / 2.0,
            text: label.clone(),
            size: 12.0,
            anchor: Anchor::Middle,
            rotate: -90.0,
            color: INK,
        });
    }
    legend(scene, area, traces);
}

/// Widen a numeric position axis so edge bars are not clipped.
fn bar_padding(traces: &[Trace], lo: f64, hi: f64, tick_lo: f64, tick_hi: f64) -> (f64, f64) {
    if traces.iter().any(|t| matches!(t.mark, Mark::Bar | Mark::BarH)) {
        let half = min_spacing(traces) / 2.0;
        (lo - half, hi + half)
    } else {
        (tick_lo, tick_hi)
    }
}

/// Smallest gap between distinct x values, used as the bar width.
fn min_spacing(traces: &[Trace]) -> f64 {
    let mut xs: Vec<f64> = traces.iter().flat_map(|t| t.xs.iter().copied()).filter(|x| x.is_finite()).collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    xs.windows(2)
        .map(|w| w[1] - w[0])
        .fold(None, |best: Option<f64>, gap| Some(best.map_or(gap, |b| b.min(gap))))
        .unwrap_or(1.0)
}

fn legend(scene: &mut Scene, area: Area, traces: &[Trace]) {
    let named: Vec<(usize, &str)> = traces
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.name.as_deref().map(|n| (i, n)))
        .collect();
    if named.len() < 2 {
        return;
    }
    let x = area.right - 130.0;
    for (row, (i, name)) in named.iter().enumerate() {
        let y = area.top + 8.0 + row as f64 * 16.0;
        scene.shapes.push(Shape::Rect { x, y, w: 10.0, h: 10.0, fill: PALETTE[i % PALETTE.len()] });
        scene.text(x + 16.0, y + 9.0, shorten(name), 11.0, Anchor::Start);
    }
}

fn shorten(label: &str) -> String {
    if label.chars().count() > 18 {
        let mut cut: String = label.chars().take(17).collect();
        cut.push('…');
        cut
    } else {
        label.to_string()
    }
}

fn pie(scene: &mut Scene, area: Area, labels: &[String], values: &[f64]) {
    let total: f64 = values.iter().filter(|v| v.is_finite() && **v > 0.0).sum();
    if total <= 0.0 {
        return;
    }
    let cx = area.left + area.width() / 2.0;
    let cy = area.top + area.height() / 2.0;
    let r = area.width().min(area.height()) / 2.0 - 16.0;
    let mut angle = 0.0;
    for (i, (label, value)) in labels.iter().zip(values).enumerate() {
        if !value.is_finite() || *value <= 0.0 {
            continue;
        }
        let sweep = value / total * 2.0 * PI;
        scene.shapes.push(Shape::Wedge {
            cx,
            cy,
            r,
            start: angle,
            end: angle + sweep,
            fill: PALETTE[i % PALETTE.len()],
        });
        let mid = angle + sweep / 2.0;
        let (lx, ly) = (cx + (r + 14.0) * mid.sin(), cy - (r + 14.0) * mid.cos());
        let anchor = if mid.sin() > 0.1 {
            Anchor::Start
        } else if mid.sin() < -0.1 {
            Anchor::End
        } else {
            Anchor::Middle
        };
        scene.text(lx, ly + 4.0, shorten(label), 11.0, anchor);
        angle += sweep;
    }
}

fn heatmap(scene: &mut Scene, area: Area, grid: &HeatGrid) {
    let (rows, columns) = (grid.rows.len(), grid.columns.len());
    if rows == 0 || columns == 0 {
        return;
    }
    let area = Area {
        left: 130.0,
        top: area.top,
        right: area.right - 60.0,
        bottom: f64::from(HEIGHT) - 80.0,
    };
    let cell_w = area.width() / columns as f64;
    let cell_h = area.height() / rows as f64;
    let (lo, hi) = grid.range();
    let normalize = |v: f64| if hi > lo { (v / 2.0 - lo / 2.0) / (hi / 2.0 - lo / 2.0) } else { 0.5 };
    let annotate = grid.annotate && rows <= 15 && columns <= 15;

    for (r, row) in grid.values.iter().enumerate() {
        for (c, value) in row.iter().enumerate().take(columns) {
            let fill = grid.colormap.sample(if value.is_finite() { normalize(*value) } else { f64::NAN });
            let (x, y) = (area.left + c as f64 * cell_w, area.top + r as f64 * cell_h);
            scene.shapes.push(Shape::Rect { x, y, w: cell_w, h: cell_h, fill });
            if annotate && value.is_finite() {
                scene.shapes.push(Shape::Text {
                    x: x + cell_w / 2.0,
                    y: y + cell_h / 2.0 + 4.0,
                    text: format!("{:.2}", value),
                    size: 10.0,
                    anchor: Anchor::Middle,
                    rotate: 0.0,
                    color: contrast(fill),
                });
            }
        }
    }
    for (r, label) in grid.rows.iter().enumerate() {
        scene.text(area.left - 6.0, area.top + (r as f64 + 0.5) * cell_h + 4.0, shorten(label), 11.0, Anchor::End);
    }
    let rotate = columns > 4;
    for (c, label) in grid.columns.iter().enumerate() {
        scene.shapes.push(Shape::Text {
            x: area.left + (c as f64 + 0.5) * cell_w,
            y: area.bottom + 16.0,
            text: shorten(label),
            size: 11.0,
            anchor: if rotate { Anchor::End } else { Anchor::Middle },
            rotate: if rotate { -45.0 } else { 0.0 },
            color: INK,
        });
    }
    colorbar(scene, &area, grid.colormap, lo, hi);
}

fn colorbar(scene: &mut Scene, area: &Area, colormap: Colormap, lo: f64, hi: f64) {
    const STEPS: usize = 32;
    let x = area.right + 16.0;
    let step_h = area.height() / STEPS as f64;
    for i in 0..STEPS {
        let t = 1.0 - (i as f64 + 0.5) / STEPS as f64;
        scene.shapes.push(Shape::Rect {
            x,
            y: area.top + i as f64 * step_h,
            w: 14.0,
            h: step_h + 0.5,
            fill: colormap.sample(t),
        });
    }
    let step = (hi - lo).abs() / 4.0;
    scene.text(x + 18.0, area.top + 8.0, tick_label(hi, step, false), 10.0, Anchor::Start);
    scene.text(x + 18.0, area.bottom, tick_label(lo, step, false), 10.0, Anchor::Start);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::XValues;

    fn count(scene: &Scene, pred: impl Fn(&Shape) -> bool) -> usize {
        scene.shapes.iter().filter(|s| pred(s)).count()
    }

    #[test]
    fn test_bars_one_rect_per_value() {
        let mut chart = Chart::default();
        chart.add_trace(
            None,
            Mark::Bar,
            XValues::Categories(vec!["a".into(), "b".into(), "c".into()]),
            vec![1.0, f64::NAN, 3.0],
        );
        let scene = chart.scene();
        // Background plus two finite bars.
        assert_eq!(count(&scene, |s| matches!(s, Shape::Rect { .. })), 3);
        assert!(scene.shapes.iter().any(|s| matches!(s, Shape::Text { text, .. } if text == "c")));
    }

    #[test]
    fn test_line_splits_at_missing_points() {
        let mut chart = Chart::default();
        chart.add_trace(
            None,
            Mark::Line,
            XValues::Numeric(vec![0.0, 1.0, 2.0, 3.0, 4.0]),
            vec![1.0, 2.0, f64::NAN, 3.0, 4.0],
        );
        let scene = chart.scene();
        let colored = count(&scene, |s| matches!(s, Shape::Polyline { stroke, .. } if *stroke == PALETTE[0]));
        assert_eq!(colored, 2);
    }

    #[test]
    fn test_pie_wedges_cover_circle() {
        let mut chart = Chart::default();
        chart.set_pie(vec!["a".into(), "b".into(), "c".into()], vec![1.0, 1.0, 2.0]);
        let scene = chart.scene();
        let ends: Vec<f64> = scene
            .shapes
            .iter()
            .filter_map(|s| match s {
                Shape::Wedge { end, .. } => Some(*end),
                _ => None,
            })
            .collect();
        assert_eq!(ends.len(), 3);
        assert!((ends[2] - 2.0 * PI).abs() < 1e-9);
    }

    #[test]
    fn test_heatmap_annotates_small_grids() {
        let mut chart = Chart::default();
        chart.set_heatmap(HeatGrid {
            rows: vec!["a".into(), "b".into()],
            columns: vec!["a".into(), "b".into()],
            values: vec![vec![1.0, -0.5], vec![-0.5, 1.0]],
            colormap: Colormap::Coolwarm,
            annotate: true,
        });
        let scene = chart.scene();
        assert!(scene.shapes.iter().any(|s| matches!(s, Shape::Text { text, .. } if text == "-0.50")));
    }

    #[test]
    fn test_title_is_drawn() {
        let mut chart = Chart::default();
        chart.title = Some("Revenue".into());
        let scene = chart.scene();
        assert!(scene.shapes.iter().any(|s| matches!(s, Shape::Text { text, .. } if text == "Revenue")));
    }
}
