//! SVG rendering of a [`Scene`].

use std::fmt::Write;

use super::colormap::hex;
use super::scene::{Anchor, Scene, Shape};
use crate::render::html_escape;

fn num(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

fn points(points: &[(f64, f64)]) -> String {
    points
        .iter()
        .map(|(x, y)| format!("{},{}", num(*x), num(*y)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render(scene: &Scene) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif">"#,
        w = scene.width,
        h = scene.height
    );
    for shape in &scene.shapes {
        match shape {
            Shape::Rect { x, y, w, h, fill } => {
                let _ = write!(
                    out,
                    r#"<rect x="{}" y="{}" width="{}" height="{}" fill="{}"/>"#,
                    num(*x),
                    num(*y),
                    num(*w),
                    num(*h),
                    hex(*fill)
                );
            }
            Shape::Polyline { points: p, stroke, width } => {
                let _ = write!(
                    out,
                    r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
                    points(p),
                    hex(*stroke),
                    num(*width)
                );
            }
            Shape::Polygon { points: p, fill } => {
                let _ = write!(
                    out,
                    r#"<polygon points="{}" fill="{}" fill-opacity="0.35"/>"#,
                    points(p),
                    hex(*fill)
                );
            }
            Shape::Circle { cx, cy, r, fill } => {
                let _ = write!(
                    out,
                    r#"<circle cx="{}" cy="{}" r="{}" fill="{}"/>"#,
                    num(*cx),
                    num(*cy),
                    num(*r),
                    hex(*fill)
                );
            }
            Shape::Wedge { cx, cy, r, start, end, fill } => {
                let _ = write!(out, r#"<path d="{}" fill="{}" stroke="white"/>"#, wedge_path(*cx, *cy, *r, *start, *end), hex(*fill));
            }
            Shape::Text { x, y, text, size, anchor, rotate, color } => {
                let anchor = match anchor {
                    Anchor::Start => "start",
                    Anchor::Middle => "middle",
                    Anchor::End => "end",
                };
                let transform = if *rotate != 0.0 {
                    format!(r#" transform="rotate({} {} {})""#, num(*rotate), num(*x), num(*y))
                } else {
                    String::new()
                };
                let _ = write!(
                    out,
                    r#"<text x="{}" y="{}" font-size="{}" text-anchor="{}" fill="{}"{}>{}</text>"#,
                    num(*x),
                    num(*y),
                    num(*size),
                    anchor,
                    hex(*color),
                    transform,
                    html_escape(text)
                );
            }
        }
    }
    out.push_str("</svg>");
    out
}

fn wedge_path(cx: f64, cy: f64, r: f64, start: f64, end: f64) -> String {
    let sweep = end - start;
    if sweep >= std::f64::consts::TAU - 1e-9 {
        // A full circle cannot be a single arc.
        return format!(
            "M {} {} m {} 0 a {r} {r} 0 1 0 {} 0 a {r} {r} 0 1 0 {} 0",
            num(cx),
            num(cy),
            num(-r),
            num(2.0 * r),
            num(-2.0 * r),
            r = num(r)
        );
    }
    let at = |angle: f64| (cx + r * angle.sin(), cy - r * angle.cos());
    let (sx, sy) = at(start);
    let (ex, ey) = at(end);
    let large = if sweep > std::f64::consts::PI { 1 } else { 0 };
    format!(
        "M {} {} L {} {} A {} {} 0 {} 1 {} {} Z",
        num(cx),
        num(cy),
        num(sx),
        num(sy),
        num(r),
        num(r),
        large,
        num(ex),
        num(ey)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{Chart, Mark, XValues};

    #[test]
    fn test_svg_document_shape() {
        let mut chart = Chart::default();
        chart.title = Some("A <b> & C".into());
        chart.add_trace(None, Mark::Scatter, XValues::Numeric(vec![1.0, 2.0]), vec![3.0, 4.0]);
        let svg = chart.to_svg();
        assert!(svg.starts_with("<svg xmlns=\"http://www.w3.org/2000/svg\""));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("A &lt;b&gt; &amp; C"));
        assert_eq!(svg.matches("<circle").count(), 2);
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(num(3.0), "3");
        assert_eq!(num(2.456), "2.46");
    }

    #[test]
    fn test_full_wedge_uses_two_arcs() {
        let path = wedge_path(10.0, 10.0, 5.0, 0.0, std::f64::consts::TAU);
        assert_eq!(path.matches(" a ").count(), 2);
    }
}
