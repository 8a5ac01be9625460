//! PNG rendering of a [`Scene`] with the `image` crate.
//!
//! Only geometry is drawn; text shapes are skipped.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use super::scene::{Scene, Shape};
use crate::error::{Error, Result};

pub fn render(scene: &Scene) -> Result<Vec<u8>> {
    let mut img = RgbImage::from_pixel(scene.width, scene.height, Rgb([255, 255, 255]));
    for shape in &scene.shapes {
        match shape {
            Shape::Rect { x, y, w, h, fill } => fill_rect(&mut img, *x, *y, *w, *h, *fill, 1.0),
            Shape::Polyline { points, stroke, width } => {
                for pair in points.windows(2) {
                    draw_line(&mut img, pair[0], pair[1], *stroke, *width);
                }
            }
            Shape::Polygon { points, fill } => fill_polygon(&mut img, points, *fill, 0.35),
            Shape::Circle { cx, cy, r, fill } => fill_circle(&mut img, *cx, *cy, *r, *fill),
            Shape::Wedge { cx, cy, r, start, end, fill } => {
                fill_wedge(&mut img, *cx, *cy, *r, *start, *end, *fill)
            }
            Shape::Text { .. } => {}
        }
    }
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| Error::Render(e.to_string()))?;
    Ok(bytes)
}

fn blend(img: &mut RgbImage, x: i64, y: i64, color: [u8; 3], alpha: f64) {
    if x < 0 || y < 0 || x >= i64::from(img.width()) || y >= i64::from(img.height()) {
        return;
    }
    let pixel = img.get_pixel_mut(x as u32, y as u32);
    for (channel, target) in pixel.0.iter_mut().zip(color) {
        *channel = (f64::from(*channel) * (1.0 - alpha) + f64::from(target) * alpha).round() as u8;
    }
}

fn fill_rect(img: &mut RgbImage, x: f64, y: f64, w: f64, h: f64, color: [u8; 3], alpha: f64) {
    let (x0, y0) = (x.round() as i64, y.round() as i64);
    let (x1, y1) = ((x + w).round() as i64, (y + h).round() as i64);
    for py in y0..y1.max(y0 + 1) {
        for px in x0..x1.max(x0 + 1) {
            blend(img, px, py, color, alpha);
        }
    }
}

fn draw_line(img: &mut RgbImage, a: (f64, f64), b: (f64, f64), color: [u8; 3], width: f64) {
    let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as usize;
    let half = (width / 2.0).max(0.5);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let (x, y) = (a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t);
        fill_rect(img, x - half, y - half, half * 2.0, half * 2.0, color, 1.0);
    }
}

fn fill_circle(img: &mut RgbImage, cx: f64, cy: f64, r: f64, color: [u8; 3]) {
    let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
    let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
    for py in y0..=y1 {
        for px in x0..=x1 {
            let (dx, dy) = (px as f64 + 0.5 - cx, py as f64 + 0.5 - cy);
            if dx * dx + dy * dy <= r * r {
                blend(img, px, py, color, 1.0);
            }
        }
    }
}

fn fill_wedge(img: &mut RgbImage, cx: f64, cy: f64, r: f64, start: f64, end: f64, color: [u8; 3]) {
    let tau = std::f64::consts::TAU;
    let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
    let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
    for py in y0..=y1 {
        for px in x0..=x1 {
            let (dx, dy) = (px as f64 + 0.5 - cx, py as f64 + 0.5 - cy);
            if dx * dx + dy * dy > r * r {
                continue;
            }
            // Clockwise from twelve o'clock, in [0, tau).
            let angle = dx.atan2(-dy).rem_euclid(tau);
            if angle >= start && angle < end {
                blend(img, px, py, color, 1.0);
            }
        }
    }
}

/// Even-odd scanline fill.
fn fill_polygon(img: &mut RgbImage, points: &[(f64, f64)], color: [u8; 3], alpha: f64) {
    if points.len() < 3 {
        return;
    }
    let (lo, hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    for py in lo.floor() as i64..=hi.ceil() as i64 {
        let y = py as f64 + 0.5;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..points.len() {
            let (a, b) = (points[i], points[(i + 1) % points.len()]);
            if (a.1 <= y && b.1 > y) || (b.1 <= y && a.1 > y) {
                crossings.push(a.0 + (y - a.1) / (b.1 - a.1) * (b.0 - a.0));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for span in crossings.chunks(2) {
            if let [from, to] = span {
                for px in from.round() as i64..to.round() as i64 {
                    blend(img, px, py, color, alpha);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{Chart, Mark, XValues};

    #[test]
    fn test_png_signature_and_pixels() {
        let mut chart = Chart::default();
        chart.add_trace(
            None,
            Mark::Bar,
            XValues::Categories(vec!["a".into(), "b".into()]),
            vec![2.0, 5.0],
        );
        let bytes = chart.to_png().unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (crate::chart::WIDTH, crate::chart::HEIGHT));
        let colored = decoded.pixels().filter(|p| p.0 == crate::chart::PALETTE[0]).count();
        assert!(colored > 100);
    }

    #[test]
    fn test_blend_ignores_out_of_bounds() {
        let mut img = RgbImage::new(2, 2);
        blend(&mut img, -1, 5, [255, 0, 0], 1.0);
        fill_rect(&mut img, 0.0, 0.0, 1.0, 1.0, [9, 9, 9], 1.0);
        assert_eq!(img.get_pixel(0, 0).0, [9, 9, 9]);
        assert_eq!(img.get_pixel(1, 1).0, [0, 0, 0]);
    }
}
