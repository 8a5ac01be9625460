//! Named colormaps for heatmaps.

/// Piecewise-linear colormap over `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colormap {
    Coolwarm,
    Viridis,
    Blues,
    Reds,
    Greens,
    YlOrRd,
}

const COOLWARM: &[[u8; 3]] = &[[59, 76, 192], [141, 176, 254], [221, 221, 221], [244, 154, 123], [180, 4, 38]];
const VIRIDIS: &[[u8; 3]] = &[[68, 1, 84], [59, 82, 139], [33, 145, 140], [94, 201, 98], [253, 231, 37]];
const BLUES: &[[u8; 3]] = &[[247, 251, 255], [198, 219, 239], [107, 174, 214], [33, 113, 181], [8, 48, 107]];
const REDS: &[[u8; 3]] = &[[255, 245, 240], [252, 187, 161], [251, 106, 74], [203, 24, 29], [103, 0, 13]];
const GREENS: &[[u8; 3]] = &[[247, 252, 245], [199, 233, 192], [116, 196, 118], [35, 139, 69], [0, 68, 27]];
const YLORRD: &[[u8; 3]] = &[[255, 255, 204], [254, 217, 118], [253, 141, 60], [227, 26, 28], [128, 0, 38]];

impl Colormap {
    /// Look up a colormap by its matplotlib name. `_r` suffixes are ignored;
    /// unknown names fall back to viridis.
    pub fn by_name(name: &str) -> Colormap {
        match name.trim_end_matches("_r").to_ascii_lowercase().as_str() {
            "coolwarm" | "rdbu" | "bwr" | "seismic" => Colormap::Coolwarm,
            "blues" => Colormap::Blues,
            "reds" => Colormap::Reds,
            "greens" => Colormap::Greens,
            "ylorrd" | "hot" | "orrd" => Colormap::YlOrRd,
            _ => Colormap::Viridis,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Colormap::Coolwarm => "coolwarm",
            Colormap::Viridis => "viridis",
            Colormap::Blues => "Blues",
            Colormap::Reds => "Reds",
            Colormap::Greens => "Greens",
            Colormap::YlOrRd => "YlOrRd",
        }
    }

    fn anchors(self) -> &'static [[u8; 3]] {
        match self {
            Colormap::Coolwarm => COOLWARM,
            Colormap::Viridis => VIRIDIS,
            Colormap::Blues => BLUES,
            Colormap::Reds => REDS,
            Colormap::Greens => GREENS,
            Colormap::YlOrRd => YLORRD,
        }
    }

    /// Color at `t`, clamped to `[0, 1]`. NaN maps to light grey.
    pub fn sample(self, t: f64) -> [u8; 3] {
        if t.is_nan() {
            return [230, 230, 230];
        }
        let anchors = self.anchors();
        let scaled = t.clamp(0.0, 1.0) * (anchors.len() - 1) as f64;
        let low = (scaled.floor() as usize).min(anchors.len() - 2);
        let frac = scaled - low as f64;
        let (a, b) = (anchors[low], anchors[low + 1]);
        let mix = |i: usize| (f64::from(a[i]) + (f64::from(b[i]) - f64::from(a[i])) * frac).round() as u8;
        [mix(0), mix(1), mix(2)]
    }
}

/// `#rrggbb` for SVG fills.
pub fn hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Black or white, whichever reads better on `rgb`.
pub fn contrast(rgb: [u8; 3]) -> [u8; 3] {
    let luma = 0.299 * f64::from(rgb[0]) + 0.587 * f64::from(rgb[1]) + 0.114 * f64::from(rgb[2]);
    if luma > 140.0 { [0, 0, 0] } else { [255, 255, 255] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_match_anchors() {
        assert_eq!(Colormap::Coolwarm.sample(0.0), COOLWARM[0]);
        assert_eq!(Colormap::Coolwarm.sample(1.0), COOLWARM[4]);
        assert_eq!(Colormap::Coolwarm.sample(7.0), COOLWARM[4]);
        assert_eq!(Colormap::Viridis.sample(f64::NAN), [230, 230, 230]);
    }

    #[test]
    fn test_unknown_name_falls_back() {
        assert_eq!(Colormap::by_name("coolwarm"), Colormap::Coolwarm);
        assert_eq!(Colormap::by_name("Blues_r"), Colormap::Blues);
        assert_eq!(Colormap::by_name("magma"), Colormap::Viridis);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex([255, 0, 16]), "#ff0010");
        assert_eq!(contrast([250, 250, 250]), [0, 0, 0]);
    }
}
