// THEORY (Color Values):
// `ColorValue` is the most fundamental unit of the engine. It pairs the display
// form an operator types or reads (`#RRGGBB`) with the perceptual triple the
// optimizer actually works in (CIE L*a*b*, D65 white). Anything that needs more
// than one color (mixing, distances between formulas) lives in higher modules.
//
// Color forms handled here:
// - display:    `#RRGGBB` (gamma-encoded sRGB bytes)
// - linear:     sRGB -> linear light, 0..1 per channel; the space the optical model
//               mixes in, because reflectance adds in linear light
// - perceptual: L in [0, 100], a/b in [-128, 127]; Euclidean distance here is ΔE76
//
// Key principles:
// 1) Consistency: the hex and the triple are never set independently. Built from
//    hex, the triple is computed from the hex. Built from a triple, the hex is the
//    gamut-clamped encoding of that triple.
// 2) Rejection over coercion: malformed hex and out-of-range triples are errors.
// 3) Efficiency: the byte -> linear conversion is a 256-entry `OnceLock` LUT, so
//    parsing a catalog never calls `powf` per channel.

use crate::error::ColorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

pub type Lightness = f64;
pub type ChromaAxis = f64;
pub type LinearRgb = [f64; 3];

pub const LIGHTNESS_MIN: Lightness = 0.0;
pub const LIGHTNESS_MAX: Lightness = 100.0;
pub const CHROMA_MIN: ChromaAxis = -128.0;
pub const CHROMA_MAX: ChromaAxis = 127.0;

// D65 reference white.
const WHITE_X: f64 = 0.95047;
const WHITE_Y: f64 = 1.0;
const WHITE_Z: f64 = 1.08883;
const LAB_DELTA: f64 = 6.0 / 29.0;

static SRGB_TO_LINEAR_LUT: OnceLock<[f64; 256]> = OnceLock::new();

/// A perceptual color triple (CIE L*a*b*, D65).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    /// Lightness, 0 (black) to 100 (diffuse white).
    pub l: Lightness,
    /// Green (negative) to red (positive) axis.
    pub a: ChromaAxis,
    /// Blue (negative) to yellow (positive) axis.
    pub b: ChromaAxis,
}

impl Lab {
    pub const fn new(l: Lightness, a: ChromaAxis, b: ChromaAxis) -> Self {
        Self { l, a, b }
    }

    /// True when every component is finite and inside the documented range.
    pub fn is_valid(&self) -> bool {
        self.l.is_finite()
            && self.a.is_finite()
            && self.b.is_finite()
            && (LIGHTNESS_MIN..=LIGHTNESS_MAX).contains(&self.l)
            && (CHROMA_MIN..=CHROMA_MAX).contains(&self.a)
            && (CHROMA_MIN..=CHROMA_MAX).contains(&self.b)
    }

    /// Forces the triple into range. Only used for values produced by the optical
    /// model, which can overshoot by floating-point noise.
    pub fn clamped(self) -> Self {
        Self {
            l: self.l.clamp(LIGHTNESS_MIN, LIGHTNESS_MAX),
            a: self.a.clamp(CHROMA_MIN, CHROMA_MAX),
            b: self.b.clamp(CHROMA_MIN, CHROMA_MAX),
        }
    }

    /// Euclidean distance (ΔE76) to another triple.
    pub fn delta_e(&self, other: &Lab) -> f64 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        (dl * dl + da * da + db * db).sqrt()
    }

    /// Lab -> XYZ -> linear sRGB. Out-of-gamut triples produce channels outside
    /// 0..1; callers clamp as needed.
    pub fn to_linear_rgb(&self) -> LinearRgb {
        let fy = (self.l + 16.0) / 116.0;
        let fx = fy + self.a / 500.0;
        let fz = fy - self.b / 200.0;

        let x = WHITE_X * lab_f_inverse(fx);
        let y = WHITE_Y * lab_f_inverse(fy);
        let z = WHITE_Z * lab_f_inverse(fz);

        [
            3.2404542 * x - 1.5371385 * y - 0.4985314 * z,
            -0.9692660 * x + 1.8760108 * y + 0.0415560 * z,
            0.0556434 * x - 0.2040259 * y + 1.0572252 * z,
        ]
    }

    /// linear sRGB -> XYZ -> Lab, clamped into range.
    pub fn from_linear_rgb(rgb: LinearRgb) -> Self {
        let [r, g, b] = rgb;
        let x = r * 0.4124564 + g * 0.3575761 + b * 0.1804375;
        let y = r * 0.2126729 + g * 0.7151522 + b * 0.0721750;
        let z = r * 0.0193339 + g * 0.1191920 + b * 0.9503041;

        let fx = lab_f(x / WHITE_X);
        let fy = lab_f(y / WHITE_Y);
        let fz = lab_f(z / WHITE_Z);

        Lab {
            l: 116.0 * fy - 16.0,
            a: 500.0 * (fx - fy),
            b: 200.0 * (fy - fz),
        }
        .clamped()
    }
}

/// A color in both display and perceptual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ColorRepr")]
pub struct ColorValue {
    hex: String,
    lab: Lab,
}

/// Accepted wire forms: `"#RRGGBB"`, `{ "l", "a", "b" }`, or the full
/// `{ "hex", "lab" }` object (the triple wins over the hex).
#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Hex(String),
    Triple(Lab),
    Full { lab: Lab },
}

impl TryFrom<ColorRepr> for ColorValue {
    type Error = ColorError;

    fn try_from(repr: ColorRepr) -> Result<Self, Self::Error> {
        match repr {
            ColorRepr::Hex(hex) => ColorValue::from_hex(&hex),
            ColorRepr::Triple(lab) | ColorRepr::Full { lab } => ColorValue::from_lab(lab),
        }
    }
}

impl ColorValue {
    /// Parses `#RGB` or `#RRGGBB` (either case).
    pub fn from_hex(hex: &str) -> Result<Self, ColorError> {
        let rgb = parse_hex(hex).ok_or_else(|| ColorError::InvalidHex(hex.to_string()))?;
        let linear = rgb.map(srgb_byte_to_linear);
        Ok(Self {
            hex: format_hex(rgb),
            lab: Lab::from_linear_rgb(linear),
        })
    }

    pub fn from_lab(lab: Lab) -> Result<Self, ColorError> {
        if !lab.is_valid() {
            return Err(ColorError::OutOfRange {
                l: lab.l,
                a: lab.a,
                b: lab.b,
            });
        }
        Ok(Self {
            hex: format_hex(lab_to_rgb8(&lab)),
            lab,
        })
    }

    /// For triples produced by the optical model, which are in range by
    /// construction up to floating-point noise.
    pub fn from_lab_clamped(lab: Lab) -> Self {
        let lab = lab.clamped();
        Self {
            hex: format_hex(lab_to_rgb8(&lab)),
            lab,
        }
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    pub fn lab(&self) -> Lab {
        self.lab
    }

    /// Gamut-clamped 8-bit sRGB bytes of the display form.
    pub fn to_rgb8(&self) -> [u8; 3] {
        lab_to_rgb8(&self.lab)
    }

    pub fn delta_e(&self, other: &ColorValue) -> f64 {
        self.lab.delta_e(&other.lab)
    }
}

impl fmt::Display for ColorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (L {:.2}, a {:.2}, b {:.2})",
            self.hex, self.lab.l, self.lab.a, self.lab.b
        )
    }
}

fn parse_hex(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.strip_prefix('#')?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

fn format_hex(rgb: [u8; 3]) -> String {
    format!("#{:02X}{:02X}{:02X}", rgb[0], rgb[1], rgb[2])
}

fn lab_to_rgb8(lab: &Lab) -> [u8; 3] {
    lab.to_linear_rgb()
        .map(|c| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round() as u8)
}

#[inline]
pub fn srgb_byte_to_linear(value: u8) -> f64 {
    let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
        let mut table = [0.0f64; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let normalized = i as f64 / 255.0;
            *slot = if normalized <= 0.04045 {
                normalized / 12.92
            } else {
                ((normalized + 0.055) / 1.055).powf(2.4)
            };
        }
        table
    });
    table[value as usize]
}

#[inline]
pub fn linear_to_srgb(value: f64) -> f64 {
    if value <= 0.0031308 {
        12.92 * value
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

fn lab_f(t: f64) -> f64 {
    if t > LAB_DELTA.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * LAB_DELTA * LAB_DELTA) + 4.0 / 29.0
    }
}

fn lab_f_inverse(t: f64) -> f64 {
    if t > LAB_DELTA {
        t.powi(3)
    } else {
        3.0 * LAB_DELTA * LAB_DELTA * (t - 4.0 / 29.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_and_black_hit_the_lightness_extremes() {
        let white = ColorValue::from_hex("#FFFFFF").unwrap();
        assert!((white.lab().l - 100.0).abs() < 0.01);
        assert!(white.lab().a.abs() < 0.5 && white.lab().b.abs() < 0.5);

        let black = ColorValue::from_hex("#000000").unwrap();
        assert!(black.lab().l.abs() < 1e-9);
    }

    #[test]
    fn pure_red_matches_reference_lab() {
        let red = ColorValue::from_hex("#ff0000").unwrap();
        assert_eq!(red.hex(), "#FF0000");
        assert!((red.lab().l - 53.24).abs() < 0.1);
        assert!((red.lab().a - 80.09).abs() < 0.2);
        assert!((red.lab().b - 67.20).abs() < 0.2);
    }

    #[test]
    fn shorthand_hex_expands() {
        let short = ColorValue::from_hex("#f80").unwrap();
        let long = ColorValue::from_hex("#FF8800").unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn malformed_hex_is_rejected() {
        for bad in ["FF0000", "#FF00", "#GG0000", "#FF00000", "", "#"] {
            assert!(
                matches!(ColorValue::from_hex(bad), Err(ColorError::InvalidHex(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn out_of_range_lab_is_rejected() {
        assert!(ColorValue::from_lab(Lab::new(101.0, 0.0, 0.0)).is_err());
        assert!(ColorValue::from_lab(Lab::new(50.0, 0.0, 127.5)).is_err());
        assert!(ColorValue::from_lab(Lab::new(f64::NAN, 0.0, 0.0)).is_err());
        assert!(ColorValue::from_lab(Lab::new(60.0, 25.0, -15.0)).is_ok());
    }

    #[test]
    fn hex_round_trips_through_lab() {
        let original = ColorValue::from_hex("#3A7BD5").unwrap();
        let rebuilt = ColorValue::from_lab(original.lab()).unwrap();
        assert_eq!(rebuilt.hex(), "#3A7BD5");
    }

    #[test]
    fn delta_e_is_symmetric_and_zero_on_identity() {
        let a = ColorValue::from_hex("#336699").unwrap();
        let b = ColorValue::from_hex("#996633").unwrap();
        assert_eq!(a.delta_e(&a), 0.0);
        assert!((a.delta_e(&b) - b.delta_e(&a)).abs() < 1e-12);
        assert!(a.delta_e(&b) > 10.0);
    }

    #[test]
    fn deserializes_from_every_wire_form() {
        let from_hex: ColorValue = serde_json::from_str("\"#808080\"").unwrap();
        let from_triple: ColorValue =
            serde_json::from_str(r#"{"l": 60.0, "a": 25.0, "b": -15.0}"#).unwrap();
        let from_full: ColorValue =
            serde_json::from_str(r##"{"hex": "#000000", "lab": {"l": 60.0, "a": 25.0, "b": -15.0}}"##)
                .unwrap();

        assert_eq!(from_hex.hex(), "#808080");
        assert_eq!(from_triple.lab(), Lab::new(60.0, 25.0, -15.0));
        assert_eq!(from_full, from_triple);
        assert!(serde_json::from_str::<ColorValue>("\"not-a-color\"").is_err());
    }
}
