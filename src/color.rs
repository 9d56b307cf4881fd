//! Color math utilities
//!
//! This module handles conversion between the color representations used
//! across the app:
//! - Canonical RGB strings (`rgb(r, g, b)`), the storage form of every color
//! - HEX (`#rrggbb`) for display and sharing
//! - HSL (`hsl(h, s%, l%)`) for display only
//!
//! It also computes WCAG relative luminance and contrast ratios so swatches
//! can pick a readable text color.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// WCAG AA minimum contrast for normal text
pub const WCAG_AA_CONTRAST: f64 = 4.5;

/// An 8-bit sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Format as `#rrggbb`
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Convert to HSL (hue in degrees, saturation and lightness in percent)
    ///
    /// Achromatic colors (`max == min`) report hue 0 and saturation 0.
    pub fn to_hsl(self) -> Hsl {
        let r = self.r as f64 / 255.0;
        let g = self.g as f64 / 255.0;
        let b = self.b as f64 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let l = (max + min) / 2.0;

        if max == min {
            return Hsl {
                h: 0,
                s: 0,
                l: (l * 100.0).round() as u8,
            };
        }

        let d = max - min;
        let s = if l > 0.5 {
            d / (2.0 - max - min)
        } else {
            d / (max + min)
        };

        let h = if max == r {
            (g - b) / d + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / d + 2.0
        } else {
            (r - g) / d + 4.0
        };

        Hsl {
            h: ((h * 60.0).round() as u16) % 360,
            s: (s * 100.0).round() as u8,
            l: (l * 100.0).round() as u8,
        }
    }
}

impl fmt::Display for Rgb {
    /// Canonical storage form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

/// HSL triple, display only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsl {
    /// Hue in degrees (0-359)
    pub h: u16,
    /// Saturation in percent (0-100)
    pub s: u8,
    /// Lightness in percent (0-100)
    pub l: u8,
}

impl fmt::Display for Hsl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hsl({}, {}%, {}%)", self.h, self.s, self.l)
    }
}

/// Target representation for [`convert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    #[default]
    Rgb,
    Hex,
    Hsl,
}

impl FromStr for ColorFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Ok(ColorFormat::Rgb),
            "hex" => Ok(ColorFormat::Hex),
            "hsl" => Ok(ColorFormat::Hsl),
            other => Err(format!("unknown color format: {other}")),
        }
    }
}

/// Parse a color string into its channels
///
/// Accepts `rgb(r, g, b)` / `rgba(r, g, b, a)` (the first three integers are
/// taken, values above 255 saturate) as well as `#rrggbb` and `#rgb`.
///
/// # Returns
/// * The parsed color, or `(0, 0, 0)` when the input is malformed
///
/// The fallback is indistinguishable from real black. Callers that need to
/// tell the two apart must validate the input themselves.
pub fn parse_color(color: &str) -> Rgb {
    let color = color.trim();
    if let Some(hex) = color.strip_prefix('#') {
        return parse_hex(hex).unwrap_or(Rgb::BLACK);
    }

    let mut channels = color
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(|run| run.parse::<u32>().map_or(255, |v| v.min(255) as u8));

    match (channels.next(), channels.next(), channels.next()) {
        (Some(r), Some(g), Some(b)) => Rgb::new(r, g, b),
        _ => Rgb::BLACK,
    }
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    let digits: Vec<u8> = hex
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()?;

    match digits.as_slice() {
        [r, g, b] => Some(Rgb::new(r * 17, g * 17, b * 17)),
        [r1, r2, g1, g2, b1, b2] => Some(Rgb::new(r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2)),
        _ => None,
    }
}

/// Convert a color string into the requested representation
///
/// Deterministic and pure. Malformed input converts as black (see [`parse_color`]).
pub fn convert(color: &str, format: ColorFormat) -> String {
    let rgb = parse_color(color);
    match format {
        ColorFormat::Rgb => rgb.to_string(),
        ColorFormat::Hex => rgb.to_hex(),
        ColorFormat::Hsl => rgb.to_hsl().to_string(),
    }
}

/// sRGB relative luminance in [0, 1]
pub fn relative_luminance(color: Rgb) -> f64 {
    // Gamma-decode each channel before weighting
    let linear = |channel: u8| {
        let c = channel as f64 / 255.0;
        if c <= 0.03928 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };

    0.2126 * linear(color.r) + 0.7152 * linear(color.g) + 0.0722 * linear(color.b)
}

/// WCAG contrast ratio, always >= 1 and symmetric in its arguments
pub fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let la = relative_luminance(a);
    let lb = relative_luminance(b);
    let (lighter, darker) = if la >= lb { (la, lb) } else { (lb, la) };
    (lighter + 0.05) / (darker + 0.05)
}

/// Text color marker for a swatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextColor {
    Black,
    White,
}

impl TextColor {
    pub fn rgb(self) -> Rgb {
        match self {
            TextColor::Black => Rgb::BLACK,
            TextColor::White => Rgb::WHITE,
        }
    }
}

/// Outcome of [`accessible_text_color`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextContrast {
    pub text: TextColor,
    /// Set when even the better text color is below WCAG AA; callers add a scrim
    pub needs_overlay: bool,
    pub ratio: f64,
}

/// Pick black or white text, whichever contrasts more with `background`
pub fn accessible_text_color(background: Rgb) -> TextContrast {
    let on_black = contrast_ratio(background, Rgb::BLACK);
    let on_white = contrast_ratio(background, Rgb::WHITE);

    let (text, ratio) = if on_black >= on_white {
        (TextColor::Black, on_black)
    } else {
        (TextColor::White, on_white)
    };

    TextContrast {
        text,
        needs_overlay: ratio < WCAG_AA_CONTRAST,
        ratio,
    }
}
