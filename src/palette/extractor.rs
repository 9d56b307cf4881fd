use std::fmt;
use std::path::Path;

use image::RgbaImage;
use tokio::task;
use tracing::{debug, warn};

use super::loader;
use super::quantize::{self, QuantizeError};
use crate::color::Rgb;
use crate::config::ExtractionConfig;

/// Neutral grays shown whenever extraction cannot produce real colors
pub const FALLBACK_PALETTE: [Rgb; 3] = [
    Rgb::new(255, 255, 255),
    Rgb::new(200, 200, 200),
    Rgb::new(150, 150, 150),
];

/// An ordered set of colors, dominant first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette(Vec<Rgb>);

impl Palette {
    pub fn new(colors: Vec<Rgb>) -> Self {
        Self(colors)
    }

    /// The fallback grays, cycled to `k` entries
    pub fn fallback(k: usize) -> Self {
        Self(FALLBACK_PALETTE.iter().copied().cycle().take(k).collect())
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical `rgb(r, g, b)` strings
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(Rgb::to_string).collect()
    }
}

/// Why the fallback palette was used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The artwork never became usable pixels
    Load(String),
    /// Quantization failed on a decoded image
    Quantize(QuantizeError),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Load(msg) => write!(f, "load failed: {msg}"),
            FallbackReason::Quantize(err) => write!(f, "quantization failed: {err}"),
        }
    }
}

/// Result of one extraction. Both variants carry a usable palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Extracted(Palette),
    Fallback { palette: Palette, reason: FallbackReason },
}

impl Extraction {
    pub fn palette(&self) -> &Palette {
        match self {
            Extraction::Extracted(palette) => palette,
            Extraction::Fallback { palette, .. } => palette,
        }
    }

    pub fn into_palette(self) -> Palette {
        match self {
            Extraction::Extracted(palette) => palette,
            Extraction::Fallback { palette, .. } => palette,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Extraction::Fallback { .. })
    }
}

/// Dominant-color extractor
///
/// Never fails: decode and quantization errors are logged and replaced by
/// [`FALLBACK_PALETTE`] so callers always have something to render. Performs
/// no network I/O; callers hand it pixels, bytes or a local path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorExtractor {
    color_count: usize,
    quality: u32,
}

impl Default for ColorExtractor {
    fn default() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }
}

impl ColorExtractor {
    pub fn new(color_count: usize, quality: u32) -> Self {
        Self {
            color_count,
            quality: quality.max(1),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.color_count, config.quality)
    }

    pub fn color_count(&self) -> usize {
        self.color_count
    }

    /// Extract from already decoded pixels
    pub fn extract_image(&self, image: &RgbaImage) -> Extraction {
        match quantize::quantize(image, self.color_count, self.quality) {
            Ok(colors) => {
                debug!("🎨 Extracted {} colors from {}x{}", colors.len(), image.width(), image.height());
                Extraction::Extracted(Palette::new(colors))
            }
            Err(e) => self.fallback(FallbackReason::Quantize(e)),
        }
    }

    /// Decode and extract on the blocking pool
    pub async fn extract_bytes(&self, bytes: Vec<u8>) -> Extraction {
        match loader::load_bytes(bytes).await {
            Ok(image) => self.extract_decoded(image).await,
            Err(e) => self.load_failed(&e),
        }
    }

    /// Read, decode and extract a local image file
    pub async fn extract_path(&self, path: impl AsRef<Path>) -> Extraction {
        match loader::load_path(path).await {
            Ok(image) => self.extract_decoded(image).await,
            Err(e) => self.load_failed(&e),
        }
    }

    async fn extract_decoded(&self, image: RgbaImage) -> Extraction {
        let extractor = *self;
        match task::spawn_blocking(move || extractor.extract_image(&image)).await {
            Ok(extraction) => extraction,
            Err(e) => self.fallback(FallbackReason::Quantize(QuantizeError::Aborted(e.to_string()))),
        }
    }

    /// Fallback for artwork that could not be obtained at all
    pub fn load_failed(&self, error: &dyn std::error::Error) -> Extraction {
        self.fallback(FallbackReason::Load(error.to_string()))
    }

    fn fallback(&self, reason: FallbackReason) -> Extraction {
        match &reason {
            FallbackReason::Load(msg) => warn!(branch = "load", "⚠️  Artwork failed to load, using fallback palette: {}", msg),
            FallbackReason::Quantize(err) => warn!(branch = "quantize", "⚠️  Color quantization failed, using fallback palette: {}", err),
        }
        Extraction::Fallback {
            palette: Palette::fallback(self.color_count),
            reason,
        }
    }
}
