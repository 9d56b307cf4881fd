//! Image color extraction module
//!
//! This module handles:
//! - Decoding fetched or local artwork into pixels (loader.rs)
//! - Median-cut quantization down to a few dominant colors (quantize.rs)
//! - The never-failing extractor with its fallback palette (extractor.rs)
//! - Superseding extractions per consumer and announcing results (binding.rs)

pub mod binding;
pub mod extractor;
pub mod loader;
pub mod quantize;

pub use binding::{ColorsExtracted, ExtractionBinding, Ticket};
pub use extractor::{ColorExtractor, Extraction, FallbackReason, Palette, FALLBACK_PALETTE};
pub use quantize::QuantizeError;
