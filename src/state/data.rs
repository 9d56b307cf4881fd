//! Shared data structures for the palette library
//!
//! These structs represent the data model that flows between the storage
//! layer, the extractor and the command line front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::color::{self, Hsl, Rgb, TextColor};

/// A palette persisted by an explicit save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedPalette {
    /// Unique id, assigned on save
    pub id: String,
    /// Display name (not part of the duplicate key)
    pub name: String,
    /// Canonical `rgb(r, g, b)` strings, dominant first
    pub colors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    /// `None` marks an anonymous, device-local palette
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Alternate artwork variant (e.g. shiny form)
    #[serde(default)]
    pub variant_flag: bool,
    pub created_at: DateTime<Utc>,
}

/// Input to [`PaletteLibrary::save`](super::library::PaletteLibrary::save)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteCandidate {
    pub name: String,
    pub colors: Vec<String>,
    #[serde(default)]
    pub subject_id: Option<u32>,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub variant_flag: bool,
}

impl PaletteCandidate {
    pub fn new(name: impl Into<String>, colors: Vec<String>) -> Self {
        Self {
            name: name.into(),
            colors,
            ..Self::default()
        }
    }

    pub fn with_subject(mut self, id: u32, name: impl Into<String>) -> Self {
        self.subject_id = Some(id);
        self.subject_name = Some(name.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_variant(mut self, variant_flag: bool) -> Self {
        self.variant_flag = variant_flag;
        self
    }

    pub fn duplicate_key(&self) -> DuplicateKey<'_> {
        DuplicateKey {
            subject_id: self.subject_id,
            colors: &self.colors,
            owner_id: self.owner_id.as_deref(),
            variant_flag: self.variant_flag,
        }
    }
}

/// Identity used for duplicate detection
///
/// Colors compare as exact strings in order. `id` and `name` never take part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DuplicateKey<'a> {
    pub subject_id: Option<u32>,
    pub colors: &'a [String],
    pub owner_id: Option<&'a str>,
    pub variant_flag: bool,
}

impl SavedPalette {
    pub fn duplicate_key(&self) -> DuplicateKey<'_> {
        DuplicateKey {
            subject_id: self.subject_id,
            colors: &self.colors,
            owner_id: self.owner_id.as_deref(),
            variant_flag: self.variant_flag,
        }
    }

    /// Display properties for every color, dominant first
    pub fn swatches(&self) -> Vec<Swatch> {
        self.colors.iter().map(|c| Swatch::from_color(c)).collect()
    }
}

/// Derived display info for one palette color; never stored
#[derive(Debug, Clone, PartialEq)]
pub struct Swatch {
    pub rgb: Rgb,
    pub hex: String,
    pub hsl: Hsl,
    pub text: TextColor,
    pub needs_overlay: bool,
}

impl Swatch {
    pub fn from_color(color: &str) -> Self {
        let rgb = color::parse_color(color);
        let contrast = color::accessible_text_color(rgb);
        Self {
            rgb,
            hex: rgb.to_hex(),
            hsl: rgb.to_hsl(),
            text: contrast.text,
            needs_overlay: contrast.needs_overlay,
        }
    }
}
