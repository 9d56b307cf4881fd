use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::data::{DuplicateKey, PaletteCandidate, SavedPalette};
use super::storage::{Storage, StorageError};
use crate::clock::{Clock, SystemClock};

/// Default storage key for the saved palette set
pub const DEFAULT_PALETTES_KEY: &str = "saved-palettes";

/// The PaletteLibrary manages the user's saved palettes.
///
/// The whole record set is the unit of persistence: every mutation reads the
/// full set, changes it and writes it back. A save is therefore visible all at
/// once or not at all. Writers in other processes are not coordinated; the
/// last full write wins.
pub struct PaletteLibrary {
    storage: Arc<dyn Storage>,
    key: String,
    clock: Arc<dyn Clock>,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl PaletteLibrary {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_key(storage, DEFAULT_PALETTES_KEY)
    }

    pub fn with_key(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Load the full record set in insertion order, for mutations.
    ///
    /// A missing or corrupt document is an empty set, so the next write
    /// replaces it. A failed read is an error: writing back a partial view
    /// would drop every record that could not be read.
    fn try_load(&self) -> Result<Vec<SavedPalette>, StorageError> {
        let Some(raw) = self.storage.get(&self.key)? else {
            return Ok(Vec::new());
        };

        match serde_json::from_str(&raw) {
            Ok(palettes) => Ok(palettes),
            Err(e) => {
                warn!("⚠️  Saved palettes are corrupt, starting empty: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Load for queries; an unreadable store reads as empty
    fn load(&self) -> Vec<SavedPalette> {
        self.try_load().unwrap_or_else(|e| {
            warn!("⚠️  Could not read saved palettes: {}", e);
            Vec::new()
        })
    }

    fn persist(&self, palettes: &[SavedPalette]) -> Result<(), StorageError> {
        let json = serde_json::to_string(palettes)?;
        self.storage.set(&self.key, &json)
    }

    fn find<'a>(palettes: &'a [SavedPalette], key: &DuplicateKey<'_>) -> Option<&'a SavedPalette> {
        palettes.iter().find(|p| p.duplicate_key() == *key)
    }

    /// Save a palette, or return the existing record with the same duplicate key.
    ///
    /// A duplicate is returned untouched: same id, same timestamp and the name
    /// it was first saved under.
    pub fn save(&self, candidate: PaletteCandidate) -> Result<SavedPalette, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut palettes = self.try_load()?;

        if let Some(existing) = Self::find(&palettes, &candidate.duplicate_key()) {
            debug!("Palette already saved as {}, skipping", existing.id);
            return Ok(existing.clone());
        }

        let created_at = DateTime::from_timestamp_millis(self.clock.now_ms()).unwrap_or_else(Utc::now);
        let palette = SavedPalette {
            id: Uuid::new_v4().to_string(),
            name: candidate.name,
            colors: candidate.colors,
            subject_id: candidate.subject_id,
            subject_name: candidate.subject_name,
            owner_id: candidate.owner_id,
            variant_flag: candidate.variant_flag,
            created_at,
        };

        palettes.push(palette.clone());
        self.persist(&palettes)?;

        info!("💾 Saved palette {} ({})", palette.name, palette.id);
        Ok(palette)
    }

    /// Whether a palette with this duplicate key exists. No side effects.
    pub fn is_saved(
        &self,
        colors: &[String],
        subject_id: Option<u32>,
        owner_id: Option<&str>,
        variant_flag: bool,
    ) -> bool {
        let key = DuplicateKey {
            subject_id,
            colors,
            owner_id,
            variant_flag,
        };
        Self::find(&self.load(), &key).is_some()
    }

    /// All palettes whose owner matches exactly, newest first.
    ///
    /// `None` selects anonymous palettes only; it is not a wildcard.
    pub fn list_by_owner(&self, owner_id: Option<&str>) -> Vec<SavedPalette> {
        let palettes = self
            .load()
            .into_iter()
            .filter(|p| p.owner_id.as_deref() == owner_id)
            .collect();
        newest_first(palettes)
    }

    /// Every saved palette regardless of owner, newest first
    pub fn all(&self) -> Vec<SavedPalette> {
        newest_first(self.load())
    }

    pub fn get(&self, id: &str) -> Option<SavedPalette> {
        self.load().into_iter().find(|p| p.id == id)
    }

    /// Delete by id. Returns false when no record had that id.
    pub fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut palettes = self.try_load()?;

        let before = palettes.len();
        palettes.retain(|p| p.id != id);
        if palettes.len() == before {
            return Ok(false);
        }

        self.persist(&palettes)?;
        info!("🗑️  Deleted palette {}", id);
        Ok(true)
    }
}

/// Sort newest first; records saved later win ties
fn newest_first(mut palettes: Vec<SavedPalette>) -> Vec<SavedPalette> {
    palettes.reverse();
    palettes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    palettes
}

impl std::fmt::Debug for PaletteLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaletteLibrary")
            .field("key", &self.key)
            .finish()
    }
}
