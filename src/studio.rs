//! Subject → artwork → palette orchestration
//!
//! This module handles:
//! - Looking up subjects through the remote cache
//! - Fetching artwork and handing it to the extractor
//! - Saving extracted palettes to the library

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::StudioConfig;
use crate::palette::{ColorExtractor, ColorsExtracted, ExtractionBinding};
use crate::remote::http::normalize_name;
use crate::remote::{ArtworkSource, FetchError, RemoteCache, SubjectRecord};
use crate::state::{PaletteCandidate, PaletteLibrary, SavedPalette, Storage, StorageError};

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("failed to look up {name}: {source}")]
    Subject {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A palette extracted from a subject's artwork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPalette {
    pub subject: SubjectRecord,
    pub variant: bool,
    pub extracted: ColorsExtracted,
}

impl LoadedPalette {
    pub fn default_name(&self) -> String {
        if self.variant {
            format!("{} (variant)", self.subject.name)
        } else {
            self.subject.name.clone()
        }
    }

    pub fn candidate(&self, name: Option<&str>, owner_id: Option<&str>) -> PaletteCandidate {
        let name = name.map(str::to_string).unwrap_or_else(|| self.default_name());
        let candidate = PaletteCandidate::new(name, self.extracted.colors.clone())
            .with_subject(self.subject.id, self.subject.name.clone())
            .with_variant(self.variant);
        match owner_id {
            Some(owner) => candidate.with_owner(owner),
            None => candidate,
        }
    }
}

pub struct Studio {
    source: Arc<dyn ArtworkSource>,
    subjects: RemoteCache<SubjectRecord>,
    extractor: ColorExtractor,
    binding: ExtractionBinding,
    library: PaletteLibrary,
}

impl Studio {
    /// Assemble a studio; the receiver yields every announced extraction
    pub fn new(
        source: Arc<dyn ArtworkSource>,
        subjects: RemoteCache<SubjectRecord>,
        extractor: ColorExtractor,
        library: PaletteLibrary,
    ) -> (Self, mpsc::UnboundedReceiver<ColorsExtracted>) {
        let (binding, events) = ExtractionBinding::new();
        let studio = Self {
            source,
            subjects,
            extractor,
            binding,
            library,
        };
        (studio, events)
    }

    /// Wire everything from config, sharing one storage backend
    pub fn from_config(
        config: &StudioConfig,
        source: Arc<dyn ArtworkSource>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<ColorsExtracted>) {
        let subjects = RemoteCache::persistent(
            config.cache.clone(),
            config.retry.clone(),
            Arc::clone(&clock),
            Arc::clone(&storage),
        );
        let library = PaletteLibrary::with_key(storage, config.storage.palettes_key.clone()).with_clock(clock);
        let extractor = ColorExtractor::from_config(&config.extraction);
        Self::new(source, subjects, extractor, library)
    }

    pub fn library(&self) -> &PaletteLibrary {
        &self.library
    }

    pub fn extractor(&self) -> &ColorExtractor {
        &self.extractor
    }

    pub fn subjects(&self) -> &RemoteCache<SubjectRecord> {
        &self.subjects
    }

    /// Subject metadata, cached under `subject:<name>`
    pub async fn subject(&self, name: &str) -> Result<SubjectRecord, StudioError> {
        let normalized = normalize_name(name).map_err(|source| StudioError::Subject {
            name: name.to_string(),
            source,
        })?;

        let source = Arc::clone(&self.source);
        let lookup = normalized.clone();
        self.subjects
            .fetch(&format!("subject:{normalized}"), move || {
                let source = Arc::clone(&source);
                let name = lookup.clone();
                async move { source.fetch_subject(&name).await }
            })
            .await
            .map_err(|source| StudioError::Subject {
                name: normalized,
                source,
            })
    }

    /// Look up `name` and extract its artwork palette.
    ///
    /// Missing or broken artwork still yields a palette (the fallback grays).
    /// The request becomes current as soon as it starts, so a later call
    /// supersedes this one even if this one's lookup finishes last.
    /// Returns `Ok(None)` if a newer request superseded this one.
    pub async fn load_palette(&self, name: &str, variant: bool) -> Result<Option<LoadedPalette>, StudioError> {
        let mut ticket = self.binding.begin(format!("subject:{}", name.trim().to_lowercase()));

        let subject = self.subject(name).await?;
        if !self.binding.is_current(&ticket) {
            debug!("Lookup for {} superseded, skipping artwork", subject.name);
            return Ok(None);
        }

        let source_label = subject
            .artwork(variant)
            .map(str::to_string)
            .unwrap_or_else(|| format!("subject:{}", subject.name));
        self.binding.retarget(&mut ticket, source_label);

        let extraction = match subject.artwork(variant) {
            Some(url) => match self.source.fetch_image(url).await {
                Ok(bytes) => self.extractor.extract_bytes(bytes).await,
                Err(e) => self.extractor.load_failed(&e),
            },
            None => {
                let missing = FetchError::InvalidInput(format!("{} has no artwork", subject.name));
                self.extractor.load_failed(&missing)
            }
        };

        let Some(extracted) = self.binding.finish(ticket, extraction) else {
            return Ok(None);
        };

        info!("🎨 Extracted {} colors for {}", extracted.colors.len(), subject.name);
        Ok(Some(LoadedPalette {
            subject,
            variant,
            extracted,
        }))
    }

    /// Extract a local image file through the same binding
    pub async fn extract_file(&self, path: &Path) -> Option<ColorsExtracted> {
        let extraction = self.extractor.extract_path(path);
        self.binding.run(path.display().to_string(), extraction).await
    }

    pub fn save(
        &self,
        loaded: &LoadedPalette,
        name: Option<&str>,
        owner_id: Option<&str>,
    ) -> Result<SavedPalette, StudioError> {
        Ok(self.library.save(loaded.candidate(name, owner_id))?)
    }

    pub fn is_saved(&self, loaded: &LoadedPalette, owner_id: Option<&str>) -> bool {
        self.library.is_saved(
            &loaded.extracted.colors,
            Some(loaded.subject.id),
            owner_id,
            loaded.variant,
        )
    }

    pub fn clear_cache(&self) {
        self.subjects.clear();
    }
}
