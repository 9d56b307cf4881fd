//! State management module
//!
//! This module handles everything that outlives a single extraction:
//! - Pluggable key-value storage backends (storage.rs)
//! - Shared data structures (data.rs)
//! - The saved palette library with duplicate suppression (library.rs)

pub mod data;
pub mod library;
pub mod storage;

pub use data::{PaletteCandidate, SavedPalette, Swatch};
pub use library::PaletteLibrary;
pub use storage::{FileStorage, MemoryStorage, SqliteStorage, Storage, StorageError};
