//! Artwork decoding
//!
//! Turns encoded artwork (bytes fetched from the network or read from disk)
//! into RGBA pixels the quantizer can walk. Decoding is CPU-bound, so the
//! async entry points hand the work to the blocking pool.

use std::path::Path;

use image::RgbaImage;
use thiserror::Error;
use tokio::task;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image is empty")]
    Empty,

    #[error("task join error: {0}")]
    Join(String),
}

/// Decode encoded image bytes (format sniffed from the content)
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgba8())
}

/// Decode image bytes on the blocking pool
pub async fn load_bytes(bytes: Vec<u8>) -> Result<RgbaImage, LoadError> {
    task::spawn_blocking(move || decode_bytes(&bytes))
        .await
        .map_err(|e| LoadError::Join(e.to_string()))?
}

/// Read and decode an image file
pub async fn load_path(path: impl AsRef<Path>) -> Result<RgbaImage, LoadError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|source| LoadError::Read {
        path: path.display().to_string(),
        source,
    })?;
    load_bytes(bytes).await
}
