//! Remote data module
//!
//! This module handles:
//! - The request-coalescing, TTL and size bounded cache (cache.rs)
//! - Remote failure classification (error.rs)
//! - Subject metadata and artwork over HTTP (http.rs)

pub mod cache;
pub mod error;
pub mod http;

pub use cache::{CacheEntry, RemoteCache};
pub use error::FetchError;
pub use http::{ArtworkSource, HttpArtworkSource, SubjectRecord};
