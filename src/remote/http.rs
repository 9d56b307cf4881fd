use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::FetchError;
use crate::config::{ApiConfig, RetryConfig};

/// Subject metadata needed to find its artwork
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub id: u32,
    pub name: String,
    pub artwork_url: Option<String>,
    /// Alternate-coloring artwork
    pub variant_artwork_url: Option<String>,
}

impl SubjectRecord {
    pub fn artwork(&self, variant: bool) -> Option<&str> {
        if variant {
            self.variant_artwork_url.as_deref()
        } else {
            self.artwork_url.as_deref()
        }
    }
}

/// Where subject metadata and artwork bytes come from
#[async_trait]
pub trait ArtworkSource: Send + Sync {
    async fn fetch_subject(&self, name: &str) -> Result<SubjectRecord, FetchError>;

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Lowercased, trimmed subject name; only ASCII letters, digits and '-'
pub fn normalize_name(name: &str) -> Result<String, FetchError> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Err(FetchError::InvalidInput("subject name is empty".to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(FetchError::InvalidInput(format!("invalid subject name: {name}")));
    }
    Ok(name)
}

#[derive(Debug, Deserialize)]
struct PokemonResponse {
    id: u32,
    name: String,
    sprites: Sprites,
}

#[derive(Debug, Default, Deserialize)]
struct Sprites {
    #[serde(default)]
    other: Option<OtherSprites>,
}

#[derive(Debug, Default, Deserialize)]
struct OtherSprites {
    #[serde(rename = "official-artwork", default)]
    official_artwork: Option<Artwork>,
}

#[derive(Debug, Default, Deserialize)]
struct Artwork {
    front_default: Option<String>,
    front_shiny: Option<String>,
}

impl From<PokemonResponse> for SubjectRecord {
    fn from(response: PokemonResponse) -> Self {
        let artwork = response
            .sprites
            .other
            .and_then(|other| other.official_artwork)
            .unwrap_or_default();
        Self {
            id: response.id,
            name: response.name,
            artwork_url: artwork.front_default,
            variant_artwork_url: artwork.front_shiny,
        }
    }
}

/// [`ArtworkSource`] over a PokeAPI-compatible HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpArtworkSource {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpArtworkSource {
    pub fn new(api: &ApiConfig, retry: &RetryConfig) -> Result<Self, FetchError> {
        let timeout = retry.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("palette-studio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if error.is_decode() {
            FetchError::Decode(error.to_string())
        } else if let Some(status) = error.status() {
            FetchError::status(status.as_u16(), error.to_string())
        } else {
            FetchError::Network(error.to_string())
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("request failed");
            return Err(FetchError::status(status.as_u16(), format!("{reason} ({url})")));
        }
        Ok(response)
    }
}

#[async_trait]
impl ArtworkSource for HttpArtworkSource {
    async fn fetch_subject(&self, name: &str) -> Result<SubjectRecord, FetchError> {
        let name = normalize_name(name)?;
        let url = format!("{}/pokemon/{}", self.base_url, name);

        let response: PokemonResponse = self
            .get(&url)
            .await?
            .json()
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(response.into())
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if url.trim().is_empty() {
            return Err(FetchError::InvalidInput("image url is empty".to_string()));
        }
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(bytes.to_vec())
    }
}
