//! Metadata extraction collaborator boundary.
//!
//! Extraction is untrusted and unstable: it may fail unpredictably on any
//! individual source, and one failure signature (extractor logic out of
//! date) is recoverable by falling through to the external tool. Everything
//! downstream only depends on the [`MetadataProvider`] trait.

use async_trait::async_trait;
use serde::Deserialize;

/// Signature reported when the extractor's site-specific logic has rotted.
/// The orchestrator treats this as "skip metadata, go straight to the tool".
const EXTRACTOR_OUTDATED_SIGNATURE: &str = "could not extract functions";

/// One elementary or pre-muxed stream as reported by extraction.
///
/// Closed, strongly-typed record: the negotiator's filtering logic is
/// statically checkable instead of poking at a dynamically-shaped object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub has_video: bool,
    pub has_audio: bool,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub container: String,
    #[serde(default)]
    pub codecs: String,
    #[serde(default)]
    pub audio_bitrate: Option<u32>,
    pub url: String,
}

/// Everything the pipeline needs to know about one source video.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub title: String,
    pub is_live: bool,
    pub streams: Vec<StreamDescriptor>,
}

/// Errors from the extraction collaborator.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("extraction failed: {reason}")]
    Extraction { reason: String },

    #[error("extraction transport failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl MetadataError {
    /// Whether this failure means the extractor itself is out of date, in
    /// which case the external tool strategy can still proceed.
    pub fn is_extractor_outdated(&self) -> bool {
        match self {
            MetadataError::Extraction { reason } => reason
                .to_lowercase()
                .contains(EXTRACTOR_OUTDATED_SIGNATURE),
            MetadataError::Transport(_) => false,
        }
    }
}

/// Metadata extraction capability.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch title, liveness and the ordered stream descriptor list for a
    /// source URL.
    async fn fetch(&self, url: &str) -> Result<VideoMetadata, MetadataError>;
}

/// Syntactic URL validation; anything that is not an absolute http(s) URL
/// with a host is rejected before any strategy runs.
pub fn is_valid_url(raw: &str) -> bool {
    url::Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Wire shape of the extraction collaborator's JSON response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    title: String,
    #[serde(default)]
    is_live: bool,
    #[serde(default)]
    streams: Vec<StreamDescriptor>,
    #[serde(default)]
    error: Option<String>,
}

/// Production provider talking to the out-of-process extractor over HTTP.
pub struct HttpMetadataProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpMetadataProvider {
    /// Creates a provider for the given extractor endpoint. Requests carry
    /// the configured user agent as the request-identity header.
    pub fn new(endpoint: impl Into<String>, user_agent: &str) -> Result<Self, MetadataError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(MetadataError::Transport)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetadataProvider for HttpMetadataProvider {
    async fn fetch(&self, url: &str) -> Result<VideoMetadata, MetadataError> {
        let payload: ExtractResponse = self
            .client
            .get(&self.endpoint)
            .query(&[("url", url)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(reason) = payload.error {
            return Err(MetadataError::Extraction { reason });
        }
        if !payload.valid {
            return Err(MetadataError::Extraction {
                reason: "source reported invalid by extractor".to_string(),
            });
        }

        Ok(VideoMetadata {
            title: payload.title,
            is_live: payload.is_live,
            streams: payload.streams,
        })
    }
}

/// Canned provider for tests and simulation.
pub struct StaticMetadataProvider {
    metadata: Option<VideoMetadata>,
    failure: Option<String>,
}

impl StaticMetadataProvider {
    /// Always returns the given metadata.
    pub fn with_metadata(metadata: VideoMetadata) -> Self {
        Self {
            metadata: Some(metadata),
            failure: None,
        }
    }

    /// Always fails with the given extraction reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            metadata: None,
            failure: Some(reason.into()),
        }
    }
}

#[async_trait]
impl MetadataProvider for StaticMetadataProvider {
    async fn fetch(&self, _url: &str) -> Result<VideoMetadata, MetadataError> {
        if let Some(reason) = &self.failure {
            return Err(MetadataError::Extraction {
                reason: reason.clone(),
            });
        }
        self.metadata
            .clone()
            .ok_or_else(|| MetadataError::Extraction {
                reason: "no metadata configured".to_string(),
            })
    }
}
