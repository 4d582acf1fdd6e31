//! Multi-strategy video acquisition.
//!
//! The pipeline turns a source URL plus a requested quality into a single
//! progressively playable MP4. No single acquisition method works for every
//! source, so strategies run in strict priority order: the external
//! downloader tool first (it handles stream merging itself), then a direct
//! two-stream mux through ffmpeg built from primitives this crate fully
//! controls.

pub mod metadata;
pub mod mux;
pub mod orchestrator;
pub mod quality;
pub mod temp;
pub mod tool;

pub use metadata::{
    HttpMetadataProvider, MetadataError, MetadataProvider, StaticMetadataProvider,
    StreamDescriptor, VideoMetadata,
};
pub use mux::{FfmpegMuxer, MuxError, MuxProcessor, MuxStream, UnavailableMuxer};
pub use orchestrator::{Acquired, Orchestrator};
pub use quality::Quality;
pub use temp::{ArtifactError, ArtifactStream, TempArtifact};
pub use tool::{ToolError, ToolRunner};

/// Result type for acquisition operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Failure taxonomy for the acquisition pipeline.
///
/// Every strategy failure is caught at the strategy boundary inside the
/// orchestrator and classified here; the web layer maps variants to HTTP
/// status codes.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid or missing video URL")]
    InvalidUrl,

    #[error("Live streams are not supported")]
    LiveContent,

    #[error("Metadata extraction failed: {reason}")]
    MetadataFailed { reason: String },

    #[error("No suitable video/audio streams found")]
    NoSuitableStreams,

    #[error("External tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("Stream mux failed: {0}")]
    Mux(#[from] MuxError),
}

impl FetchError {
    /// Whether the failure was caused by the client's own input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FetchError::InvalidUrl | FetchError::LiveContent)
    }

    /// Short message safe to surface to the client.
    pub fn user_message(&self) -> String {
        match self {
            FetchError::InvalidUrl => "Invalid or missing video URL".to_string(),
            FetchError::LiveContent => "Live streams are not supported".to_string(),
            FetchError::NoSuitableStreams => {
                "No suitable video/audio streams found".to_string()
            }
            FetchError::Mux(MuxError::Unavailable) => "Audio merge unavailable".to_string(),
            FetchError::MetadataFailed { .. } | FetchError::Tool(_) | FetchError::Mux(_) => {
                "Server error".to_string()
            }
        }
    }
}
