//! Acquisition orchestrator.
//!
//! Top-level state machine sequencing the strategies in strict priority
//! order: URL validation, metadata fetch, live-content rejection, the
//! external tool attempt, and finally the direct mux fallback. No strategy
//! starts until the previous one has definitively failed, and every failure
//! is caught and classified at its strategy boundary.

use std::sync::Arc;

use tracing::{info, warn};

use super::metadata::{self, MetadataProvider, VideoMetadata};
use super::mux::{MuxProcessor, MuxStream};
use super::quality::Quality;
use super::temp::{self, TempArtifact};
use super::tool::ToolRunner;
use super::{FetchError, FetchResult};
use crate::config::VidpipeConfig;

/// The result of a successful acquisition, ready to become a response body.
pub enum Acquired {
    /// Downloaded to a temp artifact; size is known up front and the file is
    /// deleted when the consuming stream closes.
    File {
        artifact: TempArtifact,
        filename: String,
    },
    /// Muxed live from two elementary streams; no size is known.
    Stream { body: MuxStream, filename: String },
}

// Hand-written because the boxed body stream has no Debug of its own.
impl std::fmt::Debug for Acquired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Acquired::File { artifact, filename } => f
                .debug_struct("File")
                .field("artifact", artifact)
                .field("filename", filename)
                .finish(),
            Acquired::Stream { filename, .. } => f
                .debug_struct("Stream")
                .field("filename", filename)
                .finish_non_exhaustive(),
        }
    }
}

/// Per-request strategy sequencer. One instance serves many requests; all
/// per-request state lives on the stack of [`Orchestrator::acquire`].
pub struct Orchestrator {
    config: Arc<VidpipeConfig>,
    metadata: Arc<dyn MetadataProvider>,
    muxer: Arc<dyn MuxProcessor>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<VidpipeConfig>,
        metadata: Arc<dyn MetadataProvider>,
        muxer: Arc<dyn MuxProcessor>,
    ) -> Self {
        Self {
            config,
            metadata,
            muxer,
        }
    }

    /// Acquires the video behind `raw_url` at the requested quality.
    pub async fn acquire(&self, raw_url: &str, quality: Quality) -> FetchResult<Acquired> {
        if !metadata::is_valid_url(raw_url) {
            return Err(FetchError::InvalidUrl);
        }

        // Metadata is untrusted and unstable. The one recoverable signature
        // (extractor logic out of date) falls through to the tool with no
        // title hint; everything else is surfaced, since most metadata
        // failures are non-transient.
        let metadata = match self.metadata.fetch(raw_url).await {
            Ok(meta) => Some(meta),
            Err(err) if err.is_extractor_outdated() => {
                warn!("metadata extractor out of date, continuing without metadata: {err}");
                None
            }
            Err(err) => {
                return Err(FetchError::MetadataFailed {
                    reason: err.to_string(),
                });
            }
        };

        // Live content has no fixed duration or output size.
        if metadata.as_ref().is_some_and(|m| m.is_live) {
            return Err(FetchError::LiveContent);
        }

        let title = metadata
            .as_ref()
            .map(|m| temp::sanitize_name(&m.title));
        let filename = format!("{}.mp4", title.as_deref().unwrap_or("video"));

        let runner = ToolRunner::new(&self.config.tool, &self.config.fetch);
        let tool_failure = match runner
            .download_to_file(raw_url, quality, title.as_deref())
            .await
        {
            Ok(artifact) => {
                info!("tool strategy produced {} bytes", artifact.size());
                return Ok(Acquired::File { artifact, filename });
            }
            Err(err) => err,
        };

        // The mux fallback needs stream descriptors; without metadata the
        // tool failure is the final word.
        let Some(metadata) = metadata else {
            return Err(FetchError::Tool(tool_failure));
        };
        warn!("tool strategy failed, attempting direct mux: {tool_failure}");

        self.mux_fallback(&metadata, quality, filename).await
    }

    async fn mux_fallback(
        &self,
        metadata: &VideoMetadata,
        quality: Quality,
        filename: String,
    ) -> FetchResult<Acquired> {
        if !self.muxer.is_available() {
            return Err(FetchError::Mux(super::MuxError::Unavailable));
        }

        let (video, audio) = quality
            .select_stream_pair(&metadata.streams)
            .ok_or(FetchError::NoSuitableStreams)?;

        let body = self.muxer.stream_mux(video, audio).await?;
        info!("mux strategy streaming {}p", video.height.unwrap_or(0));
        Ok(Acquired::Stream { body, filename })
    }
}
