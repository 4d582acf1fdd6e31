//! Direct stream-mux fallback.
//!
//! When no pre-muxed download path exists, the pipeline pulls the selected
//! video-only and audio-only streams through an ffmpeg process and pipes the
//! muxed MP4 straight into the response body. The capability may be absent
//! at runtime, so it is modeled as a trait with an Available and an
//! Unavailable implementation selected once at startup.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use super::metadata::StreamDescriptor;
use crate::config::MuxConfig;

/// Muxed output as a byte stream suitable for a response body.
pub type MuxStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Stream mux failures.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("mux capability unavailable: ffmpeg not found")]
    Unavailable,

    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg produced no output")]
    NoOutput,
}

/// Transcode/mux capability.
#[async_trait]
pub trait MuxProcessor: Send + Sync {
    /// Whether the capability is actually usable. Queried once by the
    /// orchestrator before attempting the mux strategy.
    fn is_available(&self) -> bool;

    /// Muxes the two elementary streams into one progressive MP4 stream.
    async fn stream_mux(
        &self,
        video: &StreamDescriptor,
        audio: &StreamDescriptor,
    ) -> Result<MuxStream, MuxError>;
}

/// Whether the video track has to be re-encoded for MP4 delivery.
///
/// H.264 already in an MP4-family container is copied through; everything
/// else goes through x264.
pub fn video_needs_reencode(video: &StreamDescriptor) -> bool {
    let codecs = video.codecs.to_lowercase();
    let is_h264 = codecs.contains("avc1") || codecs.contains("h264");
    !is_h264 || (!video.container.is_empty() && video.container != "mp4")
}

/// Builds the full ffmpeg argument list for one mux run.
///
/// The two input legs are rate-independent network reads; the thread queue
/// size gives each leg buffering headroom so a stall on one does not
/// immediately stall the other. Output is fragmented MP4: `+faststart`
/// needs a seekable output and cannot work on a pipe, and the fragmented
/// layout also puts the index data up front for progressive playback.
pub fn build_ffmpeg_args(
    video: &StreamDescriptor,
    audio: &StreamDescriptor,
    config: &MuxConfig,
    user_agent: &str,
) -> Vec<String> {
    let queue = config.thread_queue_size.to_string();
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostats".into(),
        // Video leg
        "-user_agent".into(),
        user_agent.into(),
        "-thread_queue_size".into(),
        queue.clone(),
        "-i".into(),
        video.url.clone(),
        // Audio leg
        "-user_agent".into(),
        user_agent.into(),
        "-thread_queue_size".into(),
        queue,
        "-i".into(),
        audio.url.clone(),
        // First video track from leg 0, first audio track from leg 1
        "-map".into(),
        "0:v:0".into(),
        "-map".into(),
        "1:a:0".into(),
    ];

    if video_needs_reencode(video) {
        args.extend([
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            config.video_preset.into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);
    } else {
        args.extend(["-c:v".into(), "copy".into()]);
    }

    // Audio is always re-encoded to AAC so playability never depends on the
    // source codec.
    args.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        format!("{}k", config.audio_bitrate_kbps),
        "-movflags".into(),
        "frag_keyframe+empty_moov+default_base_moof".into(),
        // Trim to the shorter leg; avoids a silent or frozen tail when one
        // stream ends first.
        "-shortest".into(),
        "-f".into(),
        "mp4".into(),
        "pipe:1".into(),
    ]);

    args
}

/// Production mux implementation driving the ffmpeg binary.
pub struct FfmpegMuxer {
    ffmpeg_path: PathBuf,
    config: MuxConfig,
    user_agent: String,
}

impl FfmpegMuxer {
    pub fn new(
        ffmpeg_path: Option<&Path>,
        config: MuxConfig,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            config,
            user_agent: user_agent.into(),
        }
    }

    /// Probes whether the configured ffmpeg binary runs at all.
    pub fn detect(ffmpeg_path: Option<&Path>) -> bool {
        let path = ffmpeg_path.unwrap_or_else(|| Path::new("ffmpeg"));
        std::process::Command::new(path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl MuxProcessor for FfmpegMuxer {
    fn is_available(&self) -> bool {
        true
    }

    async fn stream_mux(
        &self,
        video: &StreamDescriptor,
        audio: &StreamDescriptor,
    ) -> Result<MuxStream, MuxError> {
        let args = build_ffmpeg_args(video, audio, &self.config, &self.user_agent);
        info!(
            "starting ffmpeg mux: video={}p reencode={}",
            video.height.unwrap_or(0),
            video_needs_reencode(video)
        );

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MuxError::Spawn)?;

        let stdout = child.stdout.take().ok_or(MuxError::NoOutput)?;
        let stderr = child.stderr.take();

        // Supervisor drains diagnostics and reaps the child. Once bytes are
        // in flight the connection is committed, so a late failure can only
        // be logged.
        tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "vidpipe::mux", "{line}");
                }
            }
            match child.wait().await {
                Ok(status) if status.success() => debug!("ffmpeg mux finished"),
                Ok(status) => error!("ffmpeg mux exited with {status}"),
                Err(err) => error!("failed to reap ffmpeg: {err}"),
            }
        });

        // Wait for the first chunk before committing a response: an
        // immediate failure (bad input URL, codec mismatch) must surface as
        // a structured error while headers can still be changed.
        let mut stream = ReaderStream::with_capacity(stdout, 64 * 1024);
        match stream.next().await {
            Some(Ok(first)) => {
                let rest = futures::stream::iter([Ok(first)]).chain(stream);
                Ok(Box::pin(rest))
            }
            Some(Err(err)) => {
                error!("ffmpeg output read failed before first chunk: {err}");
                Err(MuxError::NoOutput)
            }
            None => Err(MuxError::NoOutput),
        }
    }
}

/// Stand-in used when no ffmpeg binary was detected at startup; fails every
/// mux attempt immediately with a structured error instead of probing at
/// call time.
pub struct UnavailableMuxer;

#[async_trait]
impl MuxProcessor for UnavailableMuxer {
    fn is_available(&self) -> bool {
        false
    }

    async fn stream_mux(
        &self,
        _video: &StreamDescriptor,
        _audio: &StreamDescriptor,
    ) -> Result<MuxStream, MuxError> {
        Err(MuxError::Unavailable)
    }
}
