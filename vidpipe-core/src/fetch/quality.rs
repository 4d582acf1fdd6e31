//! Quality negotiation.
//!
//! Maps the user-supplied quality token to the two things the strategies
//! need: a format-selection expression for the external tool, and a concrete
//! (video, audio) descriptor pair for the direct-mux fallback.

use super::metadata::StreamDescriptor;

/// Most permissive fallback expression: best of anything, no constraint.
/// Used for the single bounded retry after a "format not available" failure.
pub const PERMISSIVE_EXPRESSION: &str = "b";

/// Requested output quality, parsed once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// No height ceiling; select the absolute best.
    Auto,
    /// Maximum vertical resolution in pixels.
    MaxHeight(u32),
}

impl Quality {
    /// Parses a free-form quality token.
    ///
    /// "auto", non-numeric and non-positive values all mean [`Quality::Auto`].
    pub fn parse(token: &str) -> Self {
        match token.trim().parse::<u32>() {
            Ok(height) if height > 0 => Quality::MaxHeight(height),
            _ => Quality::Auto,
        }
    }

    fn ceiling(&self) -> u32 {
        match self {
            Quality::Auto => u32::MAX,
            Quality::MaxHeight(h) => *h,
        }
    }

    /// Builds the format-selection expression evaluated by the external tool.
    ///
    /// Three tiers, encoded in the expression itself because the tool
    /// evaluates it server-side in one pass: best video-only stream at or
    /// under the ceiling merged with best audio-only, else best pre-muxed
    /// stream at or under the ceiling, else the unconstrained best.
    pub fn selection_expression(&self) -> String {
        match self {
            Quality::Auto => "bv*+ba/b".to_string(),
            Quality::MaxHeight(h) => {
                format!("bv*[height<={h}]+ba/b[height<={h}]/b")
            }
        }
    }

    /// Picks the (video-only, audio-only) descriptor pair for the mux
    /// strategy, or `None` when either side has no candidate. A missing
    /// side is fatal for the mux strategy, not retryable.
    pub fn select_stream_pair<'a>(
        &self,
        streams: &'a [StreamDescriptor],
    ) -> Option<(&'a StreamDescriptor, &'a StreamDescriptor)> {
        let video = self.select_video_only(streams)?;
        let audio = select_best_audio_only(streams)?;
        Some((video, audio))
    }

    fn select_video_only<'a>(
        &self,
        streams: &'a [StreamDescriptor],
    ) -> Option<&'a StreamDescriptor> {
        let ceiling = self.ceiling();
        let mut candidates: Vec<&StreamDescriptor> = streams
            .iter()
            .filter(|s| s.has_video && !s.has_audio)
            .filter(|s| s.height.unwrap_or(0) <= ceiling)
            .collect();
        candidates.sort_by(|a, b| b.height.unwrap_or(0).cmp(&a.height.unwrap_or(0)));

        // Tie-break toward mp4 among the best-height candidates: the widely
        // compatible container avoids a re-encode in the mux pipeline.
        let best_height = candidates.first()?.height.unwrap_or(0);
        candidates
            .iter()
            .take_while(|s| s.height.unwrap_or(0) == best_height)
            .find(|s| s.container == "mp4")
            .or_else(|| candidates.first())
            .copied()
    }
}

fn select_best_audio_only(streams: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    let mut audios: Vec<&StreamDescriptor> = streams
        .iter()
        .filter(|s| s.has_audio && !s.has_video)
        .collect();
    audios.sort_by(|a, b| b.audio_bitrate.unwrap_or(0).cmp(&a.audio_bitrate.unwrap_or(0)));

    // AAC-family audio muxes into MP4 without transcoding artifacts.
    audios
        .iter()
        .find(|s| s.codecs.contains("mp4a") || s.container == "m4a")
        .or_else(|| audios.first())
        .copied()
}
