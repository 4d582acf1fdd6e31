//! Centralized configuration for Vidpipe.
//!
//! All tunable parameters live here so core logic never reads ambient
//! process state. The configuration is built once at startup and passed
//! by reference into the orchestrator and process runner.

use std::path::PathBuf;

/// Browser-like identity sent to upstream sources; some of them refuse
/// requests from obvious non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Central configuration for all Vidpipe components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct VidpipeConfig {
    pub http: HttpConfig,
    pub tool: ToolConfig,
    pub mux: MuxConfig,
    pub fetch: FetchConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Port the server binds to
    pub port: u16,
    /// CORS allowlist; empty means open CORS
    pub cors_origins: Vec<String>,
    /// Directory served as the static frontend
    pub static_dir: PathBuf,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            cors_origins: Vec::new(),
            static_dir: PathBuf::from("static"),
        }
    }
}

/// External tool invocation configuration.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Path to the yt-dlp binary
    pub ytdlp_path: PathBuf,
    /// Explicit ffmpeg location handed to the tool and the mux pipeline
    /// (None = resolve from PATH)
    pub ffmpeg_path: Option<PathBuf>,
    /// How many trailing stderr lines to keep for diagnostics
    pub stderr_tail_lines: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_path: None,
            stderr_tail_lines: 20,
        }
    }
}

/// Transcode/mux pipeline configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Audio output bitrate in kbit/s; audio is always re-encoded
    pub audio_bitrate_kbps: u32,
    /// Input-side buffering headroom so a stall on one leg does not
    /// immediately stall the other
    pub thread_queue_size: u32,
    /// x264 preset used when the video track needs re-encoding
    pub video_preset: &'static str,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            audio_bitrate_kbps: 192,
            thread_queue_size: 2048,
            video_preset: "veryfast",
        }
    }
}

/// Acquisition pipeline configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent for upstream requests (metadata, tool, mux inputs)
    pub user_agent: String,
    /// Directory for per-request temp artifacts
    pub temp_dir: PathBuf,
    /// Metadata extraction collaborator endpoint
    pub metadata_endpoint: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            temp_dir: std::env::temp_dir(),
            metadata_endpoint: "http://127.0.0.1:9155/extract".to_string(),
        }
    }
}

impl VidpipeConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("VIDPIPE_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.http.port = port;
        }

        if let Ok(origins) = std::env::var("VIDPIPE_CORS_ORIGINS") {
            config.http.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(path) = std::env::var("VIDPIPE_YTDLP_PATH") {
            config.tool.ytdlp_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("VIDPIPE_FFMPEG_PATH") {
            config.tool.ffmpeg_path = Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("VIDPIPE_TEMP_DIR") {
            config.fetch.temp_dir = PathBuf::from(dir);
        }

        if let Ok(endpoint) = std::env::var("VIDPIPE_EXTRACTOR_URL") {
            config.fetch.metadata_endpoint = endpoint;
        }

        config
    }

    /// Creates a configuration rooted in an isolated temp directory,
    /// suitable for tests.
    pub fn for_testing(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            fetch: FetchConfig {
                temp_dir: temp_dir.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = VidpipeConfig::default();

        assert_eq!(config.http.port, 3000);
        assert!(config.http.cors_origins.is_empty());
        assert_eq!(config.tool.ytdlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.tool.stderr_tail_lines, 20);
        assert_eq!(config.mux.audio_bitrate_kbps, 192);
        assert_eq!(config.mux.thread_queue_size, 2048);
        assert!(config.fetch.user_agent.contains("Mozilla/5.0"));
    }

    #[test]
    fn env_override() {
        unsafe {
            std::env::set_var("VIDPIPE_PORT", "8080");
            std::env::set_var("VIDPIPE_CORS_ORIGINS", "https://a.example, https://b.example");
            std::env::set_var("VIDPIPE_YTDLP_PATH", "/opt/bin/yt-dlp");
        }

        let config = VidpipeConfig::from_env();

        assert_eq!(config.http.port, 8080);
        assert_eq!(
            config.http.cors_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert_eq!(config.tool.ytdlp_path, PathBuf::from("/opt/bin/yt-dlp"));

        // Cleanup
        unsafe {
            std::env::remove_var("VIDPIPE_PORT");
            std::env::remove_var("VIDPIPE_CORS_ORIGINS");
            std::env::remove_var("VIDPIPE_YTDLP_PATH");
        }
    }

    #[test]
    fn testing_config_uses_given_temp_dir() {
        let config = VidpipeConfig::for_testing("/tmp/vidpipe-test");
        assert_eq!(config.fetch.temp_dir, PathBuf::from("/tmp/vidpipe-test"));
    }
}
