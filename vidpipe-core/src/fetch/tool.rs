//! External downloader tool supervision.
//!
//! Spawns yt-dlp with a format-selection expression and an output template,
//! drains its stderr into a bounded diagnostic tail, classifies the exit,
//! and performs exactly one retry with the permissive expression when the
//! failure matches a known recoverable signature. Children are always
//! reaped; `kill_on_drop` covers the cancellation path.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::quality::{PERMISSIVE_EXPRESSION, Quality};
use super::temp::{self, ArtifactError, TempArtifact};
use crate::config::{FetchConfig, ToolConfig};

/// Failure signatures that warrant the single permissive retry. The most
/// common transient cause is a height ceiling with no matching format for
/// this particular source.
const RETRYABLE_SIGNATURES: &[&str] =
    &["Requested format is not available", "is not a valid URL"];

/// External tool failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code:?}: {diagnostic}")]
    Failed {
        tool: String,
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("I/O error while supervising {tool}: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Runs the external extraction tool against an allocated temp base.
pub struct ToolRunner<'a> {
    tool: &'a ToolConfig,
    fetch: &'a FetchConfig,
}

impl<'a> ToolRunner<'a> {
    pub fn new(tool: &'a ToolConfig, fetch: &'a FetchConfig) -> Self {
        Self { tool, fetch }
    }

    /// Downloads the source to a temp artifact at the requested quality.
    ///
    /// On a recoverable failure signature, retries exactly once with the
    /// permissive "best of anything" expression; any other failure, or a
    /// second failure, surfaces as fatal for this strategy.
    pub async fn download_to_file(
        &self,
        url: &str,
        quality: Quality,
        title_hint: Option<&str>,
    ) -> Result<TempArtifact, ToolError> {
        let base = temp::allocate_base(&self.fetch.temp_dir, title_hint);
        let primary = quality.selection_expression();

        let outcome = match self.run_once(url, &primary, &base).await {
            Ok(artifact) => Ok(artifact),
            Err(err) if is_retryable(&err) => {
                warn!("tool failed with recoverable signature, retrying permissive: {err}");
                self.run_once(url, PERMISSIVE_EXPRESSION, &base).await
            }
            Err(err) => Err(err),
        };

        // A failed strategy must leave nothing behind; partial downloads
        // under the base would otherwise accumulate in the temp directory.
        if outcome.is_err() {
            temp::cleanup_base(&base);
        }
        outcome
    }

    async fn run_once(
        &self,
        url: &str,
        format: &str,
        base: &Path,
    ) -> Result<TempArtifact, ToolError> {
        let tool_name = self.tool.ytdlp_path.display().to_string();

        let mut cmd = Command::new(&self.tool.ytdlp_path);
        cmd.arg(url);
        if let Some(ffmpeg) = &self.tool.ffmpeg_path {
            cmd.arg("--ffmpeg-location").arg(ffmpeg);
        }
        cmd.arg("-f")
            .arg(format)
            .arg("--quiet")
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("--no-cache-dir")
            .arg("--no-part")
            .arg("--add-header")
            .arg(format!("User-Agent: {}", self.fetch.user_agent))
            .arg("--merge-output-format")
            .arg("mp4")
            .arg("--force-overwrites")
            .arg("-o")
            .arg(format!("{}.%(ext)s", base.display()));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("running {tool_name} with format {format:?}");
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            tool: tool_name.clone(),
            source,
        })?;

        // Drain stderr incrementally; a runaway process must not grow an
        // unbounded buffer, so only the last N lines are kept for triage.
        let stderr = child.stderr.take();
        let tail_limit = self.tool.stderr_tail_lines;
        let drain = tokio::spawn(async move {
            let mut tail: VecDeque<String> = VecDeque::with_capacity(tail_limit);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "vidpipe::tool", "{line}");
                    if tail_limit == 0 {
                        continue;
                    }
                    if tail.len() == tail_limit {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail
        });

        let status = child.wait().await.map_err(|source| ToolError::Io {
            tool: tool_name.clone(),
            source,
        })?;
        let tail = drain.await.unwrap_or_default();

        if !status.success() {
            let diagnostic = tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(ToolError::Failed {
                tool: tool_name,
                code: status.code(),
                diagnostic,
            });
        }

        // A zero exit with nothing usable on disk is still a failure.
        Ok(TempArtifact::resolve(base)?)
    }
}

fn is_retryable(err: &ToolError) -> bool {
    match err {
        ToolError::Failed { diagnostic, .. } => RETRYABLE_SIGNATURES
            .iter()
            .any(|sig| diagnostic.contains(sig)),
        _ => false,
    }
}
