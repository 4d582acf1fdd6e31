//! Temp artifact management for the external-tool strategy.
//!
//! The tool writes to a caller-allocated base path but chooses the final
//! extension itself (container renaming happens after its merge step), so
//! the produced file has to be resolved after the fact. Artifacts are
//! deleted when dropped, which ties cleanup to the consuming stream's
//! lifetime instead of to explicit callbacks.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use rand::Rng;
use tokio_util::io::ReaderStream;

/// Characters stripped from user-controlled names before they touch the
/// filesystem or a Content-Disposition header.
const HOSTILE_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Artifact resolution and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("no output file found for base {base}")]
    NotFound { base: String },

    #[error("output file is empty: {path}")]
    Empty { path: String },

    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replaces filesystem-hostile characters and substitutes a generic default
/// when nothing printable remains.
pub fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if HOSTILE_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Allocates a collision-resistant output base path (no extension) under
/// `temp_dir`. The temp directory is a shared namespace; per-request unique
/// naming is the only disambiguation, never locks.
pub fn allocate_base(temp_dir: &Path, hint: Option<&str>) -> PathBuf {
    let safe = sanitize_name(hint.unwrap_or(""));
    let uniq: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    temp_dir.join(format!("{safe}-{uniq}"))
}

/// Finds the file the tool actually produced for `base`.
///
/// Prefers a non-empty exact `.mp4` match (the requested merge container),
/// otherwise picks the largest sibling sharing the base prefix. The size
/// rule disambiguates leftover intermediates the tool may not have cleaned
/// up.
pub fn resolve_produced(base: &Path) -> Option<PathBuf> {
    let dir = base.parent()?;
    let stem = base.file_name()?.to_str()?;

    let exact = dir.join(format!("{stem}.mp4"));
    if let Ok(meta) = std::fs::metadata(&exact)
        && meta.len() > 0
    {
        return Some(exact);
    }

    let prefix = format!("{stem}.");
    let mut best: Option<(PathBuf, u64)> = None;
    for entry in std::fs::read_dir(dir).ok()? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if best.as_ref().is_none_or(|(_, size)| meta.len() > *size) {
            best = Some((entry.path(), meta.len()));
        }
    }
    best.map(|(path, _)| path)
}

/// Best-effort removal of everything the tool produced for an output base.
/// Called when the strategy fails, so partial downloads do not accumulate
/// in the shared temp directory.
pub fn cleanup_base(base: &Path) {
    let Some(dir) = base.parent() else { return };
    let Some(stem) = base.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let prefix = format!("{stem}.");
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix)
            && let Err(err) = std::fs::remove_file(entry.path())
        {
            tracing::debug!("partial output {} not removed: {err}", entry.path().display());
        }
    }
}

/// A resolved, validated temp output file.
///
/// Deleted on drop, so ownership transfer is the cleanup contract: whoever
/// holds the artifact last (usually an [`ArtifactStream`] feeding a response
/// body) triggers the deletion, on success and error paths alike.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    size: u64,
}

impl TempArtifact {
    /// Resolves and validates the produced file for an output base.
    pub fn resolve(base: &Path) -> Result<Self, ArtifactError> {
        let path = resolve_produced(base).ok_or_else(|| ArtifactError::NotFound {
            base: base.display().to_string(),
        })?;
        let size = std::fs::metadata(&path)?.len();
        if size == 0 {
            return Err(ArtifactError::Empty {
                path: path.display().to_string(),
            });
        }
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes; drives the Content-Length header for file-backed
    /// responses.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consumes the artifact into a byte stream. The file is deleted when
    /// the stream is dropped, regardless of how far the read got.
    pub async fn into_stream(self) -> std::io::Result<ArtifactStream> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(ArtifactStream {
            inner: ReaderStream::new(file),
            _artifact: self,
        })
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        // Best-effort; a missing file at this point is not an error.
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::debug!("temp artifact {} not removed: {err}", self.path.display());
        }
    }
}

/// Byte stream over a temp artifact that owns the artifact, so deletion
/// happens exactly once when the consuming body closes.
pub struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    _artifact: TempArtifact,
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn sanitize_strips_hostile_characters() {
        assert_eq!(sanitize_name("a/b\\c:d*e?f\"g<h>i|j"), "a b c d e f g h i j");
        assert_eq!(sanitize_name("   "), "video");
        assert_eq!(sanitize_name(""), "video");
        assert_eq!(sanitize_name("Plain Title"), "Plain Title");
    }

    #[test]
    fn allocated_bases_are_unique() {
        let dir = tempdir().unwrap();
        let a = allocate_base(dir.path(), Some("clip"));
        let b = allocate_base(dir.path(), Some("clip"));
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with("clip-"));
    }

    #[test]
    fn allocated_base_defaults_hint() {
        let dir = tempdir().unwrap();
        let base = allocate_base(dir.path(), None);
        assert!(base.file_name().unwrap().to_str().unwrap().starts_with("video-"));
    }

    #[test]
    fn resolve_prefers_exact_mp4_over_larger_sibling() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        std::fs::write(dir.path().join("clip-abc123.mp4"), vec![0u8; 500]).unwrap();
        std::fs::write(dir.path().join("clip-abc123.part"), vec![0u8; 10]).unwrap();

        let resolved = resolve_produced(&base).unwrap();
        assert_eq!(resolved, dir.path().join("clip-abc123.mp4"));
    }

    #[test]
    fn resolve_falls_back_to_largest_sibling() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        std::fs::write(dir.path().join("clip-abc123.webm"), vec![0u8; 900]).unwrap();
        std::fs::write(dir.path().join("clip-abc123.part"), vec![0u8; 10]).unwrap();

        let resolved = resolve_produced(&base).unwrap();
        assert_eq!(resolved, dir.path().join("clip-abc123.webm"));
    }

    #[test]
    fn resolve_skips_empty_exact_match() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        std::fs::write(dir.path().join("clip-abc123.mp4"), b"").unwrap();
        std::fs::write(dir.path().join("clip-abc123.webm"), vec![0u8; 64]).unwrap();

        let resolved = resolve_produced(&base).unwrap();
        assert_eq!(resolved, dir.path().join("clip-abc123.webm"));
    }

    #[test]
    fn resolve_ignores_unrelated_files() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        std::fs::write(dir.path().join("other-file.mp4"), vec![0u8; 500]).unwrap();

        assert!(resolve_produced(&base).is_none());
    }

    #[test]
    fn cleanup_removes_all_base_siblings() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        std::fs::write(dir.path().join("clip-abc123.mp4"), b"partial").unwrap();
        std::fs::write(dir.path().join("clip-abc123.f137.webm"), b"leftover").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"keep").unwrap();

        cleanup_base(&base);

        assert!(!dir.path().join("clip-abc123.mp4").exists());
        assert!(!dir.path().join("clip-abc123.f137.webm").exists());
        assert!(dir.path().join("other.mp4").exists());
    }

    #[test]
    fn artifact_rejects_empty_output() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        std::fs::write(dir.path().join("clip-abc123.part"), b"").unwrap();

        let err = TempArtifact::resolve(&base).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. } | ArtifactError::Empty { .. }));
    }

    #[test]
    fn artifact_deleted_on_drop() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        let file = dir.path().join("clip-abc123.mp4");
        std::fs::write(&file, vec![0u8; 32]).unwrap();

        let artifact = TempArtifact::resolve(&base).unwrap();
        assert_eq!(artifact.size(), 32);
        drop(artifact);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn artifact_deleted_after_stream_consumed() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        let file = dir.path().join("clip-abc123.mp4");
        std::fs::write(&file, vec![7u8; 4096]).unwrap();

        let artifact = TempArtifact::resolve(&base).unwrap();
        let mut stream = artifact.into_stream().await.unwrap();

        let mut total = 0usize;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 4096);

        drop(stream);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn artifact_deleted_when_stream_abandoned_early() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("clip-abc123");
        let file = dir.path().join("clip-abc123.mp4");
        std::fs::write(&file, vec![7u8; 4096]).unwrap();

        let artifact = TempArtifact::resolve(&base).unwrap();
        let mut stream = artifact.into_stream().await.unwrap();
        let _ = stream.next().await;

        // Simulates a client disconnect mid-stream.
        drop(stream);
        assert!(!file.exists());
    }
}
