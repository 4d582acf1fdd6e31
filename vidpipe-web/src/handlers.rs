//! Request handlers and the HTTP mapping of the acquisition error taxonomy.

use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use vidpipe_core::fetch::{Acquired, FetchError, MuxError, Quality, metadata};

use crate::server::AppState;

const DETAIL_LIMIT: usize = 600;

/// Query parameters shared by /download and /formats.
#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    pub url: Option<String>,
    pub q: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

/// Lists the heights of pre-muxed streams so the frontend can populate its
/// quality picker.
pub async fn formats(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Response {
    let Some(url) = query
        .url
        .as_deref()
        .filter(|u| metadata::is_valid_url(u))
    else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid or missing video URL", None);
    };

    match state.metadata.fetch(url).await {
        Ok(meta) => {
            let mut heights: Vec<u32> = meta
                .streams
                .iter()
                .filter(|s| s.has_video && s.has_audio)
                .filter_map(|s| s.height)
                .collect();
            heights.sort_unstable();
            heights.dedup();
            let max_height = heights.last().copied();
            Json(json!({ "heights": heights, "maxHeight": max_height })).into_response()
        }
        Err(err) => {
            error!("formats error: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load formats",
                None,
            )
        }
    }
}

/// Acquires the video and streams it back as an attachment.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Response {
    let Some(url) = query.url else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid or missing video URL", None);
    };
    let quality = Quality::parse(query.q.as_deref().unwrap_or("auto"));

    match state.orchestrator.acquire(&url, quality).await {
        Ok(Acquired::File { artifact, filename }) => {
            let size = artifact.size();
            match artifact.into_stream().await {
                Ok(stream) => Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "video/mp4")
                    .header(header::CONTENT_LENGTH, size)
                    .header(header::CONTENT_DISPOSITION, content_disposition(&filename))
                    .body(Body::from_stream(stream))
                    .unwrap(),
                Err(err) => {
                    error!("failed to open resolved artifact: {err}");
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Server error",
                        Some(err.to_string()),
                    )
                }
            }
        }
        // Live-muxed output has no known size; the body streams until the
        // shorter input leg ends.
        Ok(Acquired::Stream { body, filename }) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CONTENT_DISPOSITION, content_disposition(&filename))
            .body(Body::from_stream(body))
            .unwrap(),
        Err(err) => fetch_error_response(err),
    }
}

fn fetch_error_response(err: FetchError) -> Response {
    let status = match &err {
        FetchError::InvalidUrl | FetchError::LiveContent => StatusCode::BAD_REQUEST,
        FetchError::NoSuitableStreams => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        FetchError::Mux(MuxError::Unavailable) => StatusCode::BAD_GATEWAY,
        FetchError::MetadataFailed { .. } | FetchError::Tool(_) | FetchError::Mux(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    if status.is_server_error() {
        error!("download failed: {err}");
    }

    // Clients get the classified message plus a truncated diagnostic tail,
    // never raw internals for their own input mistakes.
    let detail = (!err.is_client_error()).then(|| truncate(&err.to_string(), DETAIL_LIMIT));
    error_response(status, &err.user_message(), detail)
}

/// Titles can carry characters that do not survive a header value; the
/// filename is reduced to printable ASCII, with a generic fallback when
/// nothing usable remains.
fn content_disposition(filename: &str) -> HeaderValue {
    let ascii: String = filename
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect();
    let name = match ascii.trim() {
        "" | ".mp4" => "video.mp4",
        trimmed => trimmed,
    };
    HeaderValue::from_str(&format!("attachment; filename=\"{name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"video.mp4\""))
}

fn error_response(status: StatusCode, message: &str, detail: Option<String>) -> Response {
    let mut body = json!({ "error": message });
    if let Some(detail) = detail {
        body["detail"] = json!(detail);
    }
    (status, Json(body)).into_response()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tempfile::tempdir;
    use tower::ServiceExt;
    use vidpipe_core::VidpipeConfig;
    use vidpipe_core::fetch::{
        MetadataProvider, MuxProcessor, StaticMetadataProvider, StreamDescriptor,
        UnavailableMuxer, VideoMetadata,
    };

    use super::*;
    use crate::server::{AppState, build_router};

    fn sample_metadata(is_live: bool) -> VideoMetadata {
        VideoMetadata {
            title: "Clip".to_string(),
            is_live,
            streams: vec![
                StreamDescriptor {
                    has_video: true,
                    has_audio: true,
                    height: Some(360),
                    container: "mp4".to_string(),
                    codecs: "avc1, mp4a".to_string(),
                    audio_bitrate: Some(96),
                    url: "https://cdn.example/muxed-360".to_string(),
                },
                StreamDescriptor {
                    has_video: true,
                    has_audio: true,
                    height: Some(720),
                    container: "mp4".to_string(),
                    codecs: "avc1, mp4a".to_string(),
                    audio_bitrate: Some(128),
                    url: "https://cdn.example/muxed-720".to_string(),
                },
            ],
        }
    }

    fn router_with(
        metadata: Arc<dyn MetadataProvider>,
        muxer: Arc<dyn MuxProcessor>,
        temp_dir: &std::path::Path,
    ) -> axum::Router {
        let mut config = VidpipeConfig::for_testing(temp_dir);
        // A tool binary that always fails, for routes that reach it.
        config.tool.ytdlp_path = "false".into();
        build_router(AppState::new(Arc::new(config), metadata, muxer))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(false))),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn download_without_url_is_bad_request() {
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(false))),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(Request::builder().uri("/download").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_with_malformed_url_is_bad_request() {
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(false))),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/download?url=not%20a%20url")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Invalid or missing video URL");
    }

    #[tokio::test]
    async fn live_content_is_bad_request() {
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(true))),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/download?url=https://example.com/watch%3Fv%3Dabc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Live streams are not supported");
    }

    #[tokio::test]
    async fn no_suitable_streams_maps_to_unsupported_media_type() {
        // Metadata has only pre-muxed streams, so the mux fallback has no
        // elementary pair to work with after the tool fails.
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(false))),
            Arc::new(FakeAvailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/download?url=https://example.com/video")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn missing_mux_capability_maps_to_bad_gateway() {
        let mut meta = sample_metadata(false);
        meta.streams = vec![
            StreamDescriptor {
                has_video: true,
                has_audio: false,
                height: Some(720),
                container: "mp4".to_string(),
                codecs: "avc1".to_string(),
                audio_bitrate: None,
                url: "https://cdn.example/v".to_string(),
            },
            StreamDescriptor {
                has_video: false,
                has_audio: true,
                height: None,
                container: "m4a".to_string(),
                codecs: "mp4a".to_string(),
                audio_bitrate: Some(128),
                url: "https://cdn.example/a".to_string(),
            },
        ];
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(meta)),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/download?url=https://example.com/video")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Audio merge unavailable");
    }

    #[tokio::test]
    async fn formats_lists_combined_heights() {
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(false))),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/formats?url=https://example.com/video")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["heights"], json!([360, 720]));
        assert_eq!(body["maxHeight"], json!(720));
    }

    #[tokio::test]
    async fn formats_without_url_is_bad_request() {
        let dir = tempdir().unwrap();
        let router = router_with(
            Arc::new(StaticMetadataProvider::with_metadata(sample_metadata(false))),
            Arc::new(UnavailableMuxer),
            dir.path(),
        );

        let response = router
            .oneshot(Request::builder().uri("/formats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn content_disposition_reduces_names_to_printable_ascii() {
        let ascii = content_disposition("Plain Clip.mp4");
        assert_eq!(ascii.to_str().unwrap(), "attachment; filename=\"Plain Clip.mp4\"");

        let mixed = content_disposition("Caf\u{00e9} Session.mp4");
        assert_eq!(mixed.to_str().unwrap(), "attachment; filename=\"Caf Session.mp4\"");

        let non_ascii = content_disposition("\u{0432}\u{0438}\u{0434}\u{0435}\u{043e}.mp4");
        assert_eq!(
            non_ascii.to_str().unwrap(),
            "attachment; filename=\"video.mp4\""
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "abc\u{00e9}def";
        let out = truncate(s, 4);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 7);
    }

    /// Muxer that reports available; never reached in these tests because
    /// pair selection fails first.
    struct FakeAvailableMuxer;

    #[async_trait::async_trait]
    impl MuxProcessor for FakeAvailableMuxer {
        fn is_available(&self) -> bool {
            true
        }

        async fn stream_mux(
            &self,
            _video: &StreamDescriptor,
            _audio: &StreamDescriptor,
        ) -> Result<vidpipe_core::fetch::MuxStream, vidpipe_core::fetch::MuxError> {
            unreachable!("pair selection must fail before muxing")
        }
    }
}
