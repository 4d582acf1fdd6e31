//! HTTP server wiring for Vidpipe.
//!
//! Builds the router, the CORS policy and the shared application state, and
//! selects the mux capability implementation once at startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, header};
use axum::routing::get;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vidpipe_core::VidpipeConfig;
use vidpipe_core::fetch::{
    FfmpegMuxer, HttpMetadataProvider, MetadataProvider, MuxProcessor, Orchestrator,
    UnavailableMuxer,
};

use crate::handlers::{download, formats, health};

/// Shared application state; one orchestrator serves all requests, each
/// request gets its own acquisition run on its own task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VidpipeConfig>,
    pub metadata: Arc<dyn MetadataProvider>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(
        config: Arc<VidpipeConfig>,
        metadata: Arc<dyn MetadataProvider>,
        muxer: Arc<dyn MuxProcessor>,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            metadata.clone(),
            muxer,
        ));
        Self {
            config,
            metadata,
            orchestrator,
        }
    }
}

/// Builds the application router with CORS, security headers and the static
/// frontend.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.http.cors_origins);
    let static_dir = state.config.http.static_dir.clone();

    Router::new()
        .route("/health", get(health))
        .route("/formats", get(formats))
        .route("/download", get(download))
        .fallback_service(ServeDir::new(static_dir))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the server until shutdown.
pub async fn run_server(
    config: VidpipeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Arc::new(config);

    let metadata: Arc<dyn MetadataProvider> = Arc::new(HttpMetadataProvider::new(
        config.fetch.metadata_endpoint.clone(),
        &config.fetch.user_agent,
    )?);

    // Transcode capability is probed exactly once; requests select behavior
    // through the trait object instead of probing at call time.
    let muxer: Arc<dyn MuxProcessor> = if FfmpegMuxer::detect(config.tool.ffmpeg_path.as_deref())
    {
        Arc::new(FfmpegMuxer::new(
            config.tool.ffmpeg_path.as_deref(),
            config.mux.clone(),
            config.fetch.user_agent.clone(),
        ))
    } else {
        warn!("ffmpeg not detected; direct mux fallback disabled");
        Arc::new(UnavailableMuxer)
    };

    let state = AppState::new(config.clone(), metadata, muxer);
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("vidpipe listening on http://{addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // Open CORS for dev, same default the frontend expects.
        CorsLayer::permissive()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
    }
}
