//! Vidpipe Web - HTTP API server
//!
//! Thin web surface over the acquisition pipeline: request parsing, CORS,
//! security headers, static frontend, and the mapping from the pipeline's
//! failure taxonomy to HTTP status codes. All real engineering lives in
//! `vidpipe-core`.

pub mod handlers;
pub mod server;

pub use server::{AppState, build_router, run_server};
