//! Vidpipe Core - resilient video acquisition pipeline
//!
//! This crate provides the building blocks for turning a remote video URL
//! into a single progressively playable MP4: quality negotiation, temp
//! artifact management, external tool supervision, the direct stream-mux
//! fallback, and the orchestrator that sequences those strategies.

pub mod config;
pub mod fetch;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::VidpipeConfig;
pub use fetch::{Acquired, FetchError, Orchestrator, Quality};

/// Core errors that can bubble up from any Vidpipe subsystem.
#[derive(Debug, thiserror::Error)]
pub enum VidpipeError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VidpipeError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            VidpipeError::Fetch(e) => e.user_message(),
            VidpipeError::Configuration { .. } => "Configuration error occurred".to_string(),
            VidpipeError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(self, VidpipeError::Fetch(e) if e.is_client_error())
    }
}

pub type Result<T> = std::result::Result<T, VidpipeError>;
