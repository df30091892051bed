//! Error types for the slide rendering pipeline

use thiserror::Error;

use crate::surface::SurfacePhase;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning images or rendering slides.
///
/// The type is `Clone` because a single failed upstream fetch is shared by
/// every caller that was waiting on the same in-flight request.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A placeholder's image could not be obtained (endpoint failed or
    /// returned no payload)
    #[error("Image unavailable: {0}")]
    ImageUnavailable(String),

    /// The upstream image service is unreachable or answered with an error
    #[error("Image backend unavailable: {0}")]
    CacheBackendUnavailable(String),

    /// Malformed image request (missing prompt, bad dimensions)
    #[error("Invalid image request: {0}")]
    InvalidRequest(String),

    /// Capture attempted before the surface settled
    #[error("Render surface not settled (generation {generation}, phase {phase:?})")]
    SurfaceNotReady { generation: u64, phase: SurfacePhase },

    /// A named capture engine failed
    #[error("Capture engine '{engine}' failed: {reason}")]
    CaptureEngineFailure { engine: &'static str, reason: String },

    /// Failed to render content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl Error {
    pub(crate) fn engine(engine: &'static str, reason: impl Into<String>) -> Self {
        Error::CaptureEngineFailure {
            engine,
            reason: reason.into(),
        }
    }
}
