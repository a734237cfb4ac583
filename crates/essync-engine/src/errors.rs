//! Pipeline error model.

use essync_client::ServiceError;

// ---------------------------------------------------------------------------
// PipelineError: categorised errors for the run as a whole
// ---------------------------------------------------------------------------

/// Categorized pipeline error.
///
/// Per-index failures never surface here: a failing read, write or
/// provisioning step degrades only its own index and is reported through
/// logs and counters. What remains is what stops a run before it starts.
#[derive(Debug)]
pub enum PipelineError {
    /// Invalid configuration, detected before any remote call.
    Config(String),
    /// A remote service error that prevents the run from starting.
    Service(ServiceError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Service(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Service(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

impl From<ServiceError> for PipelineError {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

impl PipelineError {
    /// Returns `true` for errors detected before any I/O.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
