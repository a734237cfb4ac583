//! Index service error types.

/// Errors produced by [`IndexService`](crate::IndexService) operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request or its response body did not complete (connect, timeout,
    /// TLS, connection dropped mid-body).
    #[error("{operation}: transport error: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("{operation}: HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("{operation}: malformed response: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },

    /// The client could not be built from its endpoint settings.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub(crate) fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            operation,
            message: message.into(),
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Transport failures, throttling (`429`) and server-side errors (`5xx`)
    /// are transient. Client errors such as an expired scroll context (`404`)
    /// or a malformed response are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed { .. } | Self::Config(_) => false,
        }
    }

    /// HTTP status, when the service produced one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(429, true)]
    #[case(500, true)]
    #[case(503, true)]
    #[case(400, false)]
    #[case(404, false)]
    fn status_transience(#[case] status: u16, #[case] transient: bool) {
        let err = ServiceError::Status {
            operation: "search",
            status,
            body: String::new(),
        };
        assert_eq!(err.is_transient(), transient);
        assert_eq!(err.status(), Some(status));
    }

    #[test]
    fn malformed_is_not_transient() {
        let err = ServiceError::malformed("count", "missing 'count'");
        assert!(!err.is_transient());
        assert!(err.status().is_none());
    }

    #[test]
    fn status_display_carries_operation_and_body() {
        let err = ServiceError::Status {
            operation: "bulk_create",
            status: 413,
            body: "request entity too large".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bulk_create"), "got: {msg}");
        assert!(msg.contains("413"), "got: {msg}");
        assert!(msg.contains("too large"), "got: {msg}");
    }
}
