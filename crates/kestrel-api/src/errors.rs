//! REST client error types.

use thiserror::Error;

/// Errors produced by [`crate::ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never completed, or the response body could not be read
    /// or decoded.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status. `detail` is the backend's
    /// `{"detail": ...}` message when present, otherwise the raw body.
    #[error("{detail}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Backend-provided error message.
        detail: String,
    },
}

impl ApiError {
    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_displays_detail_only() {
        let err = ApiError::Status {
            status: 404,
            detail: "Session not found".into(),
        };
        assert_eq!(err.to_string(), "Session not found");
        assert_eq!(err.status(), Some(404));
    }
}
