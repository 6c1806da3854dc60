//! Synchronization error types.

use thiserror::Error;

use kestrel_api::ApiError;

/// Errors surfaced by the session state store.
///
/// Transport-level failures (socket drops, malformed frames) never appear
/// here — the connection manager recovers from those locally.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An operation that requires a selected session was called without one.
    #[error("no active session")]
    NoActiveSession,

    /// A backend command failed. Optimistic state already applied is kept.
    #[error(transparent)]
    Command(#[from] ApiError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_passes_detail_through() {
        let err = SyncError::Command(ApiError::Status {
            status: 404,
            detail: "Session not found".into(),
        });
        assert_eq!(err.to_string(), "Session not found");
    }

    #[test]
    fn no_active_session_display() {
        assert_eq!(SyncError::NoActiveSession.to_string(), "no active session");
    }
}
