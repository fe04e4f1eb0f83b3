//! Mimir error types

/// Mimir error types.
///
/// Cache-layer failures never surface through this type: the coordinator
/// resolves them to "absent" and records them for diagnostics. What is left
/// is session lookup, persistence plumbing and configuration.
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    /// Unknown session id. The caller should start a new session.
    #[error("session not found: {0} (create a new session)")]
    SessionNotFound(String),

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MimirError {
    /// Whether this error is meant to be shown to the end user.
    ///
    /// Only an unknown session qualifies; everything else is an operator
    /// concern and degrades silently at the conversation layer.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, MimirError::SessionNotFound(_))
    }
}

/// Result type alias for Mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_session_is_user_facing() {
        assert!(MimirError::SessionNotFound("s1".into()).is_user_facing());
        assert!(!MimirError::Http("connection reset".into()).is_user_facing());
        assert!(!MimirError::Configuration("no registry path".into()).is_user_facing());
        let io = std::io::Error::other("disk full");
        assert!(!MimirError::from(io).is_user_facing());
    }
}
