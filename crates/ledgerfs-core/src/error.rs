//! Error types for the collaborator boundary

use thiserror::Error;

/// Errors returned by remote collaborators (blob storage, remote log)
#[derive(Debug, Error)]
pub enum CoreError {
    /// The remote could not be reached or timed out
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    /// The caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Requested blob or stream does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored data failed verification
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The remote refused the request (size limits, malformed input)
    #[error("Rejected: {0}")]
    Rejected(String),
}

impl CoreError {
    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Unavailable(_))
    }

    /// Whether the failure is an authorization failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, CoreError::Unauthorized(_))
    }
}

impl From<postcard::Error> for CoreError {
    fn from(err: postcard::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Result type for collaborator operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CoreError::Unavailable("timeout".into()).is_transient());
        assert!(!CoreError::Corrupt("hash".into()).is_transient());
        assert!(!CoreError::Unauthorized("denied".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::NotFound("blob abcd".into());
        assert!(err.to_string().contains("blob abcd"));
        assert!(CoreError::Unauthorized("x".into()).is_unauthorized());
    }
}
