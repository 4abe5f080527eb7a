//! Error types for Moorage
//!
//! This module defines the common error type surfaced by every layer of
//! the gateway core. Errors are structured return values; each layer
//! either tolerates a variant (cache misses, stats updates) or
//! propagates it unchanged.

use thiserror::Error;

/// Common result type for Moorage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Moorage
#[derive(Debug, Error)]
pub enum Error {
    /// The named entity (bucket, object, upload, user, index key) is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Create attempted on an extant entity
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A conditional GET/PUT check failed
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed tag, illegal marker, too-small part, mismatched etag, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bucket delete attempted while the bucket still contains objects
    #[error("bucket not empty: {0}")]
    NotEmpty(String),

    /// Optimistic version check on a record update mismatched
    #[error("version conflict: {0}")]
    VersionConflict(String),

    /// Operation not permitted on the addressed entity (e.g. a delete marker)
    #[error("not allowed: {0}")]
    NotAllowed(String),

    /// The operation is recognised but unsupported by this deployment
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A persisted record could not be decoded or is from a newer writer
    #[error("decode error: {0}")]
    Decode(String),

    /// Lower-layer service failure, surfaced unchanged
    #[error("transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an already-exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Check if this is a not-found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is an already-exists error
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// Get the HTTP status code the front-end maps this error to
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidArgument(_) | Self::Decode(_) => 400,
            Self::NotFound(_) => 404,
            Self::NotAllowed(_) => 405,
            Self::AlreadyExists(_) | Self::NotEmpty(_) | Self::VersionConflict(_) => 409,
            Self::PreconditionFailed(_) => 412,
            Self::Transport(_) => 500,
            Self::NotImplemented(_) => 501,
        }
    }

    /// Get the S3 error code the front-end renders for this error
    #[must_use]
    pub const fn s3_error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NoSuchKey",
            Self::AlreadyExists(_) => "BucketAlreadyExists",
            Self::PreconditionFailed(_) => "PreconditionFailed",
            Self::InvalidArgument(_) | Self::Decode(_) => "InvalidArgument",
            Self::NotEmpty(_) => "BucketNotEmpty",
            Self::VersionConflict(_) => "OperationAborted",
            Self::NotAllowed(_) => "MethodNotAllowed",
            Self::NotImplemented(_) => "NotImplemented",
            Self::Transport(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::not_found("bucket b").is_not_found());
        assert!(!Error::already_exists("bucket b").is_not_found());
    }

    #[test]
    fn test_error_http_status() {
        assert_eq!(Error::not_found("k").http_status_code(), 404);
        assert_eq!(Error::NotEmpty("b".into()).http_status_code(), 409);
        assert_eq!(Error::transport("rpc").http_status_code(), 500);
    }

    #[test]
    fn test_error_s3_code() {
        assert_eq!(Error::NotAllowed("dm".into()).s3_error_code(), "MethodNotAllowed");
        assert_eq!(Error::NotImplemented("copy".into()).s3_error_code(), "NotImplemented");
    }
}
