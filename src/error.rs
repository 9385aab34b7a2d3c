//! Crate-wide error types.
//!
//! Leaf errors are modeled with `thiserror` per subsystem and composed into
//! [`GrepwiseError`], which carries the error *kind* from the design rather
//! than a Java-style exception hierarchy. Call sites that don't need a typed
//! error (CLI plumbing, orchestration glue) use `anyhow::Result` instead.

use thiserror::Error;

/// The kind of failure, independent of which subsystem raised it.
///
/// Mirrors the error-kind table: validation/not-found/conflict are
/// surfaced synchronously to callers, transient I/O is retried with bounded
/// backoff where idempotent, parse failures are never fatal, and internal
/// errors are never swallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Forbidden,
    TransientIo,
    ParseFailure,
    Timeout,
    Internal,
}

#[derive(Debug, Error)]
pub enum GrepwiseError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl GrepwiseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GrepwiseError::Validation(_) => ErrorKind::Validation,
            GrepwiseError::NotFound(_) => ErrorKind::NotFound,
            GrepwiseError::Conflict(_) => ErrorKind::Conflict,
            GrepwiseError::Unauthorized => ErrorKind::Unauthorized,
            GrepwiseError::Forbidden => ErrorKind::Forbidden,
            GrepwiseError::TransientIo(_) => ErrorKind::TransientIo,
            GrepwiseError::ParseFailure(_) => ErrorKind::ParseFailure,
            GrepwiseError::Timeout(_) => ErrorKind::Timeout,
            GrepwiseError::Internal(_) => ErrorKind::Internal,
            GrepwiseError::Io(_) => ErrorKind::TransientIo,
            GrepwiseError::Config(_) => ErrorKind::Validation,
        }
    }

    /// HTTP status code for the ingestion surface's error body.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Conflict => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Timeout => 504,
            ErrorKind::TransientIo | ErrorKind::ParseFailure | ErrorKind::Internal => 500,
        }
    }

    /// Machine-readable error code used in the `{error, message}` body.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, GrepwiseError>;
