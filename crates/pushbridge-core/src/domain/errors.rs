//! Errors - error types and their operational classification.

/// How an error should be handled by the caller.
///
/// - Transient: the same call may succeed later (retry with backoff).
/// - Permanent: retrying the same call cannot help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// The decoded payload cannot be turned into an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestBuildError {
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Worker configuration that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("`{0}` must not be empty")]
    Empty(&'static str),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("{class} backoff: min ({min:?}) is greater than max ({max:?})")]
    BackoffRange {
        class: &'static str,
        min: std::time::Duration,
        max: std::time::Duration,
    },
}
