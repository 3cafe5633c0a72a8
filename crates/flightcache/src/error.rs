//! Error types for flightcache

use std::fmt;
use std::sync::Arc;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations
///
/// Errors clone cheaply so that every caller joined to a failed load
/// episode receives an equivalent failure.
#[derive(Debug, Clone)]
pub enum Error {
    /// The loader failed while computing a value; wraps the original cause.
    /// Failures are never cached: a later `get` retries the loader.
    Load(Arc<dyn std::error::Error + Send + Sync>),

    /// The owner of a load episode unwound without producing a value.
    /// All joined callers of that episode receive this error.
    LoadAborted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Load(cause) => write!(f, "load failed: {}", cause),
            Error::LoadAborted => write!(f, "load aborted before completion"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Load(cause) => Some(cause.as_ref()),
            Error::LoadAborted => None,
        }
    }
}

impl Error {
    /// Wrap a loader failure, preserving the original cause.
    pub(crate) fn load<E>(cause: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Load(Arc::from(cause.into()))
    }
}
