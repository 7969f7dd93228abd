//! Crate-wide error type.
//!
//! The engine surfaces a closed set of failure kinds. Everything that can
//! go wrong maps onto one of these variants; callers match on the variant,
//! never on message text.
//!
//! `Error` is `Clone` on purpose: a background flush or compaction failure
//! is recorded once and then re-returned by every subsequent write until
//! the database is reopened.

use thiserror::Error;

/// Errors returned by database operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// The requested entity does not exist (missing `CURRENT` file,
    /// missing table file). Also used internally to signal a tombstone
    /// match during reads.
    #[error("not found: {0}")]
    NotFound(String),

    /// On-disk structure violates an invariant: bad checksum, bad record
    /// framing, unknown manifest tag, footer magic mismatch, a file the
    /// manifest references that is gone.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A feature-gated path was hit (e.g. a compression codec this build
    /// does not carry).
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Caller misuse: comparator mismatch, opening a missing database
    /// without `create_if_missing`, database already exists with
    /// `error_if_exists`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying filesystem returned an error. Also reported when an
    /// operation is cut short by shutdown.
    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Shorthand constructor for [`Error::Corruption`].
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Returns true if this error is a corruption report.
    #[inline]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// Returns true if this error is a not-found report.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(err.to_string())
        } else {
            Error::Io(err.to_string())
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
