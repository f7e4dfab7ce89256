//! Error kinds produced by the filesystem core.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by [`crate::Filesystem`] and its collaborators.
///
/// Mirrors the abstract error kinds of the design (spec §7): each variant
/// maps to exactly one failure condition documented on the operation that
/// can raise it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// No such file or directory.
    #[error("no such file or directory: '{0}'")]
    NotFound(String),

    /// The target of a creating operation already exists.
    #[error("already exists: '{0}'")]
    AlreadyExists(String),

    /// The caller specified a directory where a file was required.
    #[error("is a directory: '{0}'")]
    IsADirectory(String),

    /// The caller specified a file where a directory was required.
    #[error("not a directory: '{0}'")]
    NotADirectory(String),

    /// Malformed or disallowed argument (root rename, negative cursor, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `open` was called with a mode string that is not one of the five
    /// supported binary modes.
    #[error("invalid open mode: '{0}'")]
    InvalidMode(String),

    /// The operation is not supported in the current configuration, e.g. a
    /// non-tail write on a file whose storage forbids promotion, or a
    /// `SEEK_END` with a positive offset.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A lock acquisition exceeded its timeout, or a structural operation
    /// found a locked descendant.
    #[error("operation would block: {0}")]
    Blocking(String),

    /// Resource (quota) hard limit exceeded.
    #[error("quota exceeded: requested {requested} bytes, {available} available")]
    QuotaExceeded {
        requested: u64,
        available: u64,
    },

    /// Node-count hard limit exceeded. Conceptually a subtype of
    /// [`Error::QuotaExceeded`] (spec §7) but kept as a distinct variant so
    /// callers can match on it without inspecting byte counts.
    #[error("node limit exceeded: {current} nodes in use, limit is {limit}")]
    NodeLimitExceeded {
        current: usize,
        limit: usize,
    },

    /// Path normalization rejected an escape above the root. Exposed to
    /// callers as [`Error::InvalidArgument`] except for the boolean query
    /// operations, which coerce it to `false` instead of propagating it.
    #[error("path traversal attempt detected: '{0}'")]
    PathTraversal(String),
}

impl Error {
    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound(path.into())
    }

    pub(crate) fn exists(path: impl Into<String>) -> Self {
        Error::AlreadyExists(path.into())
    }
}
