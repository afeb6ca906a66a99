//! Error taxonomy for the incremental update subsystem.
//!
//! Every failure carries enough context (usually the document path) for an
//! operator to fix the source content and re-run. Nothing here retries:
//! hashing, diffing and chunking are deterministic, so a second attempt
//! cannot succeed where the first failed.

use thiserror::Error;

/// Errors produced by `skillpack-core`.
#[derive(Error, Debug)]
pub enum Error {
    /// Document content could not be read (missing file, permission, invalid UTF-8).
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid chunking or versioning parameters. Raised before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A change set references a path the document set does not contain.
    #[error("change set out of sync with documents at '{path}': {reason}")]
    Invariant { path: String, reason: String },

    /// A manifest could not be decoded or is internally inconsistent.
    #[error("invalid manifest: {0}")]
    Manifest(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invariant(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Invariant {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The document path this error is about, when there is one.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::Io { path, .. } | Error::Invariant { path, .. } => Some(path),
            Error::Config(_) | Error::Manifest(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
