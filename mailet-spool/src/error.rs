//! Failures a repository can report.
//!
//! [`SpoolError::is_transient`] is what the dispatcher consults to decide
//! between retrying and dead-lettering.

use std::io;

use mailet_common::MailId;
use thiserror::Error;

/// Anything a [`Repository`](crate::Repository) operation can fail with
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A stored mail could not be encoded or decoded
    #[error("Mail encoding failed: {0}")]
    Serialization(#[from] CodecError),

    #[error("No mail with id {0}")]
    NotFound(MailId),

    #[error("Invalid repository location: {0}")]
    Validation(#[from] ValidationError),

    /// Poisoned lock or a similar broken invariant
    #[error("Repository state corrupted: {0}")]
    Internal(String),

    /// The repository refused a new mail because it is full.
    #[error("Repository capacity exceeded: {len}/{capacity} mails")]
    CapacityExceeded { len: usize, capacity: usize },

    /// The backing storage is temporarily unavailable.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// The caller's lease on a mail was taken over after it expired.
    #[error("Lease lost for mail {0}")]
    LeaseLost(MailId),
}

impl SpoolError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Internal(_) | Self::CapacityExceeded { .. } | Self::Unavailable(_)
        )
    }
}

/// Bincode failures on stored mail and content
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Why a configured path or derived name cannot back a repository
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{0} exists and is not a directory")]
    NotDirectory(String),

    #[error("{0} is relative, repository paths must be absolute")]
    NotAbsolute(String),

    #[error("{0} contains a '..' component")]
    ParentDir(String),

    /// The path lies under `/etc`, `/proc` and the like
    #[error("{path} lies under the system directory {prefix}")]
    SystemDirectory { prefix: String, path: String },

    /// A name used to derive a nested repository is not a plain path segment.
    #[error("Invalid repository name: {0}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("poisoned lock: {e}"))
    }
}

impl From<bincode::error::EncodeError> for SpoolError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(CodecError::Encode(e))
    }
}

impl From<bincode::error::DecodeError> for SpoolError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(CodecError::Decode(e))
    }
}
