//! Typed errors for pipeline construction and execution.
//!
//! - [`ConfigError`] is raised while building processors and is always fatal
//!   at startup
//! - [`MailetError`] is what a mailet reports for one mail, classified by
//!   [`FailureKind`]
//! - [`DispatchError`] covers failures of the dispatcher itself, never of a
//!   single mail's processing

use std::fmt;

use mailet_common::{AddressError, MailId};
use mailet_spool::SpoolError;
use thiserror::Error;

/// Configuration errors, detected when the pipeline is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown matcher: {0}")]
    UnknownMatcher(String),

    #[error("Unknown mailet: {0}")]
    UnknownMailet(String),

    #[error("Invalid condition {condition:?} for matcher {matcher}: {reason}")]
    InvalidCondition {
        matcher: String,
        condition: String,
        reason: String,
    },

    #[error("Invalid configuration for mailet {mailet}: {reason}")]
    InvalidMailetConfig { mailet: String, reason: String },

    #[error("Processor {referenced_by} refers to undefined processor {target}")]
    UndefinedProcessor {
        referenced_by: String,
        target: String,
    },

    #[error("Processor {0} is defined more than once")]
    DuplicateProcessor(String),

    #[error("Root processor {0} is not defined")]
    MissingRoot(String),

    #[error("Processor {0} cannot fall back to itself")]
    SelfFallback(String),

    #[error("Invalid address: {0}")]
    Address(#[from] AddressError),
}

/// How a mailet failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retried with backoff until the attempt ceiling is reached
    Transient,
    /// Dead-lettered immediately
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Failure reported by a mailet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failure: {message}")]
pub struct MailetError {
    pub kind: FailureKind,
    pub message: String,
}

impl MailetError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind, FailureKind::Transient)
    }
}

impl From<SpoolError> for MailetError {
    fn from(e: SpoolError) -> Self {
        if e.is_transient() {
            Self::transient(e.to_string())
        } else {
            Self::permanent(e.to_string())
        }
    }
}

/// Errors of the dispatcher itself
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The spool or error store could not be read or written
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),

    /// A requeue named a processor that does not exist
    #[error("Unknown processor {state} for mail {id}")]
    UnknownProcessor { id: MailId, state: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_spool_errors_keep_their_class() {
        let transient: MailetError = SpoolError::Unavailable("down".to_string()).into();
        assert!(transient.is_transient());

        let permanent: MailetError = SpoolError::NotFound(MailId::generate()).into();
        assert_eq!(permanent.kind, FailureKind::Permanent);
    }

    #[test]
    fn test_display() {
        let err = MailetError::transient("inbox busy");
        assert_eq!(err.to_string(), "transient failure: inbox busy");
    }
}
