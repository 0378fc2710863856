//! Error types for the mailet-common crate.

use thiserror::Error;

/// Errors produced while parsing or constructing a [`crate::MailAddress`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The input was empty (or only whitespace).
    #[error("Address is empty")]
    Empty,

    /// No `@` separator was found.
    #[error("Address is missing '@': {0}")]
    MissingAt(String),

    /// Nothing precedes the `@`.
    #[error("Address has an empty local part: {0}")]
    EmptyLocalPart(String),

    /// Nothing follows the `@`.
    #[error("Address has an empty domain: {0}")]
    EmptyDomain(String),

    /// The domain contains characters that cannot appear in a host name.
    #[error("Address has an invalid domain: {0}")]
    InvalidDomain(String),

    /// The local part contains control characters or unquoted whitespace.
    #[error("Address has an invalid local part: {0}")]
    InvalidLocalPart(String),
}
