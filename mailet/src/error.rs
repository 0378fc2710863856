use mailet_common::AddressError;
use mailet_pipeline::ConfigError;
use mailet_spool::SpoolError;
use mailet_users::UsersError;
use thiserror::Error;

/// Why a submission was refused
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The content could not be read, was empty or too large, or the mail
    /// had no recipients
    #[error("Content validation failed: {0}")]
    ContentValidation(String),

    /// The content was fine but the spool could not store it
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),
}

/// Errors building a server from its configuration. All of them are fatal.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Invalid postmaster address: {0}")]
    Postmaster(#[from] AddressError),

    #[error("Invalid pipeline configuration: {0}")]
    Pipeline(#[from] ConfigError),

    #[error("Failed to open repository: {0}")]
    Repository(#[from] SpoolError),

    #[error("Failed to open users repository: {0}")]
    Users(#[from] UsersError),
}
