use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsersError {
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    #[error("No such user: {0}")]
    NotFound(String),

    #[error("Invalid user name: {0:?}")]
    InvalidName(String),

    #[error("Failed to hash credential: {0}")]
    Credential(String),

    #[error("Invalid users path {0}: must be absolute and contain no '..'")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode users table: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode users table: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub type Result<T> = std::result::Result<T, UsersError>;
