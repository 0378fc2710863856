pub mod backends;
pub mod config;
pub mod credential;
pub mod error;
pub mod r#trait;
pub mod user;

pub use backends::{FileUsersRepository, MemoryUsersRepository};
pub use config::UsersConfig;
pub use credential::Credential;
pub use error::{Result, UsersError};
pub use r#trait::UsersRepository;
pub use user::{User, UserAttributes, normalize_name};
