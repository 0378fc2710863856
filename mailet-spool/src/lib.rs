pub mod backends;
pub mod config;
pub mod error;
pub mod spool;
pub mod r#trait;

pub use backends::{FileRepository, FileRepositoryBuilder, MemoryRepository, TestRepository};
pub use config::{MemoryConfig, RepositoryConfig};
pub use error::{CodecError, Result, SpoolError, ValidationError};
pub use r#trait::{Repository, transfer};
pub use spool::{Lease, Spool};
