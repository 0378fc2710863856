//! Repository implementations
//!
//! - `memory`: volatile storage for tests and transient inboxes
//! - `test`: memory storage with synchronisation and fault injection
//! - `file`: persistent storage for the spool and error store

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileRepository, FileRepositoryBuilder};
pub use memory::MemoryRepository;
pub use test::TestRepository;
