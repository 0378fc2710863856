pub mod file;
pub mod memory;

pub use file::FileUsersRepository;
pub use memory::MemoryUsersRepository;
