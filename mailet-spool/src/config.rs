use std::sync::Arc;

use serde::Deserialize;

use crate::{
    ValidationError,
    backends::{FileRepository, MemoryRepository},
    r#trait::Repository,
};

/// Configuration for a repository
///
/// Selects the backing implementation at runtime.
///
/// # Examples
///
/// File-backed repository:
/// ```ron
/// spool: File((
///     path: "/var/spool/mailet/spool",
/// ))
/// ```
///
/// Memory-backed repository, optionally bounded:
/// ```ron
/// spool: Memory((
///     capacity: Some(1000),
/// ))
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum RepositoryConfig {
    /// Persistent, survives restart
    File(FileRepository),
    /// Volatile, for tests and transient inboxes
    Memory(MemoryConfig),
}

/// Configuration for a memory-backed repository
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of mails to hold (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::Memory(MemoryConfig::default())
    }
}

impl RepositoryConfig {
    /// The directory of a file-backed repository
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(repository) => Some(repository.path()),
            Self::Memory(_) => None,
        }
    }

    /// Whether this configuration survives a restart
    #[must_use]
    pub const fn is_persistent(&self) -> bool {
        matches!(self, Self::File(_))
    }

    /// Configuration for a repository nested under this one, named `name`.
    ///
    /// File repositories get a subdirectory, memory repositories an
    /// independent store with the same capacity. Used to derive per-user
    /// inboxes from a single configured root.
    ///
    /// # Errors
    /// If `name` is not a single, plain path segment.
    pub fn nested(&self, name: &str) -> Result<Self, ValidationError> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\', '\0'])
            || name.chars().any(char::is_control)
        {
            return Err(ValidationError::InvalidName(name.to_string()));
        }

        Ok(match self {
            Self::File(repository) => Self::File(
                FileRepository::builder()
                    .path(repository.path().join(name))
                    .build()?,
            ),
            Self::Memory(config) => Self::Memory(config.clone()),
        })
    }

    /// Create (and for files, initialise) the configured repository
    ///
    /// # Errors
    /// If a file repository's directory cannot be created or cleaned
    pub fn into_repository(self) -> crate::Result<Arc<dyn Repository>> {
        Ok(match self {
            Self::File(repository) => {
                repository.init()?;
                Arc::new(repository)
            }
            Self::Memory(config) => config.capacity.map_or_else(
                || Arc::new(MemoryRepository::new()) as Arc<dyn Repository>,
                |capacity| Arc::new(MemoryRepository::with_capacity(capacity)),
            ),
        })
    }
}
