use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;

use crate::{FileUsersRepository, MemoryUsersRepository, UsersRepository};

/// Users repository configuration
///
/// ```ron
/// users: (
///     path: Some("/var/lib/mailet/users.bin"),
///     domains: ["local.test"],
/// )
/// ```
///
/// Without a `path` the table lives in memory only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsersConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Domains served locally
    #[serde(default)]
    pub domains: Vec<String>,
}

impl UsersConfig {
    /// Open the configured repository
    ///
    /// # Errors
    /// If a file-backed table cannot be opened
    pub async fn into_repository(self) -> crate::Result<Arc<dyn UsersRepository>> {
        Ok(match self.path {
            Some(path) => Arc::new(FileUsersRepository::open(path, self.domains).await?),
            None => Arc::new(MemoryUsersRepository::new(self.domains)),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_by_default() {
        let config: UsersConfig = ron::from_str(r#"(domains: ["local.test"])"#).unwrap();
        let users = config.into_repository().await.unwrap();

        assert_eq!(users.get_domains(), vec!["local.test"]);
        assert_eq!(users.count_users(), 0);
    }
}
