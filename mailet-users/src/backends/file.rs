use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mailet_common::internal;
use tokio::{fs, sync::Mutex};

use super::memory::MemoryUsersRepository;
use crate::{User, UserAttributes, UsersError, UsersRepository};

/// Users repository persisted as a single bincode file
///
/// The whole table is held in memory and rewritten (temporary file plus
/// rename) after every mutation. A mutation whose write fails is rolled back.
#[derive(Debug)]
pub struct FileUsersRepository {
    path: PathBuf,
    inner: MemoryUsersRepository,
    write: Mutex<()>,
}

impl FileUsersRepository {
    /// Open the table at `path`, starting empty if the file does not exist
    ///
    /// # Errors
    /// - If `path` is relative or contains `..`
    /// - If an existing file cannot be read or decoded
    pub async fn open(
        path: impl Into<PathBuf>,
        domains: impl IntoIterator<Item = impl Into<String>>,
    ) -> crate::Result<Self> {
        let path = path.into();
        validate_path(&path)?;

        let inner = MemoryUsersRepository::new(domains);

        match fs::read(&path).await {
            Ok(bytes) => {
                let (users, _): (Vec<User>, usize) =
                    bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
                internal!(
                    level = INFO,
                    "Loaded {} users from {}",
                    users.len(),
                    path.display()
                );
                for user in users {
                    inner.restore(user.name, user.attributes);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                internal!("No users table at {}, starting empty", path.display());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            inner,
            write: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> crate::Result<()> {
        let bytes =
            bincode::serde::encode_to_vec(self.inner.snapshot(), bincode::config::standard())?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &self.path).await?;

        Ok(())
    }
}

fn validate_path(path: &Path) -> crate::Result<()> {
    if !path.is_absolute()
        || path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
    {
        return Err(UsersError::InvalidPath(path.display().to_string()));
    }

    Ok(())
}

#[async_trait]
impl UsersRepository for FileUsersRepository {
    #[tracing::instrument(level = "debug", skip(self, attributes))]
    async fn add_user(&self, name: &str, attributes: UserAttributes) -> crate::Result<()> {
        let _guard = self.write.lock().await;
        let name = self.inner.insert(name, attributes)?;

        if let Err(e) = self.persist().await {
            let _ = self.inner.delete(&name);
            return Err(e);
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn remove_user(&self, name: &str) -> crate::Result<()> {
        let _guard = self.write.lock().await;
        let (name, attributes) = self.inner.delete(name)?;

        if let Err(e) = self.persist().await {
            self.inner.restore(name, attributes);
            return Err(e);
        }

        Ok(())
    }

    fn get_attributes(&self, name: &str) -> crate::Result<UserAttributes> {
        self.inner.get_attributes(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    fn count_users(&self) -> usize {
        self.inner.count_users()
    }

    fn get_domains(&self) -> Vec<String> {
        self.inner.get_domains()
    }
}
