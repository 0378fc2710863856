use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use mailet_common::{Mail, MailId, internal};
use serde::Deserialize;
use tokio::fs;

use crate::{SpoolError, ValidationError, r#trait::Repository};

/// File-based repository
///
/// Every mail is stored as two files named after its ULID:
/// - `{id}.eml` holds the raw content
/// - `{id}.bin` holds the [`Mail`] record, bincode encoded
///
/// # Atomicity
/// Writes go to `.tmp_`-prefixed files that are renamed into place, content
/// first. A record file therefore never exists without its content, and a
/// crash mid-write leaves only temporary files that `init` removes.
///
/// Deletes rename both files to a `.deleted` suffix before unlinking them, so
/// `list` never sees a half-deleted mail.
#[derive(Debug, Clone)]
pub struct FileRepository {
    path: PathBuf,
}

impl Default for FileRepository {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/mailet"),
        }
    }
}

impl<'de> Deserialize<'de> for FileRepository {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileRepositoryHelper {
            path: PathBuf,
        }

        let helper = FileRepositoryHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

impl FileRepository {
    /// Validate a repository path
    ///
    /// Rejects relative paths, paths containing `..`, and paths inside system
    /// directories.
    ///
    /// # Errors
    /// Returns the first rule the path violates
    pub fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::ParentDir(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: (*prefix).to_string(),
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Create a new `FileRepository` builder
    #[must_use]
    pub fn builder() -> FileRepositoryBuilder {
        FileRepositoryBuilder::default()
    }

    /// The directory holding this repository
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialise the repository directory
    ///
    /// Creates the directory if needed, and removes leftovers of interrupted
    /// writes (`.tmp_*`) and deletes (`*.deleted`).
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising repository at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        self.cleanup_orphans()
    }

    fn cleanup_orphans(&self) -> crate::Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".deleted") || filename.starts_with(".tmp_") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from {}",
                self.path.display()
            );
        }

        Ok(())
    }

    fn data_path(&self, id: &MailId) -> PathBuf {
        self.path.join(format!("{id}.eml"))
    }

    fn meta_path(&self, id: &MailId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    async fn write_record(&self, mail: &Mail) -> crate::Result<()> {
        let meta_path = self.meta_path(&mail.id());
        let temp_meta_path = self.path.join(format!(".tmp_{}.bin", mail.id()));

        let metadata = bincode::serde::encode_to_vec(mail, bincode_config())?;
        fs::write(&temp_meta_path, &metadata).await?;
        fs::rename(&temp_meta_path, &meta_path).await?;

        Ok(())
    }
}

fn not_found(id: MailId) -> impl FnOnce(std::io::Error) -> SpoolError {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            SpoolError::NotFound(id)
        } else {
            SpoolError::Io(e)
        }
    }
}

#[async_trait]
impl Repository for FileRepository {
    #[tracing::instrument(level = "debug", skip(self, mail, content), fields(mail_id = %mail.id()))]
    async fn store(&self, mail: &Mail, content: Arc<[u8]>) -> crate::Result<()> {
        let id = mail.id();
        let temp_data_path = self.path.join(format!(".tmp_{id}.eml"));

        fs::write(&temp_data_path, content.as_ref()).await?;
        fs::rename(&temp_data_path, self.data_path(&id)).await?;
        self.write_record(mail).await?;

        internal!(level = DEBUG, "Stored mail {id} in {}", self.path.display());

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, mail), fields(mail_id = %mail.id()))]
    async fn update(&self, mail: &Mail) -> crate::Result<()> {
        if !fs::try_exists(self.meta_path(&mail.id())).await? {
            return Err(SpoolError::NotFound(mail.id()));
        }

        self.write_record(mail).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(mail_id = %id))]
    async fn retrieve(&self, id: &MailId) -> crate::Result<Mail> {
        let meta = fs::read(self.meta_path(id)).await.map_err(not_found(*id))?;
        let (mail, _): (Mail, usize) = bincode::serde::decode_from_slice(&meta, bincode_config())?;

        Ok(mail)
    }

    async fn content(&self, id: &MailId) -> crate::Result<Arc<[u8]>> {
        let data = fs::read(self.data_path(id)).await.map_err(not_found(*id))?;
        Ok(Arc::from(data))
    }

    #[tracing::instrument(level = "debug", skip(self), fields(mail_id = %id))]
    async fn remove(&self, id: &MailId) -> crate::Result<()> {
        let meta_path = self.meta_path(id);
        let data_path = self.data_path(id);
        let deleted_meta_path = self.path.join(format!("{id}.bin.deleted"));
        let deleted_data_path = self.path.join(format!("{id}.eml.deleted"));

        // The record goes first so `list` stops reporting the mail immediately
        fs::rename(&meta_path, &deleted_meta_path)
            .await
            .map_err(not_found(*id))?;
        fs::rename(&data_path, &deleted_data_path).await?;

        fs::remove_file(&deleted_meta_path).await?;
        fs::remove_file(&deleted_data_path).await?;

        internal!(level = DEBUG, "Removed mail {id} from {}", self.path.display());

        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<MailId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".bin")
                && !filename.starts_with(".tmp_")
                && let Some(id) = MailId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort_unstable();

        Ok(ids)
    }
}

/// Builder for `FileRepository`
#[derive(Debug, Default)]
pub struct FileRepositoryBuilder {
    path: PathBuf,
}

impl FileRepositoryBuilder {
    /// Set the repository directory
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the final `FileRepository`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> Result<FileRepository, ValidationError> {
        FileRepository::validate_path(&self.path)?;
        Ok(FileRepository { path: self.path })
    }
}
