use std::sync::Arc;

use async_trait::async_trait;
use mailet_common::{Mail, MailId};

/// Durable keyed storage of [`Mail`] records and their content.
///
/// Every operation is atomic for its key. Implementations back the spool,
/// the error store and the per-user inboxes.
#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    /// Store a mail and its content, replacing any previous record with the
    /// same id.
    async fn store(&self, mail: &Mail, content: Arc<[u8]>) -> crate::Result<()>;

    /// Replace the record of an existing mail, leaving its content untouched.
    ///
    /// # Errors
    /// [`crate::SpoolError::NotFound`] if the mail is not in this repository.
    async fn update(&self, mail: &Mail) -> crate::Result<()>;

    /// Read a mail record
    async fn retrieve(&self, id: &MailId) -> crate::Result<Mail>;

    /// Read the content of a mail
    async fn content(&self, id: &MailId) -> crate::Result<Arc<[u8]>>;

    /// Remove a mail and its content
    async fn remove(&self, id: &MailId) -> crate::Result<()>;

    /// List all mails, oldest first
    async fn list(&self) -> crate::Result<Vec<MailId>>;

    /// Number of mails currently held
    async fn len(&self) -> crate::Result<usize> {
        Ok(self.list().await?.len())
    }

    async fn is_empty(&self) -> crate::Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Move `mail` and its content from one repository to another.
///
/// The destination is written before the source is cleared, so a crash in
/// between leaves a duplicate rather than losing the mail. `mail` is stored
/// as given, which lets the caller record its final state in the same step.
///
/// # Errors
/// If the content cannot be read from `from`, or either write fails.
pub async fn transfer(
    from: &dyn Repository,
    to: &dyn Repository,
    mail: &Mail,
) -> crate::Result<()> {
    let content = from.content(&mail.id()).await?;
    to.store(mail, content).await?;
    from.remove(&mail.id()).await
}
