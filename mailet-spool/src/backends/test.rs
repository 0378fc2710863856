use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mailet_common::{Mail, MailId};
use tokio::sync::Notify;

use super::memory::MemoryRepository;
use crate::{SpoolError, r#trait::Repository};

/// Testing utilities for a memory-backed repository
///
/// Adds a way to wait for stores and removals instead of sleeping, and a
/// switch that makes every operation fail as if storage were down.
#[derive(Debug, Clone, Default)]
pub struct TestRepository {
    inner: MemoryRepository,
    notify: Arc<Notify>,
    unavailable: Arc<AtomicBool>,
}

impl TestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with [`SpoolError::Unavailable`]
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> crate::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(SpoolError::Unavailable("test repository switched off".to_string()))
        } else {
            Ok(())
        }
    }

    /// Wait until the repository holds exactly `expected` mails
    ///
    /// # Errors
    /// Returns an error if the timeout is reached first
    pub async fn wait_for_count(&self, expected: usize, timeout: Duration) -> crate::Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.inner.count() == expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|e| SpoolError::Internal(format!("Timeout waiting for mails: {e}")))
    }

    /// Remove everything from the repository
    pub fn clear(&self) {
        self.inner.clear();
        self.notify.notify_waiters();
    }

    /// Number of mails currently held
    pub fn mail_count(&self) -> usize {
        self.inner.count()
    }

    /// All mails, oldest first (for test assertions)
    ///
    /// # Errors
    /// If the underlying store cannot be read
    pub async fn mails(&self) -> crate::Result<Vec<Mail>> {
        let mut mails = Vec::new();
        for id in self.inner.list().await? {
            mails.push(self.inner.retrieve(&id).await?);
        }
        Ok(mails)
    }
}

#[async_trait]
impl Repository for TestRepository {
    async fn store(&self, mail: &Mail, content: Arc<[u8]>) -> crate::Result<()> {
        self.check()?;
        self.inner.store(mail, content).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn update(&self, mail: &Mail) -> crate::Result<()> {
        self.check()?;
        self.inner.update(mail).await
    }

    async fn retrieve(&self, id: &MailId) -> crate::Result<Mail> {
        self.check()?;
        self.inner.retrieve(id).await
    }

    async fn content(&self, id: &MailId) -> crate::Result<Arc<[u8]>> {
        self.check()?;
        self.inner.content(id).await
    }

    async fn remove(&self, id: &MailId) -> crate::Result<()> {
        self.check()?;
        self.inner.remove(id).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<MailId>> {
        self.check()?;
        self.inner.list().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mailet_common::MailAddress;

    use super::*;

    #[tokio::test]
    async fn test_unavailable_switch() {
        let repository = TestRepository::new();
        let rcpt: MailAddress = "alice@local.test".parse().unwrap();
        let mail = Mail::new(None, [rcpt], "root", 0);

        repository.set_unavailable(true);
        assert!(matches!(
            repository.store(&mail, Arc::from(Vec::new())).await,
            Err(SpoolError::Unavailable(_))
        ));

        repository.set_unavailable(false);
        repository.store(&mail, Arc::from(Vec::new())).await.unwrap();
        assert_eq!(repository.mail_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_count() {
        let repository = TestRepository::new();
        let writer = repository.clone();

        let handle = tokio::spawn(async move {
            let rcpt: MailAddress = "alice@local.test".parse().unwrap();
            let mail = Mail::new(None, [rcpt], "root", 0);
            writer.store(&mail, Arc::from(Vec::new())).await
        });

        repository
            .wait_for_count(1, Duration::from_secs(5))
            .await
            .expect("mail should arrive");
        handle.await.unwrap().unwrap();
    }
}
