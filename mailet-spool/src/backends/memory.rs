use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use mailet_common::{Mail, MailId};

use crate::{SpoolError, r#trait::Repository};

type Entry = (Mail, Arc<[u8]>);

/// In-memory repository
///
/// Mails are kept in a `HashMap` behind an `RwLock`. Nothing survives a
/// restart, so this is meant for tests and for inboxes that are drained by
/// something else.
///
/// An optional capacity bounds the number of mails held; storing a new mail
/// beyond it fails with [`SpoolError::CapacityExceeded`]. Replacing an
/// existing mail never counts against the limit.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    pub(crate) mails: Arc<RwLock<HashMap<MailId, Entry>>>,
    capacity: Option<usize>,
}

impl MemoryRepository {
    /// Create a new empty repository with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new repository holding at most `capacity` mails
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mails: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of mails currently held
    ///
    /// Recovers gracefully if the lock is poisoned.
    #[must_use]
    pub fn count(&self) -> usize {
        self.mails
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// The configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub(crate) fn clear(&self) {
        self.mails
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn store(&self, mail: &Mail, content: Arc<[u8]>) -> crate::Result<()> {
        let mut mails = self.mails.write()?;

        if let Some(capacity) = self.capacity
            && !mails.contains_key(&mail.id())
            && mails.len() >= capacity
        {
            return Err(SpoolError::CapacityExceeded {
                len: mails.len(),
                capacity,
            });
        }

        mails.insert(mail.id(), (mail.clone(), content));
        Ok(())
    }

    async fn update(&self, mail: &Mail) -> crate::Result<()> {
        let mut mails = self.mails.write()?;
        let entry = mails
            .get_mut(&mail.id())
            .ok_or_else(|| SpoolError::NotFound(mail.id()))?;
        entry.0 = mail.clone();
        Ok(())
    }

    async fn retrieve(&self, id: &MailId) -> crate::Result<Mail> {
        self.mails
            .read()?
            .get(id)
            .map(|(mail, _)| mail.clone())
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn content(&self, id: &MailId) -> crate::Result<Arc<[u8]>> {
        self.mails
            .read()?
            .get(id)
            .map(|(_, content)| Arc::clone(content))
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn remove(&self, id: &MailId) -> crate::Result<()> {
        self.mails
            .write()?
            .remove(id)
            .ok_or(SpoolError::NotFound(*id))?;
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<MailId>> {
        let mut ids: Vec<_> = self.mails.read()?.keys().copied().collect();

        // ULIDs sort by creation time
        ids.sort_unstable();

        Ok(ids)
    }

    async fn len(&self) -> crate::Result<usize> {
        Ok(self.mails.read()?.len())
    }
}
