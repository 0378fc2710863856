//! The spool: a repository used as a work queue.
//!
//! Workers [`Spool::dequeue`] a mail together with a [`Lease`] granting them
//! exclusive processing rights, and hand the lease back through exactly one
//! of [`Spool::commit`], [`Spool::complete`], [`Spool::dead_letter`] or
//! [`Spool::release`].
//!
//! Leases live in memory only. They expire after the configured timeout so a
//! stalled worker cannot hold a mail forever, and after a restart every
//! spooled mail is eligible again. Each lease carries a fencing token: once
//! an expired lease has been taken over, writes under the old token fail
//! with [`SpoolError::LeaseLost`].
//!
//! The spool remembers when each mail next becomes eligible, so polling an
//! idle spool lists the repository but only reads records that are due or
//! not seen before. Records that cannot be decoded are skipped and reported
//! by [`Spool::unreadable`] instead of blocking the mails behind them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use mailet_common::{Mail, MailId, internal};
use tokio::sync::{Notify, futures::Notified};

use crate::{
    SpoolError,
    r#trait::{Repository, transfer},
};

/// Exclusive right to process one spooled mail
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    id: MailId,
    token: u64,
}

impl Lease {
    /// The leased mail
    #[must_use]
    pub const fn id(&self) -> MailId {
        self.id
    }
}

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    token: u64,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    /// Eligible from this time (ms since epoch)
    At(u64),
    Unreadable,
}

impl Schedule {
    fn of(mail: &Mail) -> Self {
        Self::At(mail.next_attempt_at.unwrap_or(0))
    }
}

#[derive(Debug)]
pub struct Spool {
    repository: Arc<dyn Repository>,
    leases: DashMap<MailId, LeaseEntry>,
    schedule: DashMap<MailId, Schedule>,
    next_token: AtomicU64,
    lease_timeout: Duration,
    notify: Notify,
}

impl Spool {
    pub fn new(repository: Arc<dyn Repository>, lease_timeout: Duration) -> Self {
        Self {
            repository,
            leases: DashMap::new(),
            schedule: DashMap::new(),
            next_token: AtomicU64::new(1),
            lease_timeout,
            notify: Notify::new(),
        }
    }

    /// The repository backing this spool
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Add a new mail to the spool and wake one idle worker.
    ///
    /// # Errors
    /// If the backing repository rejects the write
    pub async fn submit(&self, mail: &Mail, content: Arc<[u8]>) -> crate::Result<()> {
        self.repository.store(mail, content).await?;
        self.schedule.insert(mail.id(), Schedule::of(mail));
        internal!(level = DEBUG, "Spooled mail {} in state {}", mail.id(), mail.state());
        self.notify.notify_one();
        Ok(())
    }

    /// Move `mail` from `from` into the spool and wake one idle worker.
    ///
    /// # Errors
    /// If either repository fails; see [`transfer`]
    pub async fn restore(&self, from: &dyn Repository, mail: &Mail) -> crate::Result<()> {
        transfer(from, self.repository.as_ref(), mail).await?;
        self.schedule.insert(mail.id(), Schedule::of(mail));
        self.notify.notify_one();
        Ok(())
    }

    /// Lease the oldest eligible mail.
    ///
    /// A mail is eligible when nobody holds an unexpired lease on it and its
    /// `next_attempt_at`, if any, is not after `now_ms`. Returns `None` when
    /// no mail is eligible.
    ///
    /// A record that cannot be read is skipped. Undecodable records stay
    /// skipped until they are rewritten through the spool; transient read
    /// failures are tried again on the next dequeue.
    ///
    /// # Errors
    /// If the repository cannot be listed
    pub async fn dequeue(&self, now_ms: u64) -> crate::Result<Option<(Lease, Mail)>> {
        let mut ids = self.repository.list().await?;
        ids.sort_unstable();
        self.schedule.retain(|id, _| ids.binary_search(id).is_ok());

        for id in ids {
            match self.schedule.get(&id).map(|entry| *entry) {
                Some(Schedule::Unreadable) => continue,
                Some(Schedule::At(at)) if at > now_ms => continue,
                _ => {}
            }

            let Some(lease) = self.try_acquire(id) else {
                continue;
            };

            match self.repository.retrieve(&id).await {
                Ok(mail) => {
                    self.schedule.insert(id, Schedule::of(&mail));
                    if mail.next_attempt_at.is_some_and(|at| at > now_ms) {
                        self.release(lease);
                    } else {
                        return Ok(Some((lease, mail)));
                    }
                }
                // Completed by another worker between list and retrieve
                Err(SpoolError::NotFound(_)) => {
                    self.schedule.remove(&id);
                    self.release(lease);
                }
                Err(e) if e.is_transient() => {
                    internal!(
                        level = WARN,
                        "Could not read spooled mail {id}, skipping: {e}"
                    );
                    self.release(lease);
                }
                Err(e) => {
                    internal!(
                        level = ERROR,
                        "Spooled mail {id} is unreadable and will be skipped: {e}"
                    );
                    self.schedule.insert(id, Schedule::Unreadable);
                    self.release(lease);
                }
            }
        }

        Ok(None)
    }

    /// Spooled mails whose records could not be decoded
    #[must_use]
    pub fn unreadable(&self) -> Vec<MailId> {
        let mut ids: Vec<MailId> = self
            .schedule
            .iter()
            .filter(|entry| *entry.value() == Schedule::Unreadable)
            .map(|entry| *entry.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    fn try_acquire(&self, id: MailId) -> Option<Lease> {
        let now = Instant::now();
        let entry = LeaseEntry {
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            expires_at: now + self.lease_timeout,
        };

        match self.leases.entry(id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > now {
                    return None;
                }
                internal!(level = WARN, "Lease on mail {id} expired, taking over");
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Some(Lease {
            id,
            token: entry.token,
        })
    }

    fn validate(&self, lease: &Lease) -> crate::Result<()> {
        match self.leases.get(&lease.id) {
            Some(entry) if entry.token == lease.token => Ok(()),
            _ => Err(SpoolError::LeaseLost(lease.id)),
        }
    }

    /// Whether someone currently holds an unexpired lease on `id`
    #[must_use]
    pub fn is_leased(&self, id: &MailId) -> bool {
        self.leases
            .get(id)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Give a lease back without touching the mail.
    ///
    /// Releasing a lease that was already taken over is a no-op.
    pub fn release(&self, lease: Lease) {
        self.leases
            .remove_if(&lease.id, |_, entry| entry.token == lease.token);
    }

    /// Write `mail` back to the spool and release the lease, making the mail
    /// eligible for the next dispatch (subject to `next_attempt_at`).
    ///
    /// # Errors
    /// - [`SpoolError::LeaseLost`] if the lease was taken over
    /// - Any repository error; the lease is released regardless
    pub async fn commit(&self, lease: Lease, mail: &Mail) -> crate::Result<()> {
        self.validate(&lease)?;
        let result = self.repository.update(mail).await;
        self.release(lease);

        if result.is_ok() {
            self.schedule.insert(mail.id(), Schedule::of(mail));
            self.notify.notify_one();
        }
        result
    }

    /// Remove a fully handled mail from the spool.
    ///
    /// # Errors
    /// - [`SpoolError::LeaseLost`] if the lease was taken over
    /// - Any repository error; the lease is released regardless
    pub async fn complete(&self, lease: Lease) -> crate::Result<()> {
        self.validate(&lease)?;
        let result = match self.repository.remove(&lease.id).await {
            Err(SpoolError::NotFound(_)) | Ok(()) => {
                self.schedule.remove(&lease.id);
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.release(lease);
        result
    }

    /// Move `mail` out of the spool into `error_store`.
    ///
    /// # Errors
    /// - [`SpoolError::LeaseLost`] if the lease was taken over
    /// - Any repository error; the lease is released regardless
    pub async fn dead_letter(
        &self,
        lease: Lease,
        mail: &Mail,
        error_store: &dyn Repository,
    ) -> crate::Result<()> {
        self.validate(&lease)?;
        let result = transfer(self.repository.as_ref(), error_store, mail).await;
        if result.is_ok() {
            self.schedule.remove(&lease.id);
        }
        self.release(lease);
        result
    }

    /// Wait until a mail is submitted or committed.
    ///
    /// Permits are stored, so a notification sent while nobody was waiting
    /// wakes the next waiter immediately.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Number of mails in the spool, leased or not
    ///
    /// # Errors
    /// If the repository cannot be listed
    pub async fn len(&self) -> crate::Result<usize> {
        self.repository.len().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mailet_common::{MailAddress, now_ms};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backends::MemoryRepository;

    /// Counts record reads on top of an in-memory repository
    #[derive(Debug, Default)]
    struct CountingRepository {
        inner: MemoryRepository,
        reads: AtomicU64,
    }

    #[async_trait::async_trait]
    impl Repository for CountingRepository {
        async fn store(&self, mail: &Mail, content: Arc<[u8]>) -> crate::Result<()> {
            self.inner.store(mail, content).await
        }

        async fn update(&self, mail: &Mail) -> crate::Result<()> {
            self.inner.update(mail).await
        }

        async fn retrieve(&self, id: &MailId) -> crate::Result<Mail> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.retrieve(id).await
        }

        async fn content(&self, id: &MailId) -> crate::Result<Arc<[u8]>> {
            self.inner.content(id).await
        }

        async fn remove(&self, id: &MailId) -> crate::Result<()> {
            self.inner.remove(id).await
        }

        async fn list(&self) -> crate::Result<Vec<MailId>> {
            self.inner.list().await
        }
    }

    fn mail() -> Mail {
        let rcpt: MailAddress = "alice@local.test".parse().unwrap();
        Mail::new(None, [rcpt], "root", 0)
    }

    fn spool(timeout: Duration) -> Spool {
        Spool::new(Arc::new(MemoryRepository::new()), timeout)
    }

    #[tokio::test]
    async fn test_dequeue_grants_exclusive_lease() {
        let spool = spool(Duration::from_secs(60));
        let mail = mail();
        spool.submit(&mail, Arc::from(Vec::new())).await.unwrap();

        let (lease, leased) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        assert_eq!(leased.id(), mail.id());
        assert!(spool.is_leased(&mail.id()));

        assert!(spool.dequeue(now_ms()).await.unwrap().is_none());

        spool.release(lease);
        assert!(spool.dequeue(now_ms()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dequeue_respects_next_attempt_at() {
        let spool = spool(Duration::from_secs(60));
        let mut mail = mail();
        let now = now_ms();
        mail.next_attempt_at = Some(now + 10_000);
        spool.submit(&mail, Arc::from(Vec::new())).await.unwrap();

        assert!(spool.dequeue(now).await.unwrap().is_none());
        assert!(!spool.is_leased(&mail.id()));
        assert!(spool.dequeue(now + 10_000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_writes_back() {
        let spool = spool(Duration::from_secs(60));
        let mail = mail();
        spool.submit(&mail, Arc::from(Vec::new())).await.unwrap();

        let (lease, mut leased) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        leased.set_state("transport");
        spool.commit(lease, &leased).await.unwrap();

        let (_, again) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        assert_eq!(again.state(), "transport");
    }

    #[tokio::test]
    async fn test_expired_lease_is_fenced() {
        let spool = spool(Duration::ZERO);
        let mail = mail();
        spool.submit(&mail, Arc::from(Vec::new())).await.unwrap();

        let (stale, _) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        let (fresh, _) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        assert_ne!(stale, fresh);

        assert!(matches!(
            spool.complete(stale).await,
            Err(SpoolError::LeaseLost(_))
        ));
        assert_eq!(spool.len().await.unwrap(), 1);

        spool.complete(fresh).await.unwrap();
        assert_eq!(spool.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_moves_mail_and_content() {
        let spool = spool(Duration::from_secs(60));
        let errors = MemoryRepository::new();
        let mail = mail();
        spool
            .submit(&mail, Arc::from(b"body".as_slice()))
            .await
            .unwrap();

        let (lease, mut leased) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        leased.error_message = Some("boom".to_string());
        spool.dead_letter(lease, &leased, &errors).await.unwrap();

        assert_eq!(spool.len().await.unwrap(), 0);
        let stored = errors.retrieve(&mail.id()).await.unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert_eq!(&*errors.content(&mail.id()).await.unwrap(), b"body");
    }

    #[tokio::test]
    async fn test_submit_wakes_waiter() {
        let spool = Arc::new(spool(Duration::from_secs(60)));
        let waiter = Arc::clone(&spool);

        let handle = tokio::spawn(async move { waiter.notified().await });
        spool.submit(&mail(), Arc::from(Vec::new())).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_restore_makes_mail_eligible() {
        let spool = spool(Duration::from_secs(60));
        let errors = MemoryRepository::new();
        let mut mail = mail();
        mail.next_attempt_at = Some(now_ms() + 60_000);
        errors
            .store(&mail, Arc::from(b"body".as_slice()))
            .await
            .unwrap();

        mail.next_attempt_at = None;
        spool.restore(&errors, &mail).await.unwrap();

        assert!(errors.is_empty().await.unwrap());
        let (_, restored) = spool.dequeue(now_ms()).await.unwrap().unwrap();
        assert_eq!(restored.id(), mail.id());
    }

    #[tokio::test]
    async fn test_delayed_mail_is_not_reread_until_due() {
        let repository = Arc::new(CountingRepository::default());
        let shared: Arc<dyn Repository> = repository.clone();
        let spool = Spool::new(shared, Duration::from_secs(60));
        let now = now_ms();

        let mut delayed = mail();
        delayed.next_attempt_at = Some(now + 10_000);
        spool.submit(&delayed, Arc::from(Vec::new())).await.unwrap();

        for _ in 0..5 {
            assert!(spool.dequeue(now).await.unwrap().is_none());
        }
        assert_eq!(repository.reads.load(Ordering::Relaxed), 0);

        let (_, due) = spool.dequeue(now + 10_000).await.unwrap().unwrap();
        assert_eq!(due.id(), delayed.id());
        assert_eq!(repository.reads.load(Ordering::Relaxed), 1);
    }
}
