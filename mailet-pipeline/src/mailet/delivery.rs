use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use mailet_common::{Mail, MailAddress, pipeline};
use mailet_spool::Repository;
use mailet_users::UsersRepository;

use super::{Mailet, Outcome};
use crate::{InboxStore, MailetError};

/// Stores a copy of the mail in the inbox of every local recipient and
/// removes those recipients.
///
/// A user with a `forward` address is rewritten to it instead. Recipients
/// that are not local users are left alone for later pairs.
///
/// Inbox writes are keyed by mail id, so repeating a delivery overwrites the
/// earlier copy.
#[derive(Debug)]
pub struct LocalDelivery {
    users: Arc<dyn UsersRepository>,
    inboxes: Arc<InboxStore>,
    spool: Arc<dyn Repository>,
}

impl LocalDelivery {
    pub fn new(
        users: Arc<dyn UsersRepository>,
        inboxes: Arc<InboxStore>,
        spool: Arc<dyn Repository>,
    ) -> Self {
        Self {
            users,
            inboxes,
            spool,
        }
    }

    fn is_local(&self, rcpt: &MailAddress) -> bool {
        self.users.serves_domain(rcpt.domain()) && self.users.contains(rcpt.local_part())
    }
}

#[async_trait]
impl Mailet for LocalDelivery {
    async fn service(&self, mail: &mut Mail) -> Result<Outcome, MailetError> {
        let local: Vec<MailAddress> = mail
            .recipients
            .iter()
            .filter(|rcpt| self.is_local(rcpt))
            .cloned()
            .collect();

        if local.is_empty() {
            return Ok(Outcome::Continue);
        }

        let mut content = None;

        for rcpt in local {
            let attributes = self.users.get_attributes(rcpt.local_part()).map_err(|e| {
                MailetError::transient(format!("Unable to look up {rcpt}: {e}"))
            })?;

            if let Some(forward) = attributes.forward.filter(|forward| *forward != rcpt) {
                pipeline!(level = DEBUG, mail_id = %mail.id(), "Forwarding {rcpt} to {forward}");
                mail.recipients.remove(&rcpt);
                mail.recipients.insert(forward);
                continue;
            }

            let body = match &content {
                Some(body) => Arc::clone(body),
                None => {
                    let body = self.spool.content(&mail.content().key()).await?;
                    content = Some(Arc::clone(&body));
                    body
                }
            };

            let inbox = self.inboxes.inbox(rcpt.local_part())?;
            let copy = mail.restricted_to(&BTreeSet::from([rcpt.clone()]));
            inbox.store(&copy, body).await?;

            pipeline!(level = INFO, mail_id = %mail.id(), "Delivered to {rcpt}");
            mail.recipients.remove(&rcpt);
        }

        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mailet_spool::{MemoryConfig, MemoryRepository, RepositoryConfig, TestRepository};
    use mailet_users::{MemoryUsersRepository, UserAttributes};
    use pretty_assertions::assert_eq;

    use super::*;

    fn set(items: &[&str]) -> BTreeSet<MailAddress> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    async fn users() -> Arc<dyn UsersRepository> {
        let users = MemoryUsersRepository::new(["local.test"]);
        users
            .add_user("alice", UserAttributes::default())
            .await
            .unwrap();
        users
            .add_user(
                "bob",
                UserAttributes {
                    forward: Some("bob@elsewhere.test".parse().unwrap()),
                    ..UserAttributes::default()
                },
            )
            .await
            .unwrap();
        Arc::new(users)
    }

    #[tokio::test]
    async fn test_delivers_local_and_keeps_others() {
        let spool: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let inboxes = Arc::new(InboxStore::new(RepositoryConfig::Memory(
            MemoryConfig::default(),
        )));
        let mailet = LocalDelivery::new(users().await, Arc::clone(&inboxes), Arc::clone(&spool));

        let mut mail = Mail::new(
            None,
            set(&["alice@local.test", "bob@local.test", "carol@remote.test"]),
            "root",
            5,
        );
        spool
            .store(&mail, Arc::from(b"hello".as_slice()))
            .await
            .unwrap();

        assert_eq!(mailet.service(&mut mail).await.unwrap(), Outcome::Continue);
        assert_eq!(
            mail.recipients,
            set(&["bob@elsewhere.test", "carol@remote.test"])
        );

        let inbox = inboxes.inbox("alice").unwrap();
        let delivered = inbox.retrieve(&mail.id()).await.unwrap();
        assert_eq!(delivered.recipients, set(&["alice@local.test"]));
        assert_eq!(&*inbox.content(&mail.id()).await.unwrap(), b"hello");

        // Delivering again overwrites rather than duplicating
        let mut again = mail.restricted_to(&set(&["alice@local.test"]));
        mailet.service(&mut again).await.unwrap();
        assert_eq!(inbox.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_spool_is_transient() {
        let spool = TestRepository::new();
        let inboxes = Arc::new(InboxStore::new(RepositoryConfig::default()));
        let mailet = LocalDelivery::new(users().await, inboxes, Arc::new(spool.clone()));

        let mut mail = Mail::new(None, set(&["alice@local.test"]), "root", 0);
        spool.set_unavailable(true);

        let err = mailet.service(&mut mail).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(mail.recipients, set(&["alice@local.test"]));
    }
}
