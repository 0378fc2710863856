use std::sync::Arc;

use async_trait::async_trait;
use mailet_common::{Mail, MailAddress, pipeline};
use mailet_users::UsersRepository;

use super::{Mailet, Outcome};
use crate::MailetError;

/// Rewrites `postmaster@<local domain>` to the configured postmaster.
///
/// The alias is replaced, not copied, and the recipient set never holds the
/// postmaster twice.
#[derive(Debug)]
pub struct PostmasterAlias {
    postmaster: MailAddress,
    users: Arc<dyn UsersRepository>,
}

impl PostmasterAlias {
    pub fn new(postmaster: MailAddress, users: Arc<dyn UsersRepository>) -> Self {
        Self { postmaster, users }
    }
}

#[async_trait]
impl Mailet for PostmasterAlias {
    async fn service(&self, mail: &mut Mail) -> Result<Outcome, MailetError> {
        let aliases: Vec<MailAddress> = mail
            .recipients
            .iter()
            .filter(|rcpt| {
                rcpt.is_postmaster()
                    && self.users.serves_domain(rcpt.domain())
                    && **rcpt != self.postmaster
            })
            .cloned()
            .collect();

        if aliases.is_empty() {
            return Ok(Outcome::Continue);
        }

        for alias in &aliases {
            mail.recipients.remove(alias);
        }
        mail.recipients.insert(self.postmaster.clone());

        pipeline!(
            level = DEBUG,
            mail_id = %mail.id(),
            "Rewrote {} postmaster alias(es) to {}",
            aliases.len(),
            self.postmaster
        );

        Ok(Outcome::Continue)
    }
}
