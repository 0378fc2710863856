use std::{collections::BTreeSet, sync::Arc};

use mailet_common::{Mail, MailAddress};
use mailet_users::UsersRepository;

use super::Matcher;

/// Recipients in a locally served domain
#[derive(Debug)]
pub struct HostIsLocal {
    users: Arc<dyn UsersRepository>,
}

impl HostIsLocal {
    pub fn new(users: Arc<dyn UsersRepository>) -> Self {
        Self { users }
    }
}

impl Matcher for HostIsLocal {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        mail.recipients
            .iter()
            .filter(|rcpt| self.users.serves_domain(rcpt.domain()))
            .cloned()
            .collect()
    }
}

/// Recipients in a locally served domain whose local part is a known user
#[derive(Debug)]
pub struct RecipientIsLocal {
    users: Arc<dyn UsersRepository>,
}

impl RecipientIsLocal {
    pub fn new(users: Arc<dyn UsersRepository>) -> Self {
        Self { users }
    }
}

impl Matcher for RecipientIsLocal {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        mail.recipients
            .iter()
            .filter(|rcpt| {
                self.users.serves_domain(rcpt.domain()) && self.users.contains(rcpt.local_part())
            })
            .cloned()
            .collect()
    }
}
