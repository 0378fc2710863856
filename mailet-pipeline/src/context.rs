use std::sync::Arc;

use mailet_common::MailAddress;
use mailet_spool::Repository;
use mailet_users::UsersRepository;

use crate::InboxStore;

/// Handles given to every matcher and mailet at construction.
///
/// Nothing is looked up at runtime: whatever a matcher or mailet needs is in
/// here when its factory runs.
#[derive(Debug, Clone)]
pub struct MailetContext {
    /// Address that replaces `postmaster@<local domain>` and sends bounces
    pub postmaster: MailAddress,
    pub users: Arc<dyn UsersRepository>,
    pub inboxes: Arc<InboxStore>,
    /// Owner of the content of every mail being processed
    pub spool: Arc<dyn Repository>,
}
