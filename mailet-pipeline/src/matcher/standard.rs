use std::collections::BTreeSet;

use ahash::AHashSet;
use mailet_common::{Mail, MailAddress};

use super::{Matcher, required_items};
use crate::ConfigError;

/// Every recipient, unconditionally
#[derive(Debug, Default)]
pub struct All;

impl Matcher for All {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        mail.recipients.clone()
    }
}

/// Recipients whose full address is in the configured list
#[derive(Debug)]
pub struct RecipientIs {
    addresses: BTreeSet<MailAddress>,
}

impl RecipientIs {
    /// # Errors
    /// If the condition is empty or any item is not an address
    pub fn new(condition: &str) -> Result<Self, ConfigError> {
        let addresses = required_items("RecipientIs", condition, |item| {
            item.parse::<MailAddress>().map_err(|e| e.to_string())
        })?;

        Ok(Self {
            addresses: addresses.into_iter().collect(),
        })
    }
}

impl Matcher for RecipientIs {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        mail.recipients
            .intersection(&self.addresses)
            .cloned()
            .collect()
    }
}

/// Recipients whose local part is in the configured list, ignoring case and
/// domain
#[derive(Debug)]
pub struct UserIs {
    users: AHashSet<String>,
}

impl UserIs {
    /// # Errors
    /// If the condition is empty
    pub fn new(condition: &str) -> Result<Self, ConfigError> {
        let users = required_items("UserIs", condition, |item| Ok(item.to_lowercase()))?;

        Ok(Self {
            users: users.into_iter().collect(),
        })
    }
}

impl Matcher for UserIs {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        mail.recipients
            .iter()
            .filter(|rcpt| self.users.contains(&rcpt.local_part().to_lowercase()))
            .cloned()
            .collect()
    }
}

/// Recipients whose domain is in the configured list
#[derive(Debug)]
pub struct HostIs {
    hosts: AHashSet<String>,
}

impl HostIs {
    /// # Errors
    /// If the condition is empty
    pub fn new(condition: &str) -> Result<Self, ConfigError> {
        let hosts = required_items("HostIs", condition, |item| Ok(item.to_ascii_lowercase()))?;

        Ok(Self {
            hosts: hosts.into_iter().collect(),
        })
    }
}

impl Matcher for HostIs {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        mail.recipients
            .iter()
            .filter(|rcpt| self.hosts.contains(rcpt.domain()))
            .cloned()
            .collect()
    }
}

/// All recipients, if the sender is in the configured list.
///
/// The null sender never matches.
#[derive(Debug)]
pub struct SenderIs {
    senders: BTreeSet<MailAddress>,
}

impl SenderIs {
    /// # Errors
    /// If the condition is empty or any item is not an address
    pub fn new(condition: &str) -> Result<Self, ConfigError> {
        let senders = required_items("SenderIs", condition, |item| {
            item.parse::<MailAddress>().map_err(|e| e.to_string())
        })?;

        Ok(Self {
            senders: senders.into_iter().collect(),
        })
    }
}

impl Matcher for SenderIs {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        match &mail.sender {
            Some(sender) if self.senders.contains(sender) => mail.recipients.clone(),
            _ => BTreeSet::new(),
        }
    }
}

/// All recipients, if the mail carries any of the configured attributes
#[derive(Debug)]
pub struct HasAttribute {
    names: Vec<String>,
}

impl HasAttribute {
    /// # Errors
    /// If the condition is empty
    pub fn new(condition: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            names: required_items("HasAttribute", condition, |item| Ok(item.to_string()))?,
        })
    }
}

impl Matcher for HasAttribute {
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress> {
        if self
            .names
            .iter()
            .any(|name| mail.attributes.contains_key(name))
        {
            mail.recipients.clone()
        } else {
            BTreeSet::new()
        }
    }
}
