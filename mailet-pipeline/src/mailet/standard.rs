use async_trait::async_trait;
use mailet_common::{Attribute, Mail, pipeline};

use super::{Mailet, MailetConfig, Outcome, required};
use crate::{ConfigError, FailureKind, MailetError};

/// Does nothing
#[derive(Debug, Default)]
pub struct Identity;

#[async_trait]
impl Mailet for Identity {
    async fn service(&self, mail: &mut Mail) -> Result<Outcome, MailetError> {
        pipeline!(
            level = DEBUG,
            mail_id = %mail.id(),
            recipients = mail.recipients.len(),
            "Identity"
        );
        Ok(Outcome::Continue)
    }
}

/// Drops every recipient it is given
#[derive(Debug, Default)]
pub struct Null;

#[async_trait]
impl Mailet for Null {
    async fn service(&self, mail: &mut Mail) -> Result<Outcome, MailetError> {
        mail.recipients.clear();
        Ok(Outcome::Continue)
    }
}

/// Routes the mail to another processor
///
/// Settings: `processor` (required)
#[derive(Debug)]
pub struct ToProcessor {
    processor: String,
}

impl ToProcessor {
    /// # Errors
    /// If `processor` is not set
    pub fn new(config: &MailetConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            processor: required("ToProcessor", config, "processor")?.trim().to_string(),
        })
    }
}

#[async_trait]
impl Mailet for ToProcessor {
    async fn service(&self, _mail: &mut Mail) -> Result<Outcome, MailetError> {
        Ok(Outcome::Route(self.processor.clone()))
    }

    fn routes_to(&self) -> Option<&str> {
        Some(&self.processor)
    }
}

/// Sets a string attribute
///
/// Settings: `name` (required), `value` (default empty)
#[derive(Debug)]
pub struct SetAttribute {
    name: String,
    value: String,
}

impl SetAttribute {
    /// # Errors
    /// If `name` is not set
    pub fn new(config: &MailetConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: required("SetAttribute", config, "name")?.to_string(),
            value: config.get("value").cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Mailet for SetAttribute {
    async fn service(&self, mail: &mut Mail) -> Result<Outcome, MailetError> {
        mail.attributes
            .insert(self.name.clone(), Attribute::String(self.value.clone()));
        Ok(Outcome::Continue)
    }
}

/// Always fails, for quarantining traffic and for testing failure handling
///
/// Settings: `kind` (`transient` or `permanent`, default `permanent`),
/// `message`
#[derive(Debug)]
pub struct Fail {
    kind: FailureKind,
    message: String,
}

impl Fail {
    /// # Errors
    /// If `kind` is set to anything other than `transient` or `permanent`
    pub fn new(config: &MailetConfig) -> Result<Self, ConfigError> {
        let kind = match config.get("kind").map(|kind| kind.trim().to_ascii_lowercase()) {
            None => FailureKind::Permanent,
            Some(kind) if kind == "permanent" => FailureKind::Permanent,
            Some(kind) if kind == "transient" => FailureKind::Transient,
            Some(kind) => {
                return Err(ConfigError::InvalidMailetConfig {
                    mailet: "Fail".to_string(),
                    reason: format!("unknown failure kind {kind:?}"),
                });
            }
        };

        Ok(Self {
            kind,
            message: config
                .get("message")
                .cloned()
                .unwrap_or_else(|| "rejected by configuration".to_string()),
        })
    }
}

#[async_trait]
impl Mailet for Fail {
    async fn service(&self, _mail: &mut Mail) -> Result<Outcome, MailetError> {
        Err(MailetError {
            kind: self.kind,
            message: self.message.clone(),
        })
    }
}
