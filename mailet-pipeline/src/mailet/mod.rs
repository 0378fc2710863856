//! Mailets act on the recipients their matcher selected.
//!
//! A mailet receives a view of the mail restricted to those recipients and
//! mutates it in place: removing recipients it has fully handled, adding new
//! ones, changing attributes or the state. Whatever it does outside the mail
//! (writing to an inbox, say) may be repeated after a crash and must be safe
//! to repeat.

mod delivery;
mod postmaster;
mod standard;

use ahash::AHashMap;
use async_trait::async_trait;
use mailet_common::Mail;

pub use delivery::LocalDelivery;
pub use postmaster::PostmasterAlias;
pub use standard::{Fail, Identity, Null, SetAttribute, ToProcessor};

use crate::{ConfigError, MailetError};

/// Free-form `key: value` configuration of one mailet
pub type MailetConfig = AHashMap<String, String>;

/// What the processor does after a mailet returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Run the next pair
    Continue,
    /// End this pass. A mailet that changed the state has routed the mail;
    /// otherwise the remaining recipients go to the fallback, as if the
    /// chain had run out
    Stop,
    /// End this pass and re-spool the mail under the named processor
    Route(String),
}

#[async_trait]
pub trait Mailet: Send + Sync + std::fmt::Debug {
    async fn service(&self, mail: &mut Mail) -> Result<Outcome, MailetError>;

    /// The processor this mailet routes to, if it is fixed by configuration.
    ///
    /// Checked against the defined processors when the pipeline is built.
    fn routes_to(&self) -> Option<&str> {
        None
    }
}

/// Look up a required configuration value
pub(crate) fn required<'a>(
    mailet: &str,
    config: &'a MailetConfig,
    key: &str,
) -> Result<&'a str, ConfigError> {
    config
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidMailetConfig {
            mailet: mailet.to_string(),
            reason: format!("missing required setting {key:?}"),
        })
}
