//! Matchers select the recipients a mailet acts on.
//!
//! A matcher is built once from its condition string and is then a pure
//! function of the mail: it never mutates it and holds no state that changes
//! between calls, so one instance serves every dispatcher worker.

mod local;
mod standard;

use std::collections::BTreeSet;

use mailet_common::{Mail, MailAddress};

pub use local::{HostIsLocal, RecipientIsLocal};
pub use standard::{All, HasAttribute, HostIs, RecipientIs, SenderIs, UserIs};

use crate::ConfigError;

pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// The subset of `mail.recipients` this matcher selects
    fn matches(&self, mail: &Mail) -> BTreeSet<MailAddress>;
}

/// Split a condition into its items.
///
/// Items are separated by commas and/or whitespace; empty items are dropped.
pub fn condition_items(condition: &str) -> impl Iterator<Item = &str> {
    condition
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
}

/// Parse a condition that must name at least one item
pub(crate) fn required_items<T>(
    matcher: &str,
    condition: &str,
    mut parse: impl FnMut(&str) -> Result<T, String>,
) -> Result<Vec<T>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidCondition {
        matcher: matcher.to_string(),
        condition: condition.to_string(),
        reason,
    };

    let items = condition_items(condition)
        .map(&mut parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(invalid)?;

    if items.is_empty() {
        return Err(invalid("at least one item is required".to_string()));
    }

    Ok(items)
}
