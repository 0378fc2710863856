use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// An envelope address.
///
/// The domain is lower-cased on construction, while the local part is kept
/// exactly as given. Equality, hashing and ordering all follow from that:
/// `Alice@Example.COM` and `Alice@example.com` are the same address, but
/// `alice@example.com` is a different one.
///
/// Ordering is by domain first, then local part, so sets of addresses group
/// recipients of the same domain together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MailAddress {
    // Field order matters for the derived `Ord`
    domain: String,
    local_part: String,
}

impl MailAddress {
    /// Build an address from its two halves.
    ///
    /// # Errors
    /// If either half is empty, or contains characters that are not allowed
    /// in that position.
    pub fn new(
        local_part: impl Into<String>,
        domain: impl AsRef<str>,
    ) -> Result<Self, AddressError> {
        let local_part = local_part.into();
        let domain = domain.as_ref().trim().to_ascii_lowercase();

        if local_part.is_empty() {
            return Err(AddressError::EmptyLocalPart(format!("@{domain}")));
        }

        if domain.is_empty() {
            return Err(AddressError::EmptyDomain(format!("{local_part}@")));
        }

        if domain
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '@' | '<' | '>' | ','))
        {
            return Err(AddressError::InvalidDomain(domain));
        }

        let quoted =
            local_part.len() >= 2 && local_part.starts_with('"') && local_part.ends_with('"');
        if local_part.chars().any(char::is_control)
            || (!quoted && local_part.chars().any(char::is_whitespace))
        {
            return Err(AddressError::InvalidLocalPart(local_part));
        }

        Ok(Self { domain, local_part })
    }

    /// The part before the `@`, case preserved
    #[inline]
    pub fn local_part(&self) -> &str {
        &self.local_part
    }

    /// The part after the `@`, lower-cased
    #[inline]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether this is the `postmaster` mailbox of its domain.
    ///
    /// RFC 5321 requires `postmaster` to be matched case-insensitively.
    pub fn is_postmaster(&self) -> bool {
        self.local_part.eq_ignore_ascii_case("postmaster")
    }
}

impl Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for MailAddress {
    type Err = AddressError;

    /// Parse `local@domain`, optionally wrapped in angle brackets.
    ///
    /// The split happens at the last `@`, so quoted local parts containing
    /// an `@` survive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .unwrap_or(trimmed)
            .trim();

        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let (local, domain) = trimmed
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingAt(trimmed.to_string()))?;

        Self::new(local, domain)
    }
}

impl TryFrom<String> for MailAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MailAddress> for String {
    fn from(value: MailAddress) -> Self {
        value.to_string()
    }
}
