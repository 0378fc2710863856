use ahash::AHashMap;
use mailet_common::{Attribute, MailAddress};
use serde::{Deserialize, Serialize};

use crate::{Credential, UsersError};

/// Everything stored about a user besides their name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    /// `None` for accounts that cannot authenticate (aliases, role accounts)
    pub credential: Option<Credential>,
    /// Where local deliveries for this user should be redirected, if anywhere
    pub forward: Option<MailAddress>,
    pub extra: AHashMap<String, Attribute>,
}

impl UserAttributes {
    /// Attributes for a user that authenticates with `secret`
    ///
    /// # Errors
    /// If the secret cannot be hashed
    pub fn with_secret(secret: &str) -> crate::Result<Self> {
        Ok(Self {
            credential: Some(Credential::new(secret)?),
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub attributes: UserAttributes,
}

/// Canonical form of a user name: trimmed and lower-cased.
///
/// # Errors
/// If the name is empty or contains whitespace, control characters, `@` or
/// path separators.
pub fn normalize_name(name: &str) -> crate::Result<String> {
    let trimmed = name.trim();

    if trimmed.is_empty()
        || trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '@' | '/' | '\\'))
        || trimmed.starts_with('.')
    {
        return Err(UsersError::InvalidName(name.to_string()));
    }

    Ok(trimmed.to_ascii_lowercase())
}
