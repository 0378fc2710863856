use async_trait::async_trait;

use crate::UserAttributes;

/// Store of user identities, keyed by (case-insensitive) name.
///
/// Queries are synchronous so that matchers can consult the repository
/// without awaiting; mutations may hit storage and are async.
#[async_trait]
pub trait UsersRepository: Send + Sync + std::fmt::Debug {
    /// Create a user.
    ///
    /// # Errors
    /// [`crate::UsersError::AlreadyExists`] if the name is taken, or a
    /// storage error.
    async fn add_user(&self, name: &str, attributes: UserAttributes) -> crate::Result<()>;

    /// Delete a user.
    ///
    /// # Errors
    /// [`crate::UsersError::NotFound`] if no such user exists, or a storage
    /// error.
    async fn remove_user(&self, name: &str) -> crate::Result<()>;

    /// # Errors
    /// [`crate::UsersError::NotFound`] if no such user exists.
    fn get_attributes(&self, name: &str) -> crate::Result<UserAttributes>;

    fn contains(&self, name: &str) -> bool;

    /// Check `attempt` against the user's stored credential.
    ///
    /// Unknown users and users without a credential never pass.
    fn test(&self, name: &str, attempt: &str) -> bool {
        self.get_attributes(name)
            .ok()
            .and_then(|attributes| attributes.credential)
            .is_some_and(|credential| credential.verify(attempt))
    }

    fn count_users(&self) -> usize;

    /// The mail domains served locally
    fn get_domains(&self) -> Vec<String>;

    /// Whether `domain` is served locally (ASCII case-insensitive)
    fn serves_domain(&self, domain: &str) -> bool {
        self.get_domains()
            .iter()
            .any(|served| served.eq_ignore_ascii_case(domain))
    }
}
