use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{User, UserAttributes, UsersError, UsersRepository, normalize_name};

/// Volatile users repository
#[derive(Debug, Default)]
pub struct MemoryUsersRepository {
    users: DashMap<String, UserAttributes>,
    domains: Vec<String>,
}

impl MemoryUsersRepository {
    pub fn new(domains: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            users: DashMap::new(),
            domains: domains
                .into_iter()
                .map(|domain| domain.into().to_ascii_lowercase())
                .collect(),
        }
    }

    pub(crate) fn insert(&self, name: &str, attributes: UserAttributes) -> crate::Result<String> {
        let name = normalize_name(name)?;

        match self.users.entry(name.clone()) {
            Entry::Occupied(_) => Err(UsersError::AlreadyExists(name)),
            Entry::Vacant(vacant) => {
                vacant.insert(attributes);
                Ok(name)
            }
        }
    }

    pub(crate) fn delete(&self, name: &str) -> crate::Result<(String, UserAttributes)> {
        let name = normalize_name(name)?;
        self.users
            .remove(&name)
            .ok_or(UsersError::NotFound(name))
    }

    pub(crate) fn restore(&self, name: String, attributes: UserAttributes) {
        self.users.insert(name, attributes);
    }

    /// All users, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .map(|entry| User {
                name: entry.key().clone(),
                attributes: entry.value().clone(),
            })
            .collect();
        users.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        users
    }
}

#[async_trait]
impl UsersRepository for MemoryUsersRepository {
    async fn add_user(&self, name: &str, attributes: UserAttributes) -> crate::Result<()> {
        self.insert(name, attributes).map(|_| ())
    }

    async fn remove_user(&self, name: &str) -> crate::Result<()> {
        self.delete(name).map(|_| ())
    }

    fn get_attributes(&self, name: &str) -> crate::Result<UserAttributes> {
        let name = normalize_name(name)?;
        self.users
            .get(&name)
            .map(|attributes| attributes.value().clone())
            .ok_or(UsersError::NotFound(name))
    }

    fn contains(&self, name: &str) -> bool {
        normalize_name(name).is_ok_and(|name| self.users.contains_key(&name))
    }

    fn count_users(&self) -> usize {
        self.users.len()
    }

    fn get_domains(&self) -> Vec<String> {
        self.domains.clone()
    }
}
