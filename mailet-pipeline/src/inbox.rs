use std::sync::Arc;

use dashmap::DashMap;
use mailet_common::internal;
use mailet_spool::{Repository, RepositoryConfig, SpoolError};
use mailet_users::normalize_name;

/// Per-user delivery repositories, created on first use.
///
/// Every inbox is derived from one configured root: a subdirectory per user
/// for file repositories, an independent store per user for memory ones.
#[derive(Debug)]
pub struct InboxStore {
    root: RepositoryConfig,
    inboxes: DashMap<String, Arc<dyn Repository>>,
}

impl InboxStore {
    pub fn new(root: RepositoryConfig) -> Self {
        Self {
            root,
            inboxes: DashMap::new(),
        }
    }

    /// Resolve the inbox of `user`, creating it if necessary
    ///
    /// # Errors
    /// - [`SpoolError::Validation`] if the user name cannot name an inbox
    /// - Any error creating the repository
    pub fn inbox(&self, user: &str) -> mailet_spool::Result<Arc<dyn Repository>> {
        let name = normalize_name(user).map_err(|e| {
            SpoolError::Validation(mailet_spool::ValidationError::InvalidName(e.to_string()))
        })?;

        if let Some(inbox) = self.inboxes.get(&name) {
            return Ok(Arc::clone(inbox.value()));
        }

        let inbox = self
            .inboxes
            .entry(name.clone())
            .or_try_insert_with(|| {
                internal!(level = DEBUG, "Creating inbox for {name}");
                self.root.nested(&name)?.into_repository()
            })?;

        Ok(Arc::clone(inbox.value()))
    }

    /// Number of inboxes resolved so far
    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}
