//! The surface protocol front-ends talk to.
//!
//! Submission only writes to the spool. Processing happens later, on the
//! dispatcher's workers.

use std::{sync::Arc, time::Duration};

use mailet_common::{Mail, MailAddress, MailId, Signal, internal};
use mailet_pipeline::{DispatchError, Dispatcher, InboxStore, MailetContext, Pipeline, Registry};
use mailet_spool::{Repository, Spool};
use mailet_users::{UserAttributes, UsersError, UsersRepository};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::broadcast,
};

use crate::{
    controller::Mailet,
    error::{StartupError, SubmitError},
};

#[derive(Debug)]
pub struct MailServer {
    max_message_size: usize,
    users: Arc<dyn UsersRepository>,
    inboxes: Arc<InboxStore>,
    dispatcher: Arc<Dispatcher>,
}

impl MailServer {
    /// Build a server with the standard matchers and mailets
    ///
    /// # Errors
    /// See [`MailServer::with_registry`]
    pub async fn new(config: &Mailet) -> Result<Self, StartupError> {
        Self::with_registry(config, &Registry::standard()).await
    }

    /// Build a server resolving matchers and mailets through `registry`
    ///
    /// # Errors
    /// - The postmaster address does not parse
    /// - A repository cannot be opened
    /// - The processors do not form a valid pipeline
    pub async fn with_registry(config: &Mailet, registry: &Registry) -> Result<Self, StartupError> {
        let postmaster: MailAddress = config.postmaster.parse()?;

        let spool = config.spool.clone().into_repository()?;
        let error_store = config.error.clone().into_repository()?;
        let users = config.users.clone().into_repository().await?;
        let inboxes = Arc::new(InboxStore::new(config.inboxes.clone()));

        let context = MailetContext {
            postmaster: postmaster.clone(),
            users: Arc::clone(&users),
            inboxes: Arc::clone(&inboxes),
            spool: Arc::clone(&spool),
        };

        let pipeline = registry.build(&config.root, &config.processors, &context)?;

        internal!(
            level = INFO,
            "Pipeline ready with processors {:?}, rooted at {}",
            pipeline.names(),
            pipeline.root()
        );

        let spool = Arc::new(Spool::new(
            spool,
            Duration::from_secs(config.dispatcher.lease_timeout_secs),
        ));

        let dispatcher = Dispatcher::new(
            spool,
            error_store,
            Arc::new(pipeline),
            postmaster,
            config.dispatcher.clone(),
        );

        Ok(Self {
            max_message_size: config.max_message_size,
            users,
            inboxes,
            dispatcher: Arc::new(dispatcher),
        })
    }

    /// Queue a mail for processing by the root processor.
    ///
    /// Returns once the mail and its content are in the spool.
    ///
    /// # Errors
    /// - [`SubmitError::ContentValidation`] if there are no recipients, or
    ///   the content cannot be read, is empty, or exceeds the size limit
    /// - [`SubmitError::Spool`] if the spool cannot store it
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn send_mail<R>(
        &self,
        sender: Option<MailAddress>,
        recipients: impl IntoIterator<Item = MailAddress>,
        content: R,
    ) -> Result<MailId, SubmitError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let recipients: Vec<MailAddress> = recipients.into_iter().collect();
        if recipients.is_empty() {
            return Err(SubmitError::ContentValidation(
                "mail has no recipients".to_string(),
            ));
        }

        let limit = u64::try_from(self.max_message_size)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut buffer = Vec::new();
        content
            .take(limit)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| SubmitError::ContentValidation(format!("failed to read content: {e}")))?;

        if buffer.is_empty() {
            return Err(SubmitError::ContentValidation("content is empty".to_string()));
        }
        if buffer.len() > self.max_message_size {
            return Err(SubmitError::ContentValidation(format!(
                "content exceeds the maximum message size of {} bytes",
                self.max_message_size
            )));
        }

        let mail = Mail::new(
            sender,
            recipients,
            self.pipeline().root(),
            buffer.len() as u64,
        );
        self.dispatcher
            .spool()
            .submit(&mail, Arc::from(buffer))
            .await?;

        internal!(
            level = DEBUG,
            "Accepted mail {} for {} recipient(s)",
            mail.id(),
            mail.recipients.len()
        );

        Ok(mail.id())
    }

    /// The delivery repository of `user`, created if necessary
    ///
    /// # Errors
    /// If `user` is not a valid user name or the repository cannot be created
    pub fn get_user_inbox(&self, user: &str) -> mailet_spool::Result<Arc<dyn Repository>> {
        self.inboxes.inbox(user)
    }

    /// Create a user that authenticates with `secret`.
    ///
    /// Returns `false` if the name is already taken.
    ///
    /// # Errors
    /// If the name is invalid or the users repository cannot be written
    pub async fn add_user(&self, name: &str, secret: &str) -> Result<bool, UsersError> {
        let attributes = UserAttributes::with_secret(secret)?;
        match self.users.add_user(name, attributes).await {
            Ok(()) => Ok(true),
            Err(UsersError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn users(&self) -> &Arc<dyn UsersRepository> {
        &self.users
    }

    pub fn pipeline(&self) -> &Pipeline {
        self.dispatcher.pipeline()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Move a dead-lettered mail back into the spool
    ///
    /// # Errors
    /// See [`Dispatcher::requeue`]
    pub async fn requeue(&self, id: &MailId, state: Option<&str>) -> Result<(), DispatchError> {
        self.dispatcher.requeue(id, state).await
    }

    /// Process the spool until `shutdown` fires
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) {
        Arc::clone(&self.dispatcher).serve(shutdown).await;
    }
}
