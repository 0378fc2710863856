//! The spool dispatcher
//!
//! Each dispatch leases one mail, runs the processor its state names, and
//! records the transition:
//!
//! | pass result                  | spool transition                                  |
//! |------------------------------|---------------------------------------------------|
//! | ghosted                      | removed                                           |
//! | routed (incl. fallback)      | re-spooled under the new state                    |
//! | transient failure, retries left | re-spooled under the same state, after a backoff |
//! | transient failure, no retries | dead-lettered (and bounced)                      |
//! | permanent failure            | dead-lettered (and bounced)                       |
//! | exhausted without fallback   | dead-lettered as a configuration error            |
//! | unknown state                | dead-lettered as a configuration error            |

pub mod bounce;
mod serve;

use std::{sync::Arc, time::Duration};

use mailet_common::{Mail, MailAddress, MailId, internal, now_ms};
use mailet_spool::{Lease, Repository, Spool};

use crate::{DispatchError, Pipeline, config::DispatcherConfig, processor::PassResult};

/// Why a mail was moved to the error store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// A mailet failed permanently
    Permanent,
    /// A mailet kept failing transiently until the attempt ceiling
    RetriesExhausted,
    /// Recipients were left after the last pair and there is no fallback
    Unroutable,
    /// The mail's state names no configured processor
    UnknownProcessor,
}

/// What one dispatch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// Nothing was eligible
    Idle,
    Ghosted {
        id: MailId,
    },
    Routed {
        id: MailId,
        state: String,
    },
    Retry {
        id: MailId,
        attempt_count: u32,
        next_attempt_at: u64,
    },
    DeadLettered {
        id: MailId,
        reason: DeadLetterReason,
        bounced: bool,
    },
}

#[derive(Debug)]
pub struct Dispatcher {
    spool: Arc<Spool>,
    error_store: Arc<dyn Repository>,
    pipeline: Arc<Pipeline>,
    postmaster: MailAddress,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        spool: Arc<Spool>,
        error_store: Arc<dyn Repository>,
        pipeline: Arc<Pipeline>,
        postmaster: MailAddress,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            spool,
            error_store,
            pipeline,
            postmaster,
            config,
        }
    }

    pub fn spool(&self) -> &Arc<Spool> {
        &self.spool
    }

    pub fn error_store(&self) -> &Arc<dyn Repository> {
        &self.error_store
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.config.idle_interval_secs)
    }

    /// Run one dequeue, execute, record cycle.
    ///
    /// # Errors
    /// If the spool or error store fails. The mail involved, if any, stays in
    /// the spool and becomes eligible again.
    pub async fn dispatch_next(&self) -> Result<DispatchReport, DispatchError> {
        let Some((lease, mail)) = self.spool.dequeue(now_ms()).await? else {
            return Ok(DispatchReport::Idle);
        };

        self.dispatch(lease, mail).await
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(mail_id = %mail.id(), state = %mail.state(), attempt = mail.attempt_count())
    )]
    async fn dispatch(
        &self,
        lease: Lease,
        mut mail: Mail,
    ) -> Result<DispatchReport, DispatchError> {
        let id = mail.id();

        let Some(processor) = self.pipeline.get(mail.state()) else {
            internal!(
                level = ERROR,
                "Mail {id} is bound to unknown processor {}, moving to error store",
                mail.state()
            );
            let reason = format!("unknown processor {}", mail.state());
            return self
                .dead_letter(lease, mail, reason, DeadLetterReason::UnknownProcessor, false)
                .await;
        };

        let attempt_count = mail.attempt_count();

        match processor.run(&mut mail).await {
            PassResult::Ghosted => {
                self.spool.complete(lease).await?;
                internal!(level = DEBUG, "Mail {id} fully handled");
                Ok(DispatchReport::Ghosted { id })
            }
            PassResult::Routed(state) => {
                mail.next_attempt_at = None;
                mail.touch();
                self.spool.commit(lease, &mail).await?;
                internal!(level = DEBUG, "Mail {id} routed to {state}");
                Ok(DispatchReport::Routed { id, state })
            }
            PassResult::Exhausted => {
                internal!(
                    level = ERROR,
                    "Processor {} has no fallback and left {} recipient(s) of mail {id} unhandled",
                    processor.name(),
                    mail.recipients.len()
                );
                let reason = format!(
                    "processor {} left recipients unhandled and has no fallback",
                    processor.name()
                );
                self.dead_letter(lease, mail, reason, DeadLetterReason::Unroutable, false)
                    .await
            }
            PassResult::Failed(e) if e.is_transient() => {
                if self.config.retry.should_retry(attempt_count) {
                    let next_attempt_at =
                        self.config.retry.next_attempt_at(attempt_count, now_ms());
                    mail.increment_attempts();
                    mail.next_attempt_at = Some(next_attempt_at);
                    mail.error_message = Some(e.message);
                    mail.touch();
                    self.spool.commit(lease, &mail).await?;

                    internal!(
                        level = WARN,
                        "Mail {id} failed transiently, retry {} of {} scheduled",
                        mail.attempt_count(),
                        self.config.retry.max_attempts
                    );

                    Ok(DispatchReport::Retry {
                        id,
                        attempt_count: mail.attempt_count(),
                        next_attempt_at,
                    })
                } else {
                    internal!(
                        level = WARN,
                        "Mail {id} failed after {} retries: {}",
                        attempt_count,
                        e.message
                    );
                    self.dead_letter(
                        lease,
                        mail,
                        e.message,
                        DeadLetterReason::RetriesExhausted,
                        self.config.bounce,
                    )
                    .await
                }
            }
            PassResult::Failed(e) => {
                internal!(level = WARN, "Mail {id} failed permanently: {}", e.message);
                self.dead_letter(
                    lease,
                    mail,
                    e.message,
                    DeadLetterReason::Permanent,
                    self.config.bounce,
                )
                .await
            }
        }
    }

    async fn dead_letter(
        &self,
        lease: Lease,
        mut mail: Mail,
        reason: String,
        kind: DeadLetterReason,
        bounce: bool,
    ) -> Result<DispatchReport, DispatchError> {
        let id = mail.id();
        mail.next_attempt_at = None;
        mail.error_message = Some(reason);
        mail.touch();

        self.spool
            .dead_letter(lease, &mail, self.error_store.as_ref())
            .await?;

        let bounced = bounce && self.bounce(&mail).await;

        Ok(DispatchReport::DeadLettered {
            id,
            reason: kind,
            bounced,
        })
    }

    async fn bounce(&self, mail: &Mail) -> bool {
        let reason = mail.error_message.as_deref().unwrap_or("unknown error");
        let Some((bounce, content)) =
            bounce::bounce(mail, &self.postmaster, self.pipeline.root(), reason)
        else {
            return false;
        };

        match self.spool.submit(&bounce, Arc::from(content)).await {
            Ok(()) => {
                internal!(
                    level = INFO,
                    "Bounce {} queued for mail {}",
                    bounce.id(),
                    mail.id()
                );
                true
            }
            Err(e) => {
                internal!(
                    level = ERROR,
                    "Failed to queue bounce for mail {}: {e}",
                    mail.id()
                );
                false
            }
        }
    }

    /// Move a dead-lettered mail back into the spool.
    ///
    /// The mail is bound to `state` (or keeps its own), its attempt counter
    /// and error are cleared, and it is eligible immediately.
    ///
    /// # Errors
    /// - [`DispatchError::UnknownProcessor`] if the target state is undefined
    /// - Any error reading the error store or writing the spool
    pub async fn requeue(&self, id: &MailId, state: Option<&str>) -> Result<(), DispatchError> {
        let mut mail = self.error_store.retrieve(id).await?;

        if let Some(state) = state {
            mail.set_state(state);
        }
        if !self.pipeline.contains(mail.state()) {
            return Err(DispatchError::UnknownProcessor {
                id: *id,
                state: mail.state().to_string(),
            });
        }

        mail.reset_attempts();
        mail.error_message = None;
        mail.next_attempt_at = None;
        mail.touch();

        self.spool.restore(self.error_store.as_ref(), &mail).await?;

        internal!(level = INFO, "Requeued mail {id} in state {}", mail.state());

        Ok(())
    }
}
