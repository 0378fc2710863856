//! One named chain of matcher/mailet pairs.

use std::collections::BTreeSet;

use mailet_common::{Mail, MailAddress, pipeline};

use crate::{Mailet, MailetError, Matcher, Outcome};

/// A matcher and the mailet it guards
#[derive(Debug)]
pub struct Pair {
    pub matcher_name: String,
    pub matcher: Box<dyn Matcher>,
    pub mailet_name: String,
    pub mailet: Box<dyn Mailet>,
}

/// How one pass over a processor ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassResult {
    /// Every recipient has been handled
    Ghosted,
    /// The mail was routed, possibly through the fallback; its state now
    /// names the target
    Routed(String),
    /// Recipients remain, nothing routed the mail and there is no fallback
    Exhausted,
    /// A mailet failed; mutations made by earlier pairs are kept
    Failed(MailetError),
}

#[derive(Debug)]
pub struct Processor {
    name: String,
    pairs: Vec<Pair>,
    fallback: Option<String>,
}

impl Processor {
    pub fn new(name: impl Into<String>, pairs: Vec<Pair>, fallback: Option<String>) -> Self {
        Self {
            name: name.into(),
            pairs,
            fallback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    /// Run the chain once over `mail`.
    ///
    /// Pairs run in order. Each mailet sees only the recipients its matcher
    /// selected that no earlier pair has handled in this pass; recipients a
    /// mailet adds stay eligible for later pairs. The pass ends early when
    /// the mail is ghosted, routed, stopped, or a mailet fails.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(processor = %self.name, mail_id = %mail.id(), attempt = mail.attempt_count())
    )]
    pub async fn run(&self, mail: &mut Mail) -> PassResult {
        let mut pending: BTreeSet<MailAddress> = mail.recipients.clone();

        for pair in &self.pairs {
            if mail.is_ghosted() {
                return PassResult::Ghosted;
            }

            let matched: BTreeSet<MailAddress> = pair
                .matcher
                .matches(mail)
                .intersection(&pending)
                .cloned()
                .collect();

            if matched.is_empty() {
                continue;
            }

            pipeline!(
                level = TRACE,
                "{} matched {} recipient(s), running {}",
                pair.matcher_name,
                matched.len(),
                pair.mailet_name
            );

            let mut view = mail.restricted_to(&matched);
            let outcome = match pair.mailet.service(&mut view).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    pipeline!(level = WARN, "{} failed: {e}", pair.mailet_name);
                    return PassResult::Failed(e);
                }
            };

            let state_before = mail.state().to_string();
            let added = mail.merge_view(&matched, view);
            pending.retain(|rcpt| !matched.contains(rcpt));
            pending.extend(added);
            mail.touch();

            if let Outcome::Route(target) = outcome {
                mail.set_state(target.clone());
                return PassResult::Routed(target);
            }

            if mail.state() != state_before {
                return PassResult::Routed(mail.state().to_string());
            }

            if mail.is_ghosted() {
                return PassResult::Ghosted;
            }

            if outcome == Outcome::Stop {
                break;
            }
        }

        if mail.is_ghosted() {
            return PassResult::Ghosted;
        }

        match &self.fallback {
            Some(fallback) => {
                pipeline!(
                    level = DEBUG,
                    "{} recipient(s) left unhandled by {}, falling back to {fallback}",
                    mail.recipients.len(),
                    self.name
                );
                mail.set_state(fallback.clone());
                PassResult::Routed(fallback.clone())
            }
            None => PassResult::Exhausted,
        }
    }
}
