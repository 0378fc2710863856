//! The mail record that travels through the pipeline.
//!
//! A [`Mail`] is the envelope plus processing state. The message body is never
//! embedded: a [`ContentRef`] points at the content stream held by whichever
//! repository currently owns the record.

use std::{
    collections::BTreeSet,
    fmt::{self, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::address::MailAddress;

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Identifier for a mail
///
/// This is a ULID, so identifiers sort by creation time and are never
/// reused. It doubles as the file stem for persisted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailId(ulid::Ulid);

impl MailId {
    /// Generate a new unique identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Parse an identifier from a filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.bin`
    ///
    /// Anything containing path separators or `..`, anything with an unknown
    /// extension, and anything that is not a valid ULID is rejected.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename
            .strip_suffix(".bin")
            .or_else(|| filename.strip_suffix(".eml"))?;

        stem.parse().ok()
    }
}

impl Display for MailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for MailId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self)
    }
}

/// A value stored in [`Mail::attributes`].
///
/// Attributes are side-channel data passed between matchers and mailets.
/// Keys are namespaced by convention only (`mailet.bounce.original`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attribute {
    String(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    List(Vec<Attribute>),
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    Display::fmt(item, f)?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Handle to the content stream of a mail
///
/// The content itself lives in the repository owning the mail, keyed by
/// `key`. Moving a mail between repositories moves the content with it, so
/// the handle stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    key: MailId,
    size: u64,
}

impl ContentRef {
    #[must_use]
    pub const fn new(key: MailId, size: u64) -> Self {
        Self { key, size }
    }

    /// Key of the content stream in the owning repository
    #[must_use]
    pub const fn key(&self) -> MailId {
        self.key
    }

    /// Size of the content in bytes
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

/// One envelope and its processing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    id: MailId,
    /// `None` is the null (bounce) sender, `MAIL FROM:<>`
    pub sender: Option<MailAddress>,
    pub recipients: BTreeSet<MailAddress>,
    state: String,
    pub attributes: AHashMap<String, Attribute>,
    attempt_count: u32,
    /// Milliseconds since the Unix epoch
    pub last_updated: u64,
    content: ContentRef,
    /// Reason for the most recent failure, if any
    pub error_message: Option<String>,
    /// Earliest time (ms since epoch) this mail may be dequeued again
    pub next_attempt_at: Option<u64>,
}

impl Mail {
    /// Create a new mail bound to `state`, with a freshly generated id.
    pub fn new(
        sender: Option<MailAddress>,
        recipients: impl IntoIterator<Item = MailAddress>,
        state: impl Into<String>,
        content_size: u64,
    ) -> Self {
        let id = MailId::generate();

        Self {
            id,
            sender,
            recipients: recipients.into_iter().collect(),
            state: state.into(),
            attributes: AHashMap::new(),
            attempt_count: 0,
            last_updated: now_ms(),
            content: ContentRef::new(id, content_size),
            error_message: None,
            next_attempt_at: None,
        }
    }

    #[inline]
    pub const fn id(&self) -> MailId {
        self.id
    }

    /// Name of the processor this mail is bound to
    #[inline]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Rebind this mail to another processor.
    ///
    /// The attempt counter is reset when, and only when, the name differs
    /// from the current one.
    pub fn set_state(&mut self, state: impl Into<String>) {
        let state = state.into();
        if state != self.state {
            self.state = state;
            self.attempt_count = 0;
        }
    }

    #[inline]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Count one more failed attempt at the current processor
    pub const fn increment_attempts(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Forget previous attempts, e.g. when a dead-lettered mail is re-queued
    pub const fn reset_attempts(&mut self) {
        self.attempt_count = 0;
    }

    #[inline]
    pub const fn content(&self) -> ContentRef {
        self.content
    }

    /// Whether every recipient has been handled
    #[inline]
    pub fn is_ghosted(&self) -> bool {
        self.recipients.is_empty()
    }

    /// Mark this record as modified now
    pub fn touch(&mut self) {
        self.last_updated = now_ms();
    }

    /// A copy of this mail whose recipients are exactly `recipients`.
    ///
    /// Used to hand a mailet only the recipients its matcher selected.
    #[must_use]
    pub fn restricted_to(&self, recipients: &BTreeSet<MailAddress>) -> Self {
        Self {
            recipients: recipients.clone(),
            ..self.clone()
        }
    }

    /// Fold a view produced by [`Mail::restricted_to`] back into this mail.
    ///
    /// Recipients in `matched` that are missing from the view were removed by
    /// the mailet; recipients in the view but not in `matched` were added by
    /// it. The added set is returned so the caller can keep them eligible for
    /// later pairs.
    pub fn merge_view(
        &mut self,
        matched: &BTreeSet<MailAddress>,
        view: Self,
    ) -> BTreeSet<MailAddress> {
        let added: BTreeSet<MailAddress> = view.recipients.difference(matched).cloned().collect();

        self.recipients.retain(|r| !matched.contains(r));
        self.recipients.extend(view.recipients);

        self.sender = view.sender;
        self.attributes = view.attributes;
        self.error_message = view.error_message;
        self.set_state(view.state);

        added
    }
}
