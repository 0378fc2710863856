//! Bounce synthesis for dead-lettered mail.

use std::fmt::Write as _;

use mailet_common::{Attribute, Mail, MailAddress};

/// Marks a bounce, holding the id of the mail it reports on
pub const BOUNCE_ORIGINAL: &str = "mailet.bounce.original";

/// Whether a bounce should be sent for `mail`
///
/// Never for the null sender, and never for a bounce.
pub fn should_bounce(mail: &Mail) -> bool {
    mail.sender.is_some() && !mail.attributes.contains_key(BOUNCE_ORIGINAL)
}

/// Build a bounce reporting `original` to its sender, bound to `state`.
///
/// Returns the bounce record and its content, or `None` if no bounce should
/// be sent.
pub fn bounce(
    original: &Mail,
    postmaster: &MailAddress,
    state: &str,
    reason: &str,
) -> Option<(Mail, Vec<u8>)> {
    if !should_bounce(original) {
        return None;
    }
    let sender = original.sender.clone()?;

    let mut body = String::new();
    let _ = writeln!(body, "From: {postmaster}");
    let _ = writeln!(body, "To: {sender}");
    let _ = writeln!(body, "Subject: Undeliverable mail returned to sender");
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "Your message {} could not be delivered to the following recipient(s):",
        original.id()
    );
    let _ = writeln!(body);
    for rcpt in &original.recipients {
        let _ = writeln!(body, "  {rcpt}");
    }
    let _ = writeln!(body);
    let _ = writeln!(body, "Reason: {reason}");
    if original.attempt_count() > 0 {
        let _ = writeln!(body, "Attempts: {}", original.attempt_count() + 1);
    }

    let content = body.into_bytes();
    let mut mail = Mail::new(
        Some(postmaster.clone()),
        [sender],
        state,
        content.len() as u64,
    );
    mail.attributes.insert(
        BOUNCE_ORIGINAL.to_string(),
        Attribute::String(original.id().to_string()),
    );

    Some((mail, content))
}
