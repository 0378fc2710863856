pub mod address;
pub mod error;
pub mod logging;
pub mod mail;

pub use address::MailAddress;
pub use error::AddressError;
pub use mail::{Attribute, ContentRef, Mail, MailId, now_ms};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
