//! A spool-driven matcher/mailet mail server.
//!
//! Mail submitted through [`MailServer::send_mail`] is written to the spool
//! and processed asynchronously by the dispatcher's workers, processor by
//! processor, until every recipient has been handled or the mail is
//! dead-lettered.

pub mod controller;
pub mod error;
pub mod server;

pub use controller::{Mailet, find_config_file};
pub use error::{StartupError, SubmitError};
pub use server::MailServer;
