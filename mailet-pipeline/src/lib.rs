//! Matcher/mailet processors and the spool dispatcher that drives mail
//! through them.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod inbox;
pub mod mailet;
pub mod matcher;
pub mod pipeline;
pub mod policy;
pub mod processor;
pub mod registry;

pub use config::{DispatcherConfig, PairConfig, ProcessorConfig};
pub use context::MailetContext;
pub use dispatcher::{DeadLetterReason, DispatchReport, Dispatcher};
pub use error::{ConfigError, DispatchError, FailureKind, MailetError};
pub use inbox::InboxStore;
pub use mailet::{Mailet, MailetConfig, Outcome};
pub use matcher::Matcher;
pub use pipeline::Pipeline;
pub use policy::RetryPolicy;
pub use processor::{PassResult, Processor};
pub use registry::Registry;
