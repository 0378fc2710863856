use serde::Deserialize;

use crate::{mailet::MailetConfig, policy::RetryPolicy};

/// One processor as configured
///
/// ```ron
/// (
///     name: "root",
///     fallback: Some("error"),
///     mailets: [
///         (matcher: "UserIs", condition: "postmaster", mailet: "PostmasterAlias"),
///         (matcher: "RecipientIs", condition: "abuse@local.test", mailet: "ToProcessor",
///          config: {"processor": "abuse"}),
///     ],
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    pub name: String,
    /// Where mail goes when recipients are left after the last pair
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub mailets: Vec<PairConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    /// Registry identifier of the matcher
    pub matcher: String,
    #[serde(default)]
    pub condition: String,
    /// Registry identifier of the mailet
    pub mailet: String,
    #[serde(default)]
    pub config: MailetConfig,
}

/// Dispatcher worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Number of concurrent workers
    ///
    /// Default: 4
    #[serde(default = "defaults::workers")]
    pub workers: usize,

    /// How long a worker may hold a mail before another may take it over
    ///
    /// Default: 300 seconds
    #[serde(default = "defaults::lease_timeout_secs")]
    pub lease_timeout_secs: u64,

    /// Longest an idle worker sleeps before checking the spool again
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::idle_interval_secs")]
    pub idle_interval_secs: u64,

    /// How long in-flight mails may take to finish after shutdown is requested
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Send a bounce to the sender when a mail is dead-lettered
    ///
    /// Default: true
    #[serde(default = "defaults::bounce")]
    pub bounce: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: defaults::workers(),
            lease_timeout_secs: defaults::lease_timeout_secs(),
            idle_interval_secs: defaults::idle_interval_secs(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
            bounce: defaults::bounce(),
            retry: RetryPolicy::default(),
        }
    }
}

mod defaults {
    pub const fn workers() -> usize {
        4
    }

    pub const fn lease_timeout_secs() -> u64 {
        300
    }

    pub const fn idle_interval_secs() -> u64 {
        5
    }

    pub const fn shutdown_timeout_secs() -> u64 {
        30
    }

    pub const fn bounce() -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_processor_config() {
        let config: ProcessorConfig = ron::from_str(
            r#"(
                name: "root",
                fallback: Some("error"),
                mailets: [
                    (matcher: "UserIs", condition: "postmaster", mailet: "PostmasterAlias"),
                    (matcher: "RecipientIs", condition: "abuse@local.test", mailet: "ToProcessor",
                     config: {"processor": "abuse"}),
                ],
            )"#,
        )
        .unwrap();

        assert_eq!(config.name, "root");
        assert_eq!(config.fallback.as_deref(), Some("error"));
        assert_eq!(config.mailets.len(), 2);
        assert_eq!(config.mailets[0].condition, "postmaster");
        assert_eq!(
            config.mailets[1].config.get("processor").map(String::as_str),
            Some("abuse")
        );
    }

    #[test]
    fn test_dispatcher_defaults() {
        let config: DispatcherConfig =
            ron::from_str("(workers: 2, retry: (max_attempts: 3))").unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.lease_timeout_secs, 300);
        assert!(config.bounce);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_secs, 60);
    }
}
