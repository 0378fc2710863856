use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use mailet_common::{Signal, internal, logging};
use mailet_pipeline::{DispatcherConfig, ProcessorConfig};
use mailet_spool::RepositoryConfig;
use mailet_users::UsersConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::server::MailServer;

/// The whole server configuration, as read from `mailet.config.ron`
#[derive(Debug, Clone, Deserialize)]
pub struct Mailet {
    /// Address that stands in for `postmaster@<local domain>` and sends
    /// bounces
    pub postmaster: String,

    /// Processor new mail is bound to
    ///
    /// Default: `root`
    #[serde(default = "defaults::root")]
    pub root: String,

    #[serde(default)]
    pub spool: RepositoryConfig,

    /// Where dead-lettered mail is kept
    #[serde(default)]
    pub error: RepositoryConfig,

    /// Root from which every user's inbox is derived
    #[serde(default)]
    pub inboxes: RepositoryConfig,

    #[serde(default)]
    pub users: UsersConfig,

    /// Largest accepted message, in bytes
    ///
    /// Default: 10 MiB
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    pub processors: Vec<ProcessorConfig>,
}

mod defaults {
    pub fn root() -> String {
        "root".to_string()
    }

    pub const fn max_message_size() -> usize {
        10 * 1024 * 1024
    }
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Forced shutdown, in-flight mail will be picked up on restart");

    Ok(())
}

impl Mailet {
    /// Parse a configuration document
    ///
    /// # Errors
    /// If the document is not valid RON for this shape
    pub fn from_ron(config: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(config)?)
    }

    /// Read and parse the configuration file at `path`
    ///
    /// # Errors
    /// If the file cannot be read or parsed
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;
        Self::from_ron(&content)
    }

    /// Run the server until CTRL+C or SIGTERM, then drain in-flight mail.
    ///
    /// # Errors
    /// If the configuration does not describe a valid server, or the signal
    /// handlers cannot be installed
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let server = MailServer::new(&self).await?;

        internal!(level = INFO, "Controller running");

        let ret = tokio::select! {
            () = server.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                Ok(())
            }
            r = shutdown() => {
                r
            }
        };

        internal!(level = INFO, "Shutting down...");

        ret
    }
}

/// Find the configuration file using the following precedence:
/// 1. `MAILET_CONFIG` environment variable
/// 2. ./mailet.config.ron (current working directory)
/// 3. /etc/mailet/mailet.config.ron (system-wide config)
///
/// # Errors
/// If `MAILET_CONFIG` names a missing file, or none of the defaults exist
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILET_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MAILET_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./mailet.config.ron"),
        PathBuf::from("/etc/mailet/mailet.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - MAILET_CONFIG environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use mailet_pipeline::DispatchReport;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Mailet::from_ron(
            r#"Mailet (
                postmaster: "admin@local.test",
                processors: [(name: "root", mailets: [(matcher: "All", mailet: "Null")])],
            )"#,
        )
        .unwrap();

        assert_eq!(config.root, "root");
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert!(!config.spool.is_persistent());
        assert_eq!(config.dispatcher.workers, 4);
        assert!(config.users.domains.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = Mailet::from_ron(
            r#"Mailet (
                postmaster: "postmaster@local.test",
                root: "incoming",
                spool: File((path: "/var/spool/mailet/spool")),
                error: Memory((capacity: Some(100))),
                users: (path: Some("/var/lib/mailet/users.bin"), domains: ["local.test"]),
                max_message_size: 1024,
                dispatcher: (workers: 8, retry: (max_attempts: 2)),
                processors: [
                    (name: "incoming", fallback: Some("error"), mailets: [
                        (matcher: "RecipientIsLocal", mailet: "LocalDelivery"),
                    ]),
                    (name: "error", mailets: [(matcher: "All", mailet: "Null")]),
                ],
            )"#,
        )
        .unwrap();

        assert_eq!(config.root, "incoming");
        assert!(config.spool.is_persistent());
        assert!(!config.error.is_persistent());
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.dispatcher.retry.max_attempts, 2);
        assert_eq!(config.processors.len(), 2);
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = Mailet::from_ron(include_str!("../../mailet.config.ron")).unwrap();

        assert_eq!(config.postmaster, "postmaster@local.test");
        assert_eq!(
            config.processors.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["root", "abuse", "error"]
        );
        assert_eq!(config.users.domains, vec!["local.test"]);
    }

    #[tokio::test]
    async fn test_shipped_processors_build() {
        let mut config = Mailet::from_ron(include_str!("../../mailet.config.ron")).unwrap();
        config.spool = RepositoryConfig::default();
        config.error = RepositoryConfig::default();
        config.inboxes = RepositoryConfig::default();
        config.users.path = None;

        let server = MailServer::new(&config).await.unwrap();
        assert_eq!(server.pipeline().names(), vec!["abuse", "error", "root"]);
    }

    #[tokio::test]
    async fn test_shipped_processors_deliver_abuse_co_recipients() {
        let mut config = Mailet::from_ron(include_str!("../../mailet.config.ron")).unwrap();
        config.spool = RepositoryConfig::default();
        config.error = RepositoryConfig::default();
        config.inboxes = RepositoryConfig::default();
        config.users.path = None;

        let server = MailServer::new(&config).await.unwrap();
        server.add_user("alice", "secret").await.unwrap();

        let id = server
            .send_mail(
                Some("bob@remote.test".parse().unwrap()),
                [
                    "alice@local.test".parse().unwrap(),
                    "abuse@local.test".parse().unwrap(),
                ],
                &b"spam report"[..],
            )
            .await
            .unwrap();

        assert_eq!(
            server.dispatcher().dispatch_next().await.unwrap(),
            DispatchReport::Routed {
                id,
                state: "abuse".to_string()
            }
        );
        assert!(server.get_user_inbox("alice").unwrap().retrieve(&id).await.is_ok());
        assert_eq!(
            server.dispatcher().dispatch_next().await.unwrap(),
            DispatchReport::Ghosted { id }
        );
    }

    #[test]
    fn test_missing_processors_is_an_error() {
        assert!(Mailet::from_ron(r#"Mailet (postmaster: "admin@local.test")"#).is_err());
    }
}
