//! sftp-deploy - upload a batch of files to a remote directory over SFTP
//!
//! Built on russh and russh-sftp. Missing remote directories are created once
//! per run, the remote root can be cleared first, and the SSH session is
//! shared across uploads and closed exactly once.

pub mod config;
pub mod deploy;
pub mod sftp;
pub mod ssh;

pub use config::{ConfigError, DeployOptions, DeploySettings, ResolvedOptions};
pub use deploy::{DeployReport, Deployer};
pub use sftp::SftpError;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
