//! SSH Client implementation using russh

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use russh_sftp::client::SftpSession as RusshSftpSession;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;

/// Authenticated SSH connection
pub type SshHandle = client::Handle<ClientHandler>;

/// SSH Client
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect and authenticate
    pub async fn connect(&self) -> Result<SshHandle, SshError> {
        let addr = (self.config.host.as_str(), self.config.port);

        info!("Connecting to SSH server at {}:{}", self.config.host, self.config.port);

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.host_fingerprint.clone(),
        );

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))?
        .map_err(|e| match e {
            mismatch @ SshError::HostKeyMismatch { .. } => mismatch,
            other => SshError::ConnectionFailed(other.to_string()),
        })?;

        debug!("SSH handshake completed");

        info!("Authenticating with {}.", self.config.auth.describe());
        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
            AuthMethod::Key {
                contents,
                passphrase,
            } => {
                let key = russh::keys::decode_secret_key(contents, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;

                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful");
        Ok(handle)
    }
}

/// Open the SFTP subsystem on a fresh channel of `handle`.
pub async fn open_sftp(handle: &SshHandle) -> Result<RusshSftpSession, SshError> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SshError::ChannelError(e.to_string()))?;

    channel.request_subsystem(true, "sftp").await.map_err(|e| {
        SshError::SubsystemNotAvailable(format!("Failed to request SFTP subsystem: {}", e))
    })?;

    RusshSftpSession::new(channel.into_stream())
        .await
        .map_err(|e| SshError::SubsystemNotAvailable(e.to_string()))
}

/// Compute SHA256 fingerprint of public key, OpenSSH style
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    let hash = hasher.finalize();
    format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
}

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    /// Pinned fingerprint; `None` accepts any host key
    expected_fingerprint: Option<String>,
}

impl ClientHandler {
    pub fn new(host: String, expected_fingerprint: Option<String>) -> Self {
        Self {
            host,
            expected_fingerprint,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let actual = fingerprint(server_public_key);

        match &self.expected_fingerprint {
            Some(expected) if *expected == actual => {
                info!("Host key verified for {}", self.host);
                Ok(true)
            }
            Some(expected) => {
                warn!(
                    "Host key mismatch for {}: expected {}, got {}",
                    self.host, expected, actual
                );
                Err(SshError::HostKeyMismatch {
                    host: self.host.clone(),
                    expected: expected.clone(),
                    actual,
                })
            }
            None => {
                debug!("Accepting host key {} for {}", actual, self.host);
                Ok(true)
            }
        }
    }
}
