//! [`RemoteFs`] over russh + russh-sftp

use std::sync::Arc;

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::{OpenFlags, StatusCode};
use tracing::{debug, info};

use super::error::{RemoteError, RemoteErrorKind, SftpError};
use super::transport::{Connector, RemoteFs, RemoteWriter};
use super::types::{EntryKind, RawEntry, TypeIndicator};
use crate::ssh::{open_sftp, SshClient, SshConfig, SshHandle};

/// One SFTP subsystem on its own SSH connection
pub struct RusshFs {
    sftp: RusshSftpSession,
    handle: SshHandle,
}

impl RusshFs {
    pub fn new(sftp: RusshSftpSession, handle: SshHandle) -> Self {
        Self { sftp, handle }
    }
}

/// Map russh-sftp errors onto the classification the core understands
fn classify(err: SftpErrorInner) -> RemoteError {
    match &err {
        SftpErrorInner::Status(status) => {
            let kind = match status.status_code {
                StatusCode::NoSuchFile => RemoteErrorKind::NotFound,
                StatusCode::PermissionDenied => RemoteErrorKind::PermissionDenied,
                StatusCode::NoConnection | StatusCode::ConnectionLost => {
                    RemoteErrorKind::ConnectionLost
                }
                _ => RemoteErrorKind::Failure,
            };
            RemoteError::new(kind, err.to_string())
        }
        SftpErrorInner::IO(_) | SftpErrorInner::Timeout => {
            RemoteError::connection_lost(err.to_string())
        }
        _ => RemoteError::failure(err.to_string()),
    }
}

#[async_trait]
impl RemoteFs for RusshFs {
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, RemoteError> {
        let read_dir = self.sftp.read_dir(path).await.map_err(classify)?;

        // russh-sftp already decodes the attributes, so the real type flag is
        // used instead of the longname prefix.
        Ok(read_dir
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                let kind = if entry.metadata().is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                Some(RawEntry {
                    name,
                    indicator: TypeIndicator::Kind(kind),
                })
            })
            .collect())
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), RemoteError> {
        // The high-level client sends no attributes; the server's default
        // mode and umask apply.
        debug!("SFTP mkdir {} (requested {:o})", path, mode);
        self.sftp.create_dir(path).await.map_err(classify)
    }

    async fn unlink(&self, path: &str) -> Result<(), RemoteError> {
        self.sftp.remove_file(path).await.map_err(classify)
    }

    async fn rmdir(&self, path: &str) -> Result<(), RemoteError> {
        self.sftp.remove_dir(path).await.map_err(classify)
    }

    async fn open_write(&self, path: &str, mode: u32) -> Result<RemoteWriter, RemoteError> {
        debug!("SFTP open {} (requested {:o})", path, mode);
        let file = self
            .sftp
            .open_with_flags(
                path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(classify)?;
        Ok(Box::new(file))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        let sftp_result = self.sftp.close().await.map_err(classify);
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await
            .map_err(|e| RemoteError::connection_lost(e.to_string()))?;
        info!("Connection :: end");
        sftp_result
    }
}

/// Connects over SSH and opens the SFTP subsystem
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>, SftpError> {
        let handle = SshClient::new(self.config.clone()).connect().await?;

        info!("Opening SFTP subsystem on {}", self.config.host);
        let sftp = open_sftp(&handle).await?;
        info!("SFTP subsystem opened on {}", self.config.host);

        Ok(Arc::new(RusshFs::new(sftp, handle)))
    }
}
