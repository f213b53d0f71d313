//! Remote filesystem collaborator interface
//!
//! The reconciliation core only talks to the remote side through [`RemoteFs`].
//! The production implementation lives in [`super::russh_fs`]; tests use an
//! in-memory tree.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use super::error::{RemoteError, SftpError};
use super::types::RawEntry;

/// Writable byte sink for one remote file
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One live remote-filesystem session. Every method is one round trip.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// List a directory. Never returns `.` or `..`.
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, RemoteError>;

    async fn mkdir(&self, path: &str, mode: u32) -> Result<(), RemoteError>;

    async fn unlink(&self, path: &str) -> Result<(), RemoteError>;

    async fn rmdir(&self, path: &str) -> Result<(), RemoteError>;

    /// Open `path` for writing, creating or truncating it.
    async fn open_write(&self, path: &str, mode: u32) -> Result<RemoteWriter, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Establishes new sessions; the single place where transport and auth run.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>, SftpError>;
}
