//! Session pool
//!
//! Owns the lifecycle of the remote session for one deploy run: connect
//! lazily, hand the same [`SessionHandle`] to every operation, close exactly
//! once when the batch ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{RemoteError, SftpError};
use super::transport::{Connector, RemoteFs, RemoteWriter};
use super::types::RawEntry;

/// How sessions are handed out to uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPolicy {
    /// One session for the whole run
    #[default]
    #[serde(alias = "shared")]
    SharedConnection,
    /// Fresh session per file, closed when that file is done
    #[serde(alias = "perFile")]
    NewConnectionPerFile,
}

struct HandleInner {
    id: u64,
    fs: Arc<dyn RemoteFs>,
    /// `close` has been issued
    closed: AtomicBool,
    /// A call reported the connection gone
    broken: AtomicBool,
}

/// One live remote session.
///
/// Cheap to clone; every clone refers to the same session. Once closed or
/// broken, every call fails with [`SftpError::SessionClosed`] without touching
/// the transport.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    pub fn new(id: u64, fs: Arc<dyn RemoteFs>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                fs,
                closed: AtomicBool::new(false),
                broken: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Neither closed nor broken by a lost connection.
    pub fn is_usable(&self) -> bool {
        !self.is_closed() && !self.inner.broken.load(Ordering::SeqCst)
    }

    fn live(&self) -> Result<&dyn RemoteFs, SftpError> {
        if self.is_usable() {
            Ok(self.inner.fs.as_ref())
        } else {
            Err(SftpError::SessionClosed)
        }
    }

    fn observe(&self, err: RemoteError) -> RemoteError {
        if err.is_connection_lost() {
            warn!("Session {} lost: {}", self.inner.id, err);
            self.inner.broken.store(true, Ordering::SeqCst);
        }
        err
    }

    pub async fn list(&self, path: &str) -> Result<Vec<RawEntry>, SftpError> {
        debug!("readdir {}", path);
        self.live()?
            .list(path)
            .await
            .map_err(|e| SftpError::ListFailed {
                path: path.to_string(),
                source: self.observe(e),
            })
    }

    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<(), SftpError> {
        debug!("mkdir {} ({:o})", path, mode);
        self.live()?
            .mkdir(path, mode)
            .await
            .map_err(|e| SftpError::MkdirFailed {
                path: path.to_string(),
                source: self.observe(e),
            })
    }

    pub async fn unlink(&self, path: &str) -> Result<(), SftpError> {
        debug!("unlink {}", path);
        self.live()?
            .unlink(path)
            .await
            .map_err(|e| SftpError::UnlinkFailed {
                path: path.to_string(),
                source: self.observe(e),
            })
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), SftpError> {
        debug!("rmdir {}", path);
        self.live()?
            .rmdir(path)
            .await
            .map_err(|e| SftpError::RmdirFailed {
                path: path.to_string(),
                source: self.observe(e),
            })
    }

    pub async fn open_write(&self, path: &str, mode: u32) -> Result<RemoteWriter, SftpError> {
        debug!("open {} for writing ({:o})", path, mode);
        self.live()?
            .open_write(path, mode)
            .await
            .map_err(|e| SftpError::WriteFailed {
                path: path.to_string(),
                source: self.observe(e),
            })
    }

    /// Close the session. Only the first call reaches the transport.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.inner.fs.close().await {
            Ok(()) => info!("SFTP session {} closed", self.inner.id),
            Err(e) => warn!("Closing SFTP session {} failed: {}", self.inner.id, e),
        }
    }
}

/// Hands out sessions for one run according to a [`SessionPolicy`].
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    policy: SessionPolicy,
    shared: Mutex<Option<SessionHandle>>,
    released: AtomicBool,
    next_id: AtomicU64,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>, policy: SessionPolicy) -> Self {
        Self {
            connector,
            policy,
            shared: Mutex::new(None),
            released: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Get a session: the live shared one, or a newly established one.
    ///
    /// Concurrent callers under the shared policy wait on the same connection
    /// attempt. Connection failures are returned as-is, never retried.
    pub async fn acquire(&self) -> Result<SessionHandle, SftpError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SftpError::SessionClosed);
        }

        match self.policy {
            SessionPolicy::SharedConnection => {
                let mut slot = self.shared.lock().await;
                // release() may have won the lock first
                if self.released.load(Ordering::SeqCst) {
                    return Err(SftpError::SessionClosed);
                }
                if let Some(handle) = slot.as_ref() {
                    return Ok(handle.clone());
                }
                let handle = self.establish().await?;
                *slot = Some(handle.clone());
                Ok(handle)
            }
            SessionPolicy::NewConnectionPerFile => self.establish().await,
        }
    }

    async fn establish(&self) -> Result<SessionHandle, SftpError> {
        let fs = self.connector.connect().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        info!("SFTP session {} established", id);
        Ok(SessionHandle::new(id, fs))
    }

    /// Done with `handle` for one file.
    pub async fn finish(&self, handle: &SessionHandle) {
        if self.policy == SessionPolicy::NewConnectionPerFile {
            handle.close().await;
        }
    }

    /// Close the shared session, if any, and refuse further acquires.
    ///
    /// Safe to call when nothing was ever connected and safe to call twice.
    pub async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        let handle = self.shared.lock().await.take();
        if let Some(handle) = handle {
            handle.close().await;
        }
    }
}
