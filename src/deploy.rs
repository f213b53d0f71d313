//! Batch deploy
//!
//! Maps local files onto the remote root, creates missing directories once,
//! uploads with bounded concurrency and closes the session exactly once when
//! the batch ends, whether it succeeded or not.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{DeploySettings, ResolvedOptions};
use crate::sftp::constants::{SFTP_IO_TIMEOUT_SECS, UPLOAD_CHUNK_SIZE};
use crate::sftp::path_utils::{
    expand_home_marker, join_remote_path, local_to_remote_fragment, normalize_remote_path,
};
use crate::sftp::{
    AncestorDirectoryEnsurer, Connector, CreationCache, RemoteError, RemoteErrorKind,
    SessionHandle, SessionPool, SftpError, SshConnector, TreeClearer,
};

/// Outcome of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub uploaded: usize,
    /// Remote paths written, sorted
    pub remote_paths: Vec<String>,
}

/// Uploads one batch of files over a session pool.
pub struct Deployer {
    pool: SessionPool,
    cache: CreationCache,
    settings: DeploySettings,
    /// Directory local paths are relative to
    base: PathBuf,
    uploaded: AtomicUsize,
}

impl Deployer {
    pub fn new(connector: Arc<dyn Connector>, settings: DeploySettings, base: PathBuf) -> Self {
        Self {
            pool: SessionPool::new(connector, settings.session_policy),
            cache: CreationCache::new(),
            settings,
            base,
            uploaded: AtomicUsize::new(0),
        }
    }

    /// Deployer over a real SSH connection
    pub fn connect_with(options: ResolvedOptions, base: PathBuf) -> Self {
        let connector = Arc::new(SshConnector::new(options.ssh));
        Self::new(connector, options.settings, base)
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    pub fn cache(&self) -> &CreationCache {
        &self.cache
    }

    /// Files uploaded so far
    pub fn uploaded(&self) -> usize {
        self.uploaded.load(Ordering::SeqCst)
    }

    fn local_root(&self) -> PathBuf {
        self.base.join(&self.settings.local_path)
    }

    fn absolute(&self, local: &Path) -> PathBuf {
        if local.is_absolute() {
            local.to_path_buf()
        } else {
            self.base.join(local)
        }
    }

    /// Remote destination of `local`.
    pub fn remote_path_for(&self, local: &Path) -> Result<String, SftpError> {
        let local_root = self.local_root();
        let absolute = self.absolute(local);
        let relative =
            absolute
                .strip_prefix(&local_root)
                .map_err(|_| SftpError::OutsideLocalBase {
                    path: absolute.display().to_string(),
                    base: local_root.display().to_string(),
                })?;

        let fragment = local_to_remote_fragment(relative);
        if fragment.is_empty() {
            return Err(SftpError::OutsideLocalBase {
                path: absolute.display().to_string(),
                base: local_root.display().to_string(),
            });
        }

        Ok(expand_home_marker(&normalize_remote_path(&join_remote_path(
            &self.settings.remote_path,
            &fragment,
        ))))
    }

    /// Empty the remote root. A root that does not exist yet counts as empty.
    pub async fn clear_remote(&self) -> Result<u64, SftpError> {
        let session = self.pool.acquire().await?;
        let result = TreeClearer::new(&session)
            .clear(&self.settings.remote_path)
            .await;
        self.pool.finish(&session).await;

        match result {
            Err(e) if self.is_missing_root(&e) => {
                info!("Remote root {} does not exist, nothing to clear", self.settings.remote_path);
                Ok(0)
            }
            Err(e) => {
                if e.is_session_fatal() {
                    self.pool.release().await;
                }
                Err(e)
            }
            ok => ok,
        }
    }

    fn is_missing_root(&self, err: &SftpError) -> bool {
        let SftpError::ClearFailed { source, .. } = err else {
            return false;
        };
        matches!(
            source.as_ref(),
            SftpError::ListFailed { path, source: RemoteError { kind: RemoteErrorKind::NotFound, .. } }
                if *path == self.settings.remote_path
        )
    }

    /// Upload one file. Returns its remote path.
    pub async fn upload(&self, local: &Path) -> Result<String, SftpError> {
        let remote = self.remote_path_for(local)?;
        let absolute = self.absolute(local);

        let session = self.pool.acquire().await?;
        let result = self.upload_with(&session, &absolute, &remote).await;
        self.pool.finish(&session).await;

        match result {
            Ok(bytes) => {
                self.uploaded.fetch_add(1, Ordering::SeqCst);
                if self.settings.log_files {
                    let shown = absolute
                        .strip_prefix(&self.base)
                        .unwrap_or(&absolute)
                        .display()
                        .to_string();
                    info!("Uploaded: {} => {}", shown, remote);
                }
                debug!("{} bytes written to {}", bytes, remote);
                Ok(remote)
            }
            Err(e) => {
                if e.is_session_fatal() {
                    warn!("Session lost while uploading {}: {}", remote, e);
                    self.pool.release().await;
                }
                Err(e)
            }
        }
    }

    async fn upload_with(
        &self,
        session: &SessionHandle,
        local: &Path,
        remote: &str,
    ) -> Result<u64, SftpError> {
        let read_failed = |e: std::io::Error| SftpError::LocalReadFailed {
            path: local.display().to_string(),
            source: e,
        };
        let mut local_file = tokio::fs::File::open(local).await.map_err(read_failed)?;

        AncestorDirectoryEnsurer::new(session, &self.cache)
            .with_policy(self.settings.mkdir_policy)
            .with_mode(self.settings.dir_mode)
            .ensure(remote, &self.settings.remote_path)
            .await?;

        let mut remote_file = session.open_write(remote, self.settings.file_mode).await?;

        let io_timeout = Duration::from_secs(SFTP_IO_TIMEOUT_SECS);
        let write_failed = |e: std::io::Error| SftpError::WriteFailed {
            path: remote.to_string(),
            source: classify_write_error(&e),
        };
        let timed_out = || {
            warn!("SFTP upload write timeout after {:?} on {}", io_timeout, remote);
            SftpError::WriteFailed {
                path: remote.to_string(),
                source: RemoteError::connection_lost(format!(
                    "Remote write timeout after {:?}",
                    io_timeout
                )),
            }
        };

        let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut transferred = 0u64;

        loop {
            let bytes_read = local_file.read(&mut buffer).await.map_err(read_failed)?;
            if bytes_read == 0 {
                break;
            }

            tokio::time::timeout(io_timeout, remote_file.write_all(&buffer[..bytes_read]))
                .await
                .map_err(|_| timed_out())?
                .map_err(write_failed)?;

            transferred += bytes_read as u64;
        }

        tokio::time::timeout(io_timeout, remote_file.shutdown())
            .await
            .map_err(|_| timed_out())?
            .map_err(write_failed)?;

        Ok(transferred)
    }

    /// Deploy `files`: optionally clear the remote root, then upload with
    /// bounded concurrency.
    ///
    /// After the first failure no new uploads start; in-flight ones finish.
    /// The session is released exactly once in every case.
    pub async fn run<I>(&self, files: I) -> Result<DeployReport, SftpError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let result = self.run_batch(files).await;
        self.pool.release().await;

        match self.uploaded() {
            0 => info!("No files uploaded"),
            n => info!("{} file{} uploaded successfully", n, if n == 1 { "" } else { "s" }),
        }

        result
    }

    async fn run_batch<I>(&self, files: I) -> Result<DeployReport, SftpError>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        if self.settings.clear_remote {
            self.clear_remote().await?;
        }

        let failed = AtomicBool::new(false);
        let failed = &failed;

        let mut uploads = stream::iter(files)
            .map(|file| async move {
                if failed.load(Ordering::SeqCst) {
                    debug!("Skipping {} after earlier failure", file.display());
                    return None;
                }
                Some(self.upload(&file).await)
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        let mut remote_paths = Vec::new();
        let mut first_error = None;

        while let Some(outcome) = uploads.next().await {
            match outcome {
                Some(Ok(remote)) => remote_paths.push(remote),
                Some(Err(e)) => {
                    failed.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(e);
                }
                None => {}
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        remote_paths.sort();
        Ok(DeployReport {
            uploaded: remote_paths.len(),
            remote_paths,
        })
    }
}

/// A write error from a dead channel means the session is gone.
fn classify_write_error(err: &std::io::Error) -> RemoteError {
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => RemoteError::connection_lost(err.to_string()),
        _ => RemoteError::failure(err.to_string()),
    }
}
