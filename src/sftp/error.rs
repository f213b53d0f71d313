//! SFTP error types

use std::fmt;

use thiserror::Error;

use crate::ssh::SshError;

/// Classification of a failed remote call, as reported by the transport.
///
/// SFTP v3 servers commonly answer `mkdir` on an existing directory with a
/// generic failure, so `Failure` is what most "already exists" cases look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    Failure,
    /// The session is unusable; nothing more may be issued on it.
    ConnectionLost,
}

/// Error returned by a single remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Failure, message)
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::ConnectionLost, message)
    }

    pub fn is_connection_lost(&self) -> bool {
        self.kind == RemoteErrorKind::ConnectionLost
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cannot list {path}: {source}")]
    ListFailed { path: String, source: RemoteError },

    #[error("Cannot delete file {path}: {source}")]
    UnlinkFailed { path: String, source: RemoteError },

    #[error("Cannot remove directory {path}: {source}")]
    RmdirFailed { path: String, source: RemoteError },

    #[error("Cannot create directory {path}: {source}")]
    MkdirFailed { path: String, source: RemoteError },

    #[error("Cannot write {path}: {source}")]
    WriteFailed { path: String, source: RemoteError },

    #[error("Clearing {root} failed: {source}")]
    ClearFailed {
        root: String,
        #[source]
        source: Box<SftpError>,
    },

    #[error("Session already closed")]
    SessionClosed,

    #[error("{path} is outside the local base {base}")]
    OutsideLocalBase { path: String, base: String },

    #[error("Cannot read local file {path}: {source}")]
    LocalReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SftpError {
    /// The remote cause, if this error came from a remote call.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SftpError::ListFailed { source, .. }
            | SftpError::UnlinkFailed { source, .. }
            | SftpError::RmdirFailed { source, .. }
            | SftpError::MkdirFailed { source, .. }
            | SftpError::WriteFailed { source, .. } => Some(source),
            SftpError::ClearFailed { source, .. } => source.remote(),
            _ => None,
        }
    }

    /// Whether the session must not be used after this error.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            SftpError::SessionClosed => true,
            SftpError::ClearFailed { source, .. } => source.is_session_fatal(),
            other => other.remote().is_some_and(RemoteError::is_connection_lost),
        }
    }
}

impl From<SshError> for SftpError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::AuthenticationFailed(msg) => SftpError::AuthenticationFailed(msg),
            SshError::KeyError(msg) => SftpError::KeyError(msg),
            SshError::Timeout(msg) => SftpError::Timeout(msg),
            other => SftpError::ConnectionFailed(other.to_string()),
        }
    }
}
