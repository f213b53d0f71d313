//! SFTP module
//!
//! Remote directory-tree reconciliation: listing, recursive clearing and
//! ancestor directory creation over a pooled SFTP session.

pub mod clear;
pub mod ensure;
pub mod error;
pub mod lister;
#[cfg(test)]
pub(crate) mod memory;
pub mod path_utils;
pub mod pool;
pub mod russh_fs;
pub mod transport;
pub mod types;

pub use clear::TreeClearer;
pub use ensure::{AncestorDirectoryEnsurer, CreationCache, MkdirPolicy};
pub use error::{RemoteError, RemoteErrorKind, SftpError};
pub use lister::RemoteTreeLister;
pub use pool::{SessionHandle, SessionPolicy, SessionPool};
pub use russh_fs::{RusshFs, SshConnector};
pub use transport::{Connector, RemoteFs, RemoteWriter};
pub use types::*;
