//! SFTP data types

use serde::{Deserialize, Serialize};

/// Entry kind as far as tree reconciliation cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Classify from an `ls -l` style longname.
    ///
    /// Saves one `stat` round trip per entry: the first character of the
    /// longname is the file type flag.
    ///
    /// ```text
    /// drwxr-x---    2 user www            13 Jul 23 00:59 tmp
    /// -rw-r-----    1 user www           760 Jul 23 00:59 main.css
    /// ```
    pub fn from_longname(longname: &str) -> Self {
        if longname.starts_with('d') {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    pub fn is_dir(self) -> bool {
        self == EntryKind::Directory
    }
}

/// What the transport knows about an entry's type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeIndicator {
    /// Compact listing attribute string (SFTP `longname`)
    LongName(String),
    /// Transport already has a real type flag
    Kind(EntryKind),
}

impl TypeIndicator {
    pub fn kind(&self) -> EntryKind {
        match self {
            TypeIndicator::LongName(longname) => EntryKind::from_longname(longname),
            TypeIndicator::Kind(kind) => *kind,
        }
    }
}

/// Directory entry as returned by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// File name (not full path)
    pub name: String,
    pub indicator: TypeIndicator,
}

/// Classified directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// File name (not full path)
    pub name: String,
    pub kind: EntryKind,
}

impl From<RawEntry> for RemoteEntry {
    fn from(raw: RawEntry) -> Self {
        Self {
            kind: raw.indicator.kind(),
            name: raw.name,
        }
    }
}

/// Constants for SFTP operations
pub mod constants {
    /// Mode for directories created by the ensurer
    pub const DEFAULT_DIR_MODE: u32 = 0o755;

    /// Mode for uploaded files
    pub const DEFAULT_FILE_MODE: u32 = 0o666;

    /// Maximum files uploaded concurrently over the shared session
    pub const MAX_CONCURRENT_UPLOADS: usize = 3;

    /// Upload chunk size (64 KB)
    pub const UPLOAD_CHUNK_SIZE: usize = 65536;

    /// Per-write timeout; a remote write stalled this long means a dead link
    pub const SFTP_IO_TIMEOUT_SECS: u64 = 300;
}
