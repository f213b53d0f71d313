//! Remote directory listing

use tracing::debug;

use super::error::SftpError;
use super::pool::SessionHandle;
use super::types::RemoteEntry;

/// Wraps a single "list directory" call.
pub struct RemoteTreeLister<'a> {
    session: &'a SessionHandle,
}

impl<'a> RemoteTreeLister<'a> {
    pub fn new(session: &'a SessionHandle) -> Self {
        Self { session }
    }

    /// List `dir`, classifying each entry from the listing alone.
    ///
    /// Fails if `dir` does not exist or is not a directory.
    pub async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, SftpError> {
        let entries: Vec<RemoteEntry> = self
            .session
            .list(dir)
            .await?
            .into_iter()
            .filter(|raw| raw.name != "." && raw.name != "..")
            .map(RemoteEntry::from)
            .collect();

        debug!("Listed {} entries in {}", entries.len(), dir);
        Ok(entries)
    }
}
