//! Recursive remote subtree clearing
//!
//! Post-order, depth-first: every entry of a level is deleted concurrently,
//! a directory's contents are cleared before the directory itself is removed.
//! There is no rollback; entries deleted before a failure stay deleted.

use futures_util::future::{join_all, BoxFuture, FutureExt};
use tracing::{debug, info};

use super::error::SftpError;
use super::lister::RemoteTreeLister;
use super::path_utils::join_remote_path;
use super::pool::SessionHandle;
use super::types::{EntryKind, RemoteEntry};

/// Empties remote directories over one session.
pub struct TreeClearer<'a> {
    session: &'a SessionHandle,
}

impl<'a> TreeClearer<'a> {
    pub fn new(session: &'a SessionHandle) -> Self {
        Self { session }
    }

    /// Delete everything below `root`, keeping `root` itself.
    ///
    /// Returns the number of removed entries.
    pub async fn clear(&self, root: &str) -> Result<u64, SftpError> {
        info!("Clearing remote directory {}", root);
        let removed = self
            .clear_contents(root.to_string())
            .await
            .map_err(|e| SftpError::ClearFailed {
                root: root.to_string(),
                source: Box::new(e),
            })?;
        info!("Cleared {} ({} entries removed)", root, removed);
        Ok(removed)
    }

    /// [`clear`](Self::clear), then remove `root` too.
    pub async fn clear_and_remove(&self, root: &str) -> Result<u64, SftpError> {
        let removed = self.clear(root).await?;
        self.session.rmdir(root).await?;
        Ok(removed + 1)
    }

    /// Boxed so the recursion has a finite future size.
    fn clear_contents(&self, dir: String) -> BoxFuture<'_, Result<u64, SftpError>> {
        async move {
            let entries = RemoteTreeLister::new(self.session).list(&dir).await?;

            // Fan out over the whole level, then fan in. Every sibling runs to
            // completion even if one of them fails.
            let results = join_all(
                entries
                    .into_iter()
                    .map(|entry| self.delete_entry(join_remote_path(&dir, &entry.name), entry)),
            )
            .await;

            let mut removed = 0u64;
            let mut first_error = None;
            for result in results {
                match result {
                    Ok(count) => removed += count,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(removed),
            }
        }
        .boxed()
    }

    async fn delete_entry(&self, path: String, entry: RemoteEntry) -> Result<u64, SftpError> {
        match entry.kind {
            EntryKind::Directory => {
                let removed = self.clear_contents(path.clone()).await?;
                debug!("Deleting remote directory {}", path);
                self.session.rmdir(&path).await?;
                Ok(removed + 1)
            }
            EntryKind::File => {
                debug!("Deleting remote file {}", path);
                self.session.unlink(&path).await?;
                Ok(1)
            }
        }
    }
}
