//! Ancestor directory creation with a run-scoped cache
//!
//! Before a file is written, every directory between the deployment root and
//! the file must exist. [`CreationCache`] remembers which directories were
//! created (or assumed to exist) during the run so that many files landing in
//! the same tree only pay for each `mkdir` once.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::{RemoteErrorKind, SftpError};
use super::path_utils::{
    expand_home_marker, is_strictly_inside, normalize_remote_path, remote_ancestors,
    remote_parent,
};
use super::pool::SessionHandle;
use super::types::constants::DEFAULT_DIR_MODE;

/// What to do when a `mkdir` call fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MkdirPolicy {
    /// Treat any non-fatal failure as "directory already exists".
    ///
    /// Many servers answer `mkdir` on an existing path with a generic
    /// failure that cannot be told apart from other errors without a `stat`.
    #[default]
    #[serde(alias = "assumeExists")]
    AssumeExistsOnError,
    /// Only swallow failures the transport classifies as "already exists".
    Strict,
}

/// Directories known to exist during one run. Grows monotonically.
#[derive(Debug, Default)]
pub struct CreationCache {
    known: DashSet<String>,
    /// Per-path gate so check-then-create never races for one path
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl CreationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Sorted copy of the cached paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.known.iter().map(|p| p.key().clone()).collect();
        paths.sort();
        paths
    }

    fn gate(&self, path: &str) -> Arc<Mutex<()>> {
        self.gates.entry(path.to_string()).or_default().clone()
    }

    fn mark(&self, path: String) {
        self.known.insert(path);
    }
}

/// Creates the missing ancestors of upload targets.
pub struct AncestorDirectoryEnsurer<'a> {
    session: &'a SessionHandle,
    cache: &'a CreationCache,
    policy: MkdirPolicy,
    mode: u32,
}

impl<'a> AncestorDirectoryEnsurer<'a> {
    pub fn new(session: &'a SessionHandle, cache: &'a CreationCache) -> Self {
        Self {
            session,
            cache,
            policy: MkdirPolicy::default(),
            mode: DEFAULT_DIR_MODE,
        }
    }

    pub fn with_policy(mut self, policy: MkdirPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Ancestors of `target_file` strictly inside `remote_root` and not yet
    /// cached, nearest first.
    pub fn missing_ancestors(&self, target_file: &str, remote_root: &str) -> Vec<String> {
        let target = expand_home_marker(&normalize_remote_path(target_file));
        let root = expand_home_marker(&normalize_remote_path(remote_root));

        let Some(dir) = remote_parent(&target) else {
            return Vec::new();
        };

        remote_ancestors(&dir)
            .into_iter()
            .map(|d| expand_home_marker(&d))
            .filter(|d| is_strictly_inside(d, &root) && !self.cache.contains(d))
            .collect()
    }

    /// Make sure every directory between `remote_root` and `target_file`
    /// exists. Returns the number of `mkdir` calls issued.
    ///
    /// Directories are created one at a time, parent before child.
    pub async fn ensure(&self, target_file: &str, remote_root: &str) -> Result<usize, SftpError> {
        let mut pending = self.missing_ancestors(target_file, remote_root);
        let mut issued = 0;

        while let Some(dir) = pending.pop() {
            let gate = self.cache.gate(&dir);
            let _guard = gate.lock().await;

            // Another upload may have created it while we waited
            if self.cache.contains(&dir) {
                continue;
            }

            issued += 1;
            match self.session.mkdir(&dir, self.mode).await {
                Ok(()) => info!("SFTP Created: {}", dir),
                Err(e) => self.absorb(&dir, e)?,
            }
            self.cache.mark(dir);
        }

        Ok(issued)
    }

    fn absorb(&self, dir: &str, err: SftpError) -> Result<(), SftpError> {
        if err.is_session_fatal() {
            return Err(err);
        }

        match (self.policy, err.remote().map(|r| r.kind)) {
            (_, Some(RemoteErrorKind::AlreadyExists)) => {
                debug!("Directory already exists: {}", dir);
                Ok(())
            }
            (MkdirPolicy::AssumeExistsOnError, _) => {
                warn!("SFTP error or directory exists: {} {}", err, dir);
                Ok(())
            }
            (MkdirPolicy::Strict, _) => Err(err),
        }
    }
}
