//! In-memory remote filesystem for tests
//!
//! Listings carry real-looking longnames so the prefix classification is
//! exercised, and every mutating call is recorded in order.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use super::error::{RemoteError, RemoteErrorKind, SftpError};
use super::transport::{Connector, RemoteFs, RemoteWriter};
use super::types::{RawEntry, TypeIndicator};

// Samples taken from a real server
const DIR_LONGNAME: &str = "drwxr-x---    2 user www            13 Jul 23 00:59";
const FILE_LONGNAME: &str = "-rw-r-----    1 user www           760 Jul 23 00:59";

#[derive(Debug, Clone)]
pub enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

impl Node {
    pub fn dir() -> Self {
        Node::Dir(BTreeMap::new())
    }

    pub fn file(content: &str) -> Self {
        Node::File(content.as_bytes().to_vec())
    }

    /// Builder helper: add a child to a directory node.
    pub fn with(mut self, name: &str, child: Node) -> Self {
        if let Node::Dir(children) = &mut self {
            children.insert(name.to_string(), child);
        }
        self
    }
}

/// Recorded remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    List(String),
    Mkdir(String),
    Unlink(String),
    Rmdir(String),
    Write(String),
    Close,
}

#[derive(Default)]
struct Faults {
    mkdir: HashMap<String, RemoteErrorKind>,
    unlink: HashMap<String, RemoteErrorKind>,
    list: HashMap<String, RemoteErrorKind>,
}

struct State {
    root: Node,
    ops: Vec<Op>,
    faults: Faults,
}

#[derive(Clone)]
pub struct MemoryFs {
    state: Arc<Mutex<State>>,
    closed: Arc<AtomicBool>,
    /// Report "already exists" distinctly instead of a generic failure
    distinct_exists: bool,
    /// Yield to the scheduler inside every call
    yielding: bool,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn split_parent(path: &str) -> (Vec<&str>, Option<&str>) {
    let mut segs = segments(path);
    let last = segs.pop();
    (segs, last)
}

fn resolve<'a>(root: &'a Node, segs: &[&str]) -> Option<&'a Node> {
    segs.iter().try_fold(root, |node, seg| match node {
        Node::Dir(children) => children.get(*seg),
        Node::File(_) => None,
    })
}

fn resolve_dir_mut<'a>(
    root: &'a mut Node,
    segs: &[&str],
) -> Option<&'a mut BTreeMap<String, Node>> {
    let node = segs.iter().try_fold(root, |node, seg| match node {
        Node::Dir(children) => children.get_mut(*seg),
        Node::File(_) => None,
    })?;
    match node {
        Node::Dir(children) => Some(children),
        Node::File(_) => None,
    }
}

impl MemoryFs {
    pub fn new(root: Node) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                root,
                ops: Vec::new(),
                faults: Faults::default(),
            })),
            closed: Arc::new(AtomicBool::new(false)),
            distinct_exists: false,
            yielding: false,
        }
    }

    pub fn with_distinct_exists(mut self) -> Self {
        self.distinct_exists = true;
        self
    }

    pub fn with_yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    pub fn fail_mkdir(&self, path: &str, kind: RemoteErrorKind) {
        self.state.lock().faults.mkdir.insert(path.to_string(), kind);
    }

    pub fn fail_unlink(&self, path: &str, kind: RemoteErrorKind) {
        self.state.lock().faults.unlink.insert(path.to_string(), kind);
    }

    pub fn fail_list(&self, path: &str, kind: RemoteErrorKind) {
        self.state.lock().faults.list.insert(path.to_string(), kind);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().ops.clone()
    }

    pub fn deletions(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Unlink(p) | Op::Rmdir(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn mkdirs(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Mkdir(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.ops().iter().filter(|op| **op == Op::Close).count()
    }

    pub fn exists(&self, path: &str) -> bool {
        resolve(&self.state.lock().root, &segments(path)).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            resolve(&self.state.lock().root, &segments(path)),
            Some(Node::Dir(_))
        )
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match resolve(&self.state.lock().root, &segments(path)) {
            Some(Node::File(content)) => Some(content.clone()),
            _ => None,
        }
    }

    async fn pause(&self) {
        if self.yielding {
            tokio::task::yield_now().await;
        }
    }

    fn check_open(&self) -> Result<(), RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RemoteError::connection_lost("session closed"))
        } else {
            Ok(())
        }
    }

    fn exists_error(&self, path: &str) -> RemoteError {
        if self.distinct_exists {
            RemoteError::new(RemoteErrorKind::AlreadyExists, format!("{} exists", path))
        } else {
            RemoteError::failure("Failure")
        }
    }
}

#[async_trait]
impl RemoteFs for MemoryFs {
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>, RemoteError> {
        self.pause().await;
        let mut state = self.state.lock();
        self.check_open()?;
        state.ops.push(Op::List(path.to_string()));
        if let Some(kind) = state.faults.list.get(path) {
            return Err(RemoteError::new(*kind, format!("injected list failure: {}", path)));
        }
        match resolve(&state.root, &segments(path)) {
            Some(Node::Dir(children)) => Ok(children
                .iter()
                .map(|(name, node)| {
                    let attrs = match node {
                        Node::Dir(_) => DIR_LONGNAME,
                        Node::File(_) => FILE_LONGNAME,
                    };
                    RawEntry {
                        name: name.clone(),
                        indicator: TypeIndicator::LongName(format!("{} {}", attrs, name)),
                    }
                })
                .collect()),
            Some(Node::File(_)) => Err(RemoteError::new(
                RemoteErrorKind::NotADirectory,
                format!("{} is not a directory", path),
            )),
            None => Err(RemoteError::not_found(format!("{} does not exist", path))),
        }
    }

    async fn mkdir(&self, path: &str, _mode: u32) -> Result<(), RemoteError> {
        self.pause().await;
        let mut state = self.state.lock();
        self.check_open()?;
        state.ops.push(Op::Mkdir(path.to_string()));
        if let Some(kind) = state.faults.mkdir.get(path) {
            return Err(RemoteError::new(*kind, format!("injected mkdir failure: {}", path)));
        }
        let (parent, name) = split_parent(path);
        let Some(name) = name else {
            return Err(self.exists_error(path));
        };
        let Some(children) = resolve_dir_mut(&mut state.root, &parent) else {
            return Err(RemoteError::not_found(format!("parent of {} missing", path)));
        };
        if children.contains_key(name) {
            return Err(self.exists_error(path));
        }
        children.insert(name.to_string(), Node::dir());
        Ok(())
    }

    async fn unlink(&self, path: &str) -> Result<(), RemoteError> {
        self.pause().await;
        let mut state = self.state.lock();
        self.check_open()?;
        if let Some(kind) = state.faults.unlink.get(path) {
            return Err(RemoteError::new(*kind, format!("injected unlink failure: {}", path)));
        }
        let (parent, name) = split_parent(path);
        let children = name
            .and_then(|_| resolve_dir_mut(&mut state.root, &parent))
            .ok_or_else(|| RemoteError::not_found(format!("{} does not exist", path)))?;
        let name = name.unwrap_or_default();
        match children.get(name) {
            Some(Node::File(_)) => {
                children.remove(name);
            }
            Some(Node::Dir(_)) => {
                return Err(RemoteError::failure(format!("cannot unlink a directory: {}", path)))
            }
            None => return Err(RemoteError::not_found(format!("{} does not exist", path))),
        }
        state.ops.push(Op::Unlink(path.to_string()));
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<(), RemoteError> {
        self.pause().await;
        let mut state = self.state.lock();
        self.check_open()?;
        let (parent, name) = split_parent(path);
        let children = name
            .and_then(|_| resolve_dir_mut(&mut state.root, &parent))
            .ok_or_else(|| RemoteError::not_found(format!("{} does not exist", path)))?;
        let name = name.unwrap_or_default();
        match children.get(name) {
            Some(Node::Dir(grandchildren)) if grandchildren.is_empty() => {
                children.remove(name);
            }
            Some(Node::Dir(_)) => {
                return Err(RemoteError::failure(format!("{} is not empty", path)))
            }
            Some(Node::File(_)) => {
                return Err(RemoteError::failure(format!("{} is not a directory", path)))
            }
            None => return Err(RemoteError::not_found(format!("{} does not exist", path))),
        }
        state.ops.push(Op::Rmdir(path.to_string()));
        Ok(())
    }

    async fn open_write(&self, path: &str, _mode: u32) -> Result<RemoteWriter, RemoteError> {
        self.pause().await;
        let mut state = self.state.lock();
        self.check_open()?;
        let (parent, name) = split_parent(path);
        let name = name.ok_or_else(|| RemoteError::failure("cannot write to /"))?;
        let children = resolve_dir_mut(&mut state.root, &parent)
            .ok_or_else(|| RemoteError::not_found(format!("parent of {} missing", path)))?;
        if let Some(Node::Dir(_)) = children.get(name) {
            return Err(RemoteError::failure(format!("{} is a directory", path)));
        }
        children.insert(name.to_string(), Node::File(Vec::new()));
        state.ops.push(Op::Write(path.to_string()));
        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
            path: path.to_string(),
        }))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.state.lock().ops.push(Op::Close);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Appends straight into the tree; nothing to flush.
struct MemoryWriter {
    state: Arc<Mutex<State>>,
    path: String,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut state = self.state.lock();
        let (parent, name) = split_parent(&self.path);
        let file = name
            .and_then(|name| resolve_dir_mut(&mut state.root, &parent)?.get_mut(name));
        match file {
            Some(Node::File(content)) => {
                content.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "file vanished",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Connector handing out fresh views of one shared in-memory tree.
pub struct MemoryConnector {
    pub fs: MemoryFs,
    pub connects: AtomicUsize,
    pub fail_with: Option<String>,
}

impl MemoryConnector {
    pub fn new(fs: MemoryFs) -> Self {
        Self {
            fs,
            connects: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    pub fn failing(fs: MemoryFs, reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::new(fs)
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteFs>, SftpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(reason) = &self.fail_with {
            return Err(SftpError::ConnectionFailed(reason.clone()));
        }
        // Each connection is its own session over the same tree
        let session = MemoryFs {
            state: self.fs.state.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            distinct_exists: self.fs.distinct_exists,
            yielding: self.fs.yielding,
        };
        Ok(Arc::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryFs {
        MemoryFs::new(
            Node::dir()
                .with("dir1", Node::dir())
                .with(
                    "dir2",
                    Node::dir().with("a.txt", Node::file("a")).with("b.txt", Node::file("b")),
                )
                .with("file1.txt", Node::file("1")),
        )
    }

    #[tokio::test]
    async fn test_list_returns_type_in_longname() {
        let fs = sample();
        let entries = fs.list("/").await.unwrap();
        let dir1 = entries.iter().find(|e| e.name == "dir1").unwrap();
        let file1 = entries.iter().find(|e| e.name == "file1.txt").unwrap();
        assert!(matches!(&dir1.indicator, TypeIndicator::LongName(l) if l.starts_with('d')));
        assert!(matches!(&file1.indicator, TypeIndicator::LongName(l) if l.starts_with('-')));
    }

    #[tokio::test]
    async fn test_list_fails_on_file_and_missing() {
        let fs = sample();
        assert!(fs.list("/file1.txt").await.is_err());
        assert!(fs.list("/non-existing-dir").await.is_err());
    }

    #[tokio::test]
    async fn test_unlink_and_rmdir_rules() {
        let fs = sample();
        assert!(fs.unlink("/dir1").await.is_err());
        assert!(fs.unlink("/missing.txt").await.is_err());
        assert!(fs.rmdir("/dir2").await.is_err());
        assert!(fs.rmdir("/file1.txt").await.is_err());

        fs.unlink("/dir2/a.txt").await.unwrap();
        fs.unlink("/dir2/b.txt").await.unwrap();
        fs.rmdir("/dir2").await.unwrap();
        assert_eq!(fs.deletions(), vec!["/dir2/a.txt", "/dir2/b.txt", "/dir2"]);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let fs = sample();
        fs.close().await.unwrap();
        let err = fs.list("/").await.unwrap_err();
        assert!(err.is_connection_lost());
    }
}
