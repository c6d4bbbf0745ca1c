//! In-memory remote tree used by the engine tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::{ConnectError, SessionError};
use crate::model::RemoteEntry;
use crate::session::{ChunkCallback, Connector, RemoteSession};

const MOCK_CHUNK: usize = 7;

#[derive(Debug, Default)]
pub struct MockTree {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    broken_dirs: HashSet<String>,
    broken_files: HashSet<String>,
    broken_root_listing: bool,
}

impl MockTree {
    pub fn new() -> Self {
        let mut tree = MockTree::default();
        tree.dirs.insert("/".to_string());
        tree
    }

    pub fn dir(mut self, path: &str) -> Self {
        self.add_dir(path);
        self
    }

    pub fn file(mut self, path: &str, contents: &[u8]) -> Self {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.add_dir(if parent.is_empty() { "/" } else { parent });
        }
        self.files.insert(path.to_string(), contents.to_vec());
        self
    }

    /// `cwd` into this directory fails.
    pub fn broken_dir(mut self, path: &str) -> Self {
        self.broken_dirs.insert(path.to_string());
        self
    }

    /// Retrieval of this file breaks after the first chunk.
    pub fn broken_file(mut self, path: &str) -> Self {
        self.broken_files.insert(path.to_string());
        self
    }

    /// Listing the login directory fails.
    pub fn broken_root_listing(mut self) -> Self {
        self.broken_root_listing = true;
        self
    }

    fn add_dir(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    fn children(&self, dir: &str) -> Vec<RemoteEntry> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        let is_child = |path: &str| {
            path.strip_prefix(&prefix)
                .map(|rest| !rest.is_empty() && !rest.contains('/'))
                .unwrap_or(false)
        };

        let mut entries = vec![RemoteEntry {
            name: ".".to_string(),
            kind: crate::model::EntryKind::Pseudo,
            size: 0,
        }];
        entries.push(RemoteEntry::directory(".."));

        // Servers commonly list by name, directories and files interleaved
        let mut named: Vec<RemoteEntry> = self
            .dirs
            .iter()
            .filter(|d| is_child(d.as_str()))
            .map(|d| RemoteEntry::directory(&d[prefix.len()..]))
            .chain(
                self.files
                    .iter()
                    .filter(|(f, _)| is_child(f.as_str()))
                    .map(|(f, data)| RemoteEntry::file(&f[prefix.len()..], data.len() as u64)),
            )
            .collect();
        named.sort_by(|a, b| a.name.cmp(&b.name));
        entries.extend(named);
        entries
    }
}

pub struct MockSession {
    tree: Arc<MockTree>,
    cwd: String,
    closed: Arc<AtomicUsize>,
}

impl RemoteSession for MockSession {
    fn change_dir(&mut self, path: &str) -> Result<(), SessionError> {
        if self.tree.broken_dirs.contains(path) {
            return Err(SessionError::Protocol("550 Permission denied".to_string()));
        }
        if !self.tree.dirs.contains(path) {
            return Err(SessionError::Protocol("550 No such directory".to_string()));
        }
        self.cwd = path.to_string();
        Ok(())
    }

    fn list_entries(&mut self) -> Result<Vec<RemoteEntry>, SessionError> {
        if self.cwd == "/" && self.tree.broken_root_listing {
            return Err(SessionError::Protocol("500 MLSD not understood".to_string()));
        }
        Ok(self.tree.children(&self.cwd))
    }

    fn retrieve(&mut self, path: &str, on_chunk: &mut ChunkCallback<'_>) -> Result<u64, SessionError> {
        let data = self
            .tree
            .files
            .get(path)
            .ok_or_else(|| SessionError::Protocol("550 No such file".to_string()))?;
        let mut total = 0u64;
        for (i, chunk) in data.chunks(MOCK_CHUNK).enumerate() {
            if i == 1 && self.tree.broken_files.contains(path) {
                return Err(SessionError::Protocol("426 Connection closed; transfer aborted".to_string()));
            }
            on_chunk(chunk).map_err(SessionError::Local)?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }

    fn close(&mut self) {}
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockConnector {
    tree: Arc<MockTree>,
    refuse_first: AtomicUsize,
    connect_delay: Duration,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(tree: MockTree) -> Self {
        MockConnector {
            tree: Arc::new(tree),
            refuse_first: AtomicUsize::new(0),
            connect_delay: Duration::ZERO,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The first `n` connection attempts fail.
    pub fn refusing_first(self, n: usize) -> Self {
        self.refuse_first.store(n, Ordering::SeqCst);
        self
    }

    /// Successful connection attempts take this long.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn session(&self) -> MockSession {
        self.opened.fetch_add(1, Ordering::SeqCst);
        MockSession {
            tree: Arc::clone(&self.tree),
            cwd: "/".to_string(),
            closed: Arc::clone(&self.closed),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self) -> Result<Box<dyn RemoteSession>, ConnectError> {
        let refused = self
            .refuse_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectError::NetworkUnreachable {
                host: "mock".to_string(),
                reason: io::Error::from(io::ErrorKind::ConnectionRefused).to_string(),
            });
        }
        thread::sleep(self.connect_delay);
        Ok(Box::new(self.session()))
    }
}
