//! In-Memory Backend
//!
//! An ephemeral RAM-backed filesystem: a tree of tagged file/dir nodes keyed
//! by name within each directory. All state is discarded on `destroy()`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use spinning_top::Spinlock;

use super::{
    BackendCaps, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DirEntry, FileStat, FsBackend, FsError,
    MkdirOptions, WriteOptions,
};
use crate::clock::now_ms;

// ============================================================================
// Filesystem Node
// ============================================================================

/// Timestamps carried by every node, in milliseconds since the epoch
#[derive(Debug, Clone, Copy)]
struct Times {
    mtime: u64,
    atime: u64,
    ctime: u64,
    birthtime: u64,
}

impl Times {
    fn new(now: u64) -> Self {
        Self { mtime: now, atime: now, ctime: now, birthtime: now }
    }
}

/// A node in the filesystem tree
#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, mode: u32, times: Times },
    Dir { children: BTreeMap<String, Node>, mode: u32, times: Times },
}

impl Node {
    fn new_file(data: Vec<u8>, mode: u32, now: u64) -> Self {
        Node::File { data, mode, times: Times::new(now) }
    }

    fn new_dir(mode: u32, now: u64) -> Self {
        Node::Dir { children: BTreeMap::new(), mode, times: Times::new(now) }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Node::Dir { .. })
    }

    fn times_mut(&mut self) -> &mut Times {
        match self {
            Node::File { times, .. } | Node::Dir { times, .. } => times,
        }
    }

    fn stat(&self) -> FileStat {
        match self {
            Node::File { data, mode, times } => FileStat {
                is_file: true,
                is_dir: false,
                size: data.len() as u64,
                mode: *mode,
                mtime: times.mtime,
                atime: times.atime,
                ctime: times.ctime,
                birthtime: times.birthtime,
            },
            Node::Dir { mode, times, .. } => FileStat {
                is_file: false,
                is_dir: true,
                size: 0,
                mode: *mode,
                mtime: times.mtime,
                atime: times.atime,
                ctime: times.ctime,
                birthtime: times.birthtime,
            },
        }
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

// ============================================================================
// Memory Backend
// ============================================================================

/// Ephemeral in-memory backend
pub struct MemoryBackend {
    root: Spinlock<Node>,
    /// Maximum total size in bytes (0 = unlimited)
    max_storage: u64,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend
    pub fn new() -> Self {
        Self { root: Spinlock::new(Node::new_dir(DEFAULT_DIR_MODE, now_ms())), max_storage: 0 }
    }

    /// Create with a total storage cap
    pub fn with_max_storage(max_bytes: u64) -> Self {
        Self { root: Spinlock::new(Node::new_dir(DEFAULT_DIR_MODE, now_ms())), max_storage: max_bytes }
    }

    /// Walk to a node. An intermediate file yields `NotFound` (the path
    /// simply does not exist); a trailing file is returned as-is.
    fn navigate<'a>(node: &'a Node, path: &str) -> Result<&'a Node, FsError> {
        let mut current = node;
        for component in components(path) {
            match current {
                Node::Dir { children, .. } => {
                    current = children.get(component).ok_or(FsError::NotFound)?;
                }
                Node::File { .. } => return Err(FsError::NotFound),
            }
        }
        Ok(current)
    }

    fn navigate_mut<'a>(node: &'a mut Node, path: &str) -> Result<&'a mut Node, FsError> {
        let mut current = node;
        for component in components(path) {
            match current {
                Node::Dir { children, .. } => {
                    current = children.get_mut(component).ok_or(FsError::NotFound)?;
                }
                Node::File { .. } => return Err(FsError::NotFound),
            }
        }
        Ok(current)
    }

    /// Walk to the parent directory of `path`, returning the directory node
    /// and the final name. `create_parents` builds missing ancestors.
    fn navigate_parent<'a>(
        node: &'a mut Node,
        path: &str,
        create_parents: bool,
        now: u64,
    ) -> Result<(&'a mut Node, String), FsError> {
        let parts = components(path);
        let (name, ancestors) = match parts.split_last() {
            Some((name, ancestors)) => (*name, ancestors),
            None => return Err(FsError::InvalidPath),
        };

        let mut current = node;
        for component in ancestors {
            match current {
                Node::Dir { children, .. } => {
                    if !children.contains_key(*component) {
                        if !create_parents {
                            return Err(FsError::NotFound);
                        }
                        children.insert(String::from(*component), Node::new_dir(DEFAULT_DIR_MODE, now));
                    }
                    current = children.get_mut(*component).ok_or(FsError::NotFound)?;
                }
                Node::File { .. } => return Err(FsError::NotADirectory),
            }
        }

        if current.is_dir() {
            Ok((current, String::from(name)))
        } else {
            Err(FsError::NotADirectory)
        }
    }

    fn total_size(node: &Node) -> u64 {
        match node {
            Node::File { data, .. } => data.len() as u64,
            Node::Dir { children, .. } => children.values().map(Self::total_size).sum(),
        }
    }

    fn check_capacity(&self, root: &Node, incoming: usize) -> Result<(), FsError> {
        if self.max_storage > 0 && Self::total_size(root) + incoming as u64 > self.max_storage {
            return Err(FsError::NoSpace);
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl FsBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memfs"
    }

    fn caps(&self) -> BackendCaps {
        BackendCaps {
            persistent: false,
            sync_access: true,
            watchable: false,
            max_file_size: 0,
            max_storage: self.max_storage,
        }
    }

    async fn init(&self) -> Result<(), FsError> {
        Ok(())
    }

    async fn destroy(&self) -> Result<(), FsError> {
        *self.root.lock() = Node::new_dir(DEFAULT_DIR_MODE, now_ms());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let mut root = self.root.lock();
        let node = Self::navigate_mut(&mut root, path)?;
        match node {
            Node::File { data, times, .. } => {
                times.atime = now_ms();
                Ok(data.clone())
            }
            Node::Dir { .. } => Err(FsError::IsADirectory),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8], opts: &WriteOptions) -> Result<(), FsError> {
        let now = now_ms();
        let mut root = self.root.lock();
        self.check_capacity(&root, data.len())?;

        let (parent, name) = Self::navigate_parent(&mut root, path, opts.create_parents, now)?;
        let Node::Dir { children, times: parent_times, .. } = parent else {
            return Err(FsError::NotADirectory);
        };

        match children.get_mut(&name) {
            Some(Node::Dir { .. }) => Err(FsError::IsADirectory),
            Some(Node::File { data: existing, times, .. }) => {
                *existing = data.to_vec();
                times.mtime = now;
                times.atime = now;
                Ok(())
            }
            None => {
                let mode = opts.mode.unwrap_or(DEFAULT_FILE_MODE);
                children.insert(name, Node::new_file(data.to_vec(), mode, now));
                parent_times.mtime = now;
                Ok(())
            }
        }
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let now = now_ms();
        let mut root = self.root.lock();
        let (parent, name) = Self::navigate_parent(&mut root, path, false, now)?;
        let Node::Dir { children, times, .. } = parent else {
            return Err(FsError::NotADirectory);
        };
        match children.get(&name) {
            Some(Node::File { .. }) => {
                children.remove(&name);
                times.mtime = now;
                Ok(())
            }
            Some(Node::Dir { .. }) => Err(FsError::IsADirectory),
            None => Err(FsError::NotFound),
        }
    }

    async fn mkdir(&self, path: &str, opts: &MkdirOptions) -> Result<(), FsError> {
        let now = now_ms();
        let mut root = self.root.lock();

        if components(path).is_empty() {
            // Root always exists; recreating it is a no-op.
            return Ok(());
        }

        let (parent, name) = Self::navigate_parent(&mut root, path, opts.recursive, now)?;
        let Node::Dir { children, times, .. } = parent else {
            return Err(FsError::NotADirectory);
        };
        match children.get(&name) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(FsError::AlreadyExists),
            None => {
                let mode = opts.mode.unwrap_or(DEFAULT_DIR_MODE);
                children.insert(name, Node::new_dir(mode, now));
                times.mtime = now;
                Ok(())
            }
        }
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let now = now_ms();
        let mut root = self.root.lock();

        if components(path).is_empty() {
            return Err(FsError::InvalidPath);
        }

        let (parent, name) = Self::navigate_parent(&mut root, path, false, now)?;
        let Node::Dir { children, times, .. } = parent else {
            return Err(FsError::NotADirectory);
        };
        match children.get(&name) {
            Some(Node::Dir { children: grandchildren, .. }) => {
                if !grandchildren.is_empty() && !recursive {
                    return Err(FsError::DirectoryNotEmpty);
                }
                children.remove(&name);
                times.mtime = now;
                Ok(())
            }
            Some(Node::File { .. }) => Err(FsError::NotADirectory),
            None => Err(FsError::NotFound),
        }
    }

    async fn readdir_with_types(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let mut root = self.root.lock();
        let node = Self::navigate_mut(&mut root, path)?;
        match node {
            Node::Dir { children, times, .. } => {
                times.atime = now_ms();
                Ok(children
                    .iter()
                    .map(|(name, child)| DirEntry {
                        name: name.clone(),
                        is_file: !child.is_dir(),
                        is_dir: child.is_dir(),
                    })
                    .collect())
            }
            Node::File { .. } => Err(FsError::NotADirectory),
        }
    }

    async fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        let root = self.root.lock();
        Ok(Self::navigate(&root, path)?.stat())
    }

    async fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        let now = now_ms();
        let mut root = self.root.lock();

        if components(old).is_empty() {
            return Err(FsError::InvalidPath);
        }

        let mut node = {
            let (parent, name) = Self::navigate_parent(&mut root, old, false, now)?;
            let Node::Dir { children, times, .. } = parent else {
                return Err(FsError::NotADirectory);
            };
            let node = children.remove(&name).ok_or(FsError::NotFound)?;
            times.mtime = now;
            node
        };
        node.times_mut().ctime = now;

        match Self::navigate_parent(&mut root, new, false, now) {
            Ok((parent, name)) => {
                let Node::Dir { children, times, .. } = parent else {
                    return Err(FsError::NotADirectory);
                };
                children.insert(name, node);
                times.mtime = now;
                Ok(())
            }
            Err(e) => {
                // Put the subtree back so a failed rename leaves no hole.
                if let Ok((parent, name)) = Self::navigate_parent(&mut root, old, false, now) {
                    if let Node::Dir { children, .. } = parent {
                        children.insert(name, node);
                    }
                }
                Err(e)
            }
        }
    }
}
