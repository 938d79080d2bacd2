//! Mount Manager
//!
//! Routes canonical paths across backends by longest-prefix match. The
//! mount list is kept sorted by descending path length so the first match
//! wins. Directory listings compose backend contents with synthetic
//! entries for direct-child mount points; cross-mount renames degrade to
//! recursive copy-then-delete.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use spinning_top::Spinlock;

use super::{DirEntry, FileStat, FsBackend, FsError, MkdirOptions, WriteOptions};
use crate::path::normalize;

// ============================================================================
// Mount Table
// ============================================================================

struct MountEntry {
    path: String,
    backend: Arc<dyn FsBackend>,
    readonly: bool,
}

/// Description of one mount for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub path: String,
    pub backend_name: String,
    pub readonly: bool,
}

/// A resolved route: which backend serves a path, and where inside it
struct Routed {
    backend: Arc<dyn FsBackend>,
    relative: String,
    readonly: bool,
    mount_path: String,
}

/// The mount manager. Owns its mount list; each backend is owned by
/// exactly one mount and destroyed when that mount goes away.
pub struct MountManager {
    mounts: Spinlock<Vec<MountEntry>>,
}

impl MountManager {
    pub fn new() -> Self {
        Self { mounts: Spinlock::new(Vec::new()) }
    }

    /// Mount a backend at a path. The backend is initialized here; no two
    /// mounts may share the same normalized path.
    pub async fn mount(
        &self,
        path: &str,
        backend: Box<dyn FsBackend>,
        readonly: bool,
    ) -> Result<(), FsError> {
        let path = normalize(path, "/");
        let backend: Arc<dyn FsBackend> = Arc::from(backend);
        backend.init().await?;

        let mut mounts = self.mounts.lock();
        if mounts.iter().any(|m| m.path == path) {
            return Err(FsError::AlreadyExists);
        }
        log::debug!("mounting {} at {}", backend.name(), path);
        mounts.push(MountEntry { path: path.clone(), backend, readonly });
        // Longest prefix first, so routing takes the first match.
        mounts.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Ok(())
    }

    /// Unmount and destroy the backend at a path
    pub async fn unmount(&self, path: &str) -> Result<(), FsError> {
        let path = normalize(path, "/");
        let entry = {
            let mut mounts = self.mounts.lock();
            let idx = mounts.iter().position(|m| m.path == path).ok_or(FsError::NotFound)?;
            mounts.remove(idx)
        };
        log::debug!("unmounting {}", path);
        entry.backend.destroy().await
    }

    /// Unmount everything (test reset entry point)
    pub async fn reset(&self) -> Result<(), FsError> {
        let entries = std::mem::take(&mut *self.mounts.lock());
        for entry in entries {
            entry.backend.destroy().await?;
        }
        Ok(())
    }

    /// All mounts, longest path first
    pub fn mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .lock()
            .iter()
            .map(|m| MountInfo {
                path: m.path.clone(),
                backend_name: String::from(m.backend.name()),
                readonly: m.readonly,
            })
            .collect()
    }

    /// Find the mount serving `path` and the path relative to it
    fn route(&self, path: &str) -> Result<Routed, FsError> {
        let normalized = normalize(path, "/");
        let mounts = self.mounts.lock();
        for mount in mounts.iter() {
            let relative = if mount.path == "/" {
                normalized.clone()
            } else if normalized == mount.path {
                String::from("/")
            } else if let Some(rest) = normalized.strip_prefix(&mount.path) {
                if !rest.starts_with('/') {
                    continue;
                }
                String::from(rest)
            } else {
                continue;
            };
            return Ok(Routed {
                backend: Arc::clone(&mount.backend),
                relative,
                readonly: mount.readonly,
                mount_path: mount.path.clone(),
            });
        }
        Err(FsError::NotFound)
    }

    fn route_writable(&self, path: &str) -> Result<Routed, FsError> {
        let routed = self.route(path)?;
        if routed.readonly {
            return Err(FsError::AccessDenied);
        }
        Ok(routed)
    }

    /// Mount points that appear as direct children of `parent`
    fn child_mount_entries(&self, parent: &str) -> Vec<DirEntry> {
        let parent = normalize(parent, "/");
        let mut entries = Vec::new();
        for mount in self.mounts.lock().iter() {
            if mount.path == "/" || mount.path == parent {
                continue;
            }
            let rest = if parent == "/" {
                &mount.path[1..]
            } else if let Some(rest) = mount.path.strip_prefix(&format!("{parent}/")) {
                rest
            } else {
                continue;
            };
            if !rest.is_empty() && !rest.contains('/') {
                entries.push(DirEntry::dir(rest));
            }
        }
        entries
    }

    // ========================================================================
    // Routed Operations
    // ========================================================================

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        let routed = self.route(path)?;
        routed.backend.read_file(&routed.relative).await
    }

    /// Read a file as UTF-8 text
    pub async fn read_to_string(&self, path: &str) -> Result<String, FsError> {
        let bytes = self.read_file(path).await?;
        String::from_utf8(bytes).map_err(|_| FsError::Io(String::from("invalid UTF-8")))
    }

    pub async fn write_file(&self, path: &str, data: &[u8], opts: &WriteOptions) -> Result<(), FsError> {
        let routed = self.route_writable(path)?;
        routed.backend.write_file(&routed.relative, data, opts).await
    }

    pub async fn unlink(&self, path: &str) -> Result<(), FsError> {
        let routed = self.route_writable(path)?;
        routed.backend.unlink(&routed.relative).await
    }

    pub async fn mkdir(&self, path: &str, opts: &MkdirOptions) -> Result<(), FsError> {
        let routed = self.route_writable(path)?;
        routed.backend.mkdir(&routed.relative, opts).await
    }

    pub async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        let routed = self.route_writable(path)?;
        routed.backend.rmdir(&routed.relative, recursive).await
    }

    pub async fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self.readdir_with_types(path).await?.into_iter().map(|e| e.name).collect())
    }

    /// Backend listing composed with direct-child mount points,
    /// deduplicated by name
    pub async fn readdir_with_types(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let routed = self.route(path)?;
        let mut entries = routed.backend.readdir_with_types(&routed.relative).await?;
        for mount_entry in self.child_mount_entries(path) {
            if !entries.iter().any(|e| e.name == mount_entry.name) {
                entries.push(mount_entry);
            }
        }
        Ok(entries)
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        let routed = self.route(path)?;
        routed.backend.stat(&routed.relative).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool, FsError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn copy_file(&self, src: &str, dest: &str) -> Result<(), FsError> {
        let from = self.route(src)?;
        let to = self.route_writable(dest)?;
        if from.mount_path == to.mount_path {
            return from.backend.copy_file(&from.relative, &to.relative).await;
        }
        let stat = from.backend.stat(&from.relative).await?;
        if stat.is_dir {
            return Err(FsError::IsADirectory);
        }
        let data = from.backend.read_file(&from.relative).await?;
        let opts = WriteOptions { create_parents: false, mode: Some(stat.mode) };
        to.backend.write_file(&to.relative, &data, &opts).await
    }

    /// Move a file or directory. Within one mount this is the backend's
    /// native rename; across mounts it is a recursive copy then delete
    /// (best-effort, not transactional).
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        let from = self.route_writable(old)?;
        let to = self.route_writable(new)?;
        if from.mount_path == to.mount_path {
            return from.backend.rename(&from.relative, &to.relative).await;
        }

        let old = normalize(old, "/");
        let new = normalize(new, "/");
        let stat = from.backend.stat(&from.relative).await?;
        if stat.is_file {
            let data = from.backend.read_file(&from.relative).await?;
            let opts = WriteOptions { create_parents: false, mode: Some(stat.mode) };
            to.backend.write_file(&to.relative, &data, &opts).await?;
            from.backend.unlink(&from.relative).await?;
        } else {
            self.copy_tree(&old, &new).await?;
            from.backend.rmdir(&from.relative, true).await?;
        }
        Ok(())
    }

    /// Recursively copy a directory subtree across arbitrary mounts
    fn copy_tree<'a>(
        &'a self,
        src: &'a str,
        dest: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + 'a>> {
        Box::pin(async move {
            self.mkdir(dest, &MkdirOptions { recursive: true, ..Default::default() }).await?;
            for entry in self.readdir_with_types(src).await? {
                let src_child = format!("{}/{}", src.trim_end_matches('/'), entry.name);
                let dest_child = format!("{}/{}", dest.trim_end_matches('/'), entry.name);
                if entry.is_dir {
                    self.copy_tree(&src_child, &dest_child).await?;
                } else {
                    let stat = self.stat(&src_child).await?;
                    let data = self.read_file(&src_child).await?;
                    let opts = WriteOptions { create_parents: false, mode: Some(stat.mode) };
                    self.write_file(&dest_child, &data, &opts).await?;
                }
            }
            Ok(())
        })
    }

    pub async fn flush_all(&self) -> Result<(), FsError> {
        let backends: Vec<Arc<dyn FsBackend>> =
            self.mounts.lock().iter().map(|m| Arc::clone(&m.backend)).collect();
        for backend in backends {
            backend.flush().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Tree Helpers
    // ========================================================================

    /// Depth-first pre-order iterator over everything under `path`
    pub async fn walk(&self, path: &str) -> Result<WalkIter<'_>, FsError> {
        let path = normalize(path, "/");
        let mut stack = Vec::new();
        let mut entries = self.readdir_with_types(&path).await?;
        entries.reverse();
        for entry in entries {
            stack.push(WalkEntry { path: child_path(&path, &entry.name), entry });
        }
        Ok(WalkIter { manager: self, stack })
    }

    /// All file paths under `path`, depth-first
    pub async fn get_all_files(&self, path: &str) -> Result<Vec<String>, FsError> {
        let mut iter = self.walk(path).await?;
        let mut files = Vec::new();
        while let Some(item) = iter.next().await {
            let item = item?;
            if item.entry.is_file {
                files.push(item.path);
            }
        }
        Ok(files)
    }

    /// Snapshot the UTF-8 file subtree under `path` as a path → contents
    /// map. Binary files are skipped silently.
    pub async fn to_json(&self, path: &str) -> Result<serde_json::Map<String, serde_json::Value>, FsError> {
        let mut map = serde_json::Map::new();
        for file in self.get_all_files(path).await? {
            let bytes = self.read_file(&file).await?;
            if let Ok(text) = String::from_utf8(bytes) {
                map.insert(file, serde_json::Value::String(text));
            }
        }
        Ok(map)
    }

    /// Write every entry of a path → contents map, creating parents
    pub async fn from_json(&self, map: &serde_json::Map<String, serde_json::Value>) -> Result<(), FsError> {
        let opts = WriteOptions { create_parents: true, ..Default::default() };
        for (path, value) in map {
            if let serde_json::Value::String(text) = value {
                self.write_file(path, text.as_bytes(), &opts).await?;
            }
        }
        Ok(())
    }
}

impl Default for MountManager {
    fn default() -> Self {
        Self::new()
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" { format!("/{name}") } else { format!("{parent}/{name}") }
}

/// One step of a depth-first walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub entry: DirEntry,
}

/// Hand-rolled async iterator for [`MountManager::walk`]
pub struct WalkIter<'a> {
    manager: &'a MountManager,
    stack: Vec<WalkEntry>,
}

impl WalkIter<'_> {
    pub async fn next(&mut self) -> Option<Result<WalkEntry, FsError>> {
        let item = self.stack.pop()?;
        if item.entry.is_dir {
            match self.manager.readdir_with_types(&item.path).await {
                Ok(mut entries) => {
                    entries.reverse();
                    for entry in entries {
                        self.stack.push(WalkEntry {
                            path: child_path(&item.path, &entry.name),
                            entry,
                        });
                    }
                }
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(item))
    }
}
