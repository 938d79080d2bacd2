//! Virtual Filesystem (VFS) Layer
//!
//! A uniform abstraction over filesystem backends, allowing multiple
//! backends (in-memory, persistent key-value, persistent directory-handle)
//! to be mounted and accessed through one API. The mount manager in
//! [`mount`] routes canonical paths to backends by longest prefix.

pub mod handle;
pub mod kv;
pub mod memory;
pub mod mount;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default advisory mode bits for new files
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default advisory mode bits for new directories
pub const DEFAULT_DIR_MODE: u32 = 0o755;

// ============================================================================
// Error Types
// ============================================================================

/// Filesystem error kinds carried on every backend failure.
///
/// Display strings are the POSIX shapes the shell layer rewrites from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// Path does not exist
    #[error("No such file or directory")]
    NotFound,
    /// Path exists and the operation forbids it
    #[error("File exists")]
    AlreadyExists,
    /// Expected a file, found a directory
    #[error("Is a directory")]
    IsADirectory,
    /// Expected a directory, found a file
    #[error("Not a directory")]
    NotADirectory,
    /// Directory has children, operation required empty
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    /// Write on a read-only mount, or a security rejection
    #[error("Permission denied")]
    AccessDenied,
    /// Malformed argument (e.g. rmdir on `/`)
    #[error("Invalid path")]
    InvalidPath,
    /// Storage quota exhausted
    #[error("No space left on device")]
    NoSpace,
    /// Underlying storage failure
    #[error("I/O error: {0}")]
    Io(String),
}

// ============================================================================
// Stat and Directory Entry Types
// ============================================================================

/// Metadata for a file or directory.
///
/// Exactly one of `is_file` / `is_dir` holds. Timestamps are milliseconds
/// since the Unix epoch; `ctime` and `birthtime` are set at creation and
/// only change on rename or recreate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub is_file: bool,
    pub is_dir: bool,
    /// Size in bytes; 0 for directories
    pub size: u64,
    /// Advisory Unix mode bits
    pub mode: u32,
    pub mtime: u64,
    pub atime: u64,
    pub ctime: u64,
    pub birthtime: u64,
}

impl FileStat {
    /// Stat for a fresh file
    pub fn new_file(size: u64, mode: u32, now: u64) -> Self {
        Self { is_file: true, is_dir: false, size, mode, mtime: now, atime: now, ctime: now, birthtime: now }
    }

    /// Stat for a fresh directory
    pub fn new_dir(mode: u32, now: u64) -> Self {
        Self { is_file: false, is_dir: true, size: 0, mode, mtime: now, atime: now, ctime: now, birthtime: now }
    }
}

/// A single directory entry: the unqualified name only, never a full path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_file: true, is_dir: false }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_file: false, is_dir: true }
    }
}

/// Capability profile of a backend. Limits of 0 mean unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCaps {
    /// Survives a page reload
    pub persistent: bool,
    /// Operations complete without yielding to the host
    pub sync_access: bool,
    /// Supports change notification
    pub watchable: bool,
    /// Per-file size limit in bytes
    pub max_file_size: u64,
    /// Total storage limit in bytes
    pub max_storage: u64,
}

impl Default for BackendCaps {
    fn default() -> Self {
        Self { persistent: false, sync_access: false, watchable: false, max_file_size: 0, max_storage: 0 }
    }
}

// ============================================================================
// Operation Options
// ============================================================================

/// Options for `write_file`
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Create missing parent directories
    pub create_parents: bool,
    /// Mode bits for a newly created file
    pub mode: Option<u32>,
}

/// Options for `mkdir`
#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirOptions {
    /// Create missing ancestors; existing directories are accepted
    pub recursive: bool,
    /// Mode bits for newly created directories
    pub mode: Option<u32>,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// The uniform filesystem contract every backend implements.
///
/// Object-safe for dynamic dispatch across backends; callers never branch
/// on backend identity except through [`BackendCaps`]. All paths are
/// canonical and relative to the backend's own root. Methods take `&self`;
/// backends use interior mutability.
///
/// Contracts every backend upholds:
/// - `read_file` on a directory → `IsADirectory`; missing → `NotFound`.
/// - `write_file` on an existing directory → `IsADirectory`; preserves
///   `birthtime`/`ctime` of an existing file and refreshes `mtime`/`atime`.
/// - `mkdir` without `recursive` on a missing parent → `NotFound`; on an
///   existing directory it is a no-op, on an existing file → `AlreadyExists`.
/// - `rmdir` on `/` → `InvalidPath`; non-empty without `recursive` →
///   `DirectoryNotEmpty`.
/// - `readdir*` on a file → `NotADirectory`.
/// - `rename` of a directory is recursive (copy-then-delete acceptable).
/// - `atime` on any read, `mtime` on any content or child-set change, and
///   the parent's `mtime` on any child add/remove.
#[async_trait(?Send)]
pub trait FsBackend {
    /// Short backend type name (e.g. "memfs", "kvfs")
    fn name(&self) -> &str;

    /// Capability profile
    fn caps(&self) -> BackendCaps;

    /// Prepare the backend for use (idempotent)
    async fn init(&self) -> Result<(), FsError>;

    /// Release all resources; ephemeral backends discard state
    async fn destroy(&self) -> Result<(), FsError>;

    /// Push any buffered writes down to storage
    async fn flush(&self) -> Result<(), FsError> {
        Ok(())
    }

    /// Read entire file contents as an owned buffer
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError>;

    /// Create or overwrite a file
    async fn write_file(&self, path: &str, data: &[u8], opts: &WriteOptions) -> Result<(), FsError>;

    /// Remove a file
    async fn unlink(&self, path: &str) -> Result<(), FsError>;

    /// Copy a single file within this backend
    async fn copy_file(&self, src: &str, dest: &str) -> Result<(), FsError> {
        let stat = self.stat(src).await?;
        if stat.is_dir {
            return Err(FsError::IsADirectory);
        }
        let data = self.read_file(src).await?;
        let opts = WriteOptions { create_parents: false, mode: Some(stat.mode) };
        self.write_file(dest, &data, &opts).await
    }

    /// Create a directory
    async fn mkdir(&self, path: &str, opts: &MkdirOptions) -> Result<(), FsError>;

    /// Remove a directory
    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FsError>;

    /// List child names of a directory
    async fn readdir(&self, path: &str) -> Result<Vec<String>, FsError> {
        Ok(self.readdir_with_types(path).await?.into_iter().map(|e| e.name).collect())
    }

    /// List child entries of a directory with their kinds
    async fn readdir_with_types(&self, path: &str) -> Result<Vec<DirEntry>, FsError>;

    /// Metadata for a path
    async fn stat(&self, path: &str) -> Result<FileStat, FsError>;

    /// Whether a path exists
    async fn exists(&self, path: &str) -> Result<bool, FsError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Move a file or directory; directory moves carry the whole subtree
    async fn rename(&self, old: &str, new: &str) -> Result<(), FsError>;
}
