//! Persistent Key-Value Backend
//!
//! Stores two records per object in an indexed key-value store: a file
//! record (bytes + timestamps + mode) in the `files` store and a directory
//! record (metadata only) in the `directories` store, both keyed by
//! canonical path. The store itself is behind the [`KvStore`] driver trait;
//! the embedding front-end binds it to IndexedDB, while [`MemoryKvStore`]
//! is the in-process reference driver used by the test suite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spinning_top::Spinlock;

use super::{
    BackendCaps, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DirEntry, FileStat, FsBackend, FsError,
    MkdirOptions, WriteOptions,
};
use crate::clock::now_ms;
use crate::path::{dirname, is_inside};

// ============================================================================
// Driver Trait
// ============================================================================

/// The two logical stores a driver must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Files,
    Directories,
}

/// Indexed key-value storage driver. Keys are canonical absolute paths,
/// values are opaque record buffers.
#[async_trait(?Send)]
pub trait KvStore {
    async fn get(&self, store: StoreKind, key: &str) -> Result<Option<Vec<u8>>, FsError>;
    async fn put(&self, store: StoreKind, key: &str, value: &[u8]) -> Result<(), FsError>;
    async fn delete(&self, store: StoreKind, key: &str) -> Result<(), FsError>;
    /// All keys of a store, in unspecified order
    async fn keys(&self, store: StoreKind) -> Result<Vec<String>, FsError>;
    /// Drop both stores entirely
    async fn clear(&self) -> Result<(), FsError>;
}

/// In-process reference driver
#[derive(Default)]
pub struct MemoryKvStore {
    files: Spinlock<BTreeMap<String, Vec<u8>>>,
    directories: Spinlock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, store: StoreKind) -> &Spinlock<BTreeMap<String, Vec<u8>>> {
        match store {
            StoreKind::Files => &self.files,
            StoreKind::Directories => &self.directories,
        }
    }
}

#[async_trait(?Send)]
impl KvStore for MemoryKvStore {
    async fn get(&self, store: StoreKind, key: &str) -> Result<Option<Vec<u8>>, FsError> {
        Ok(self.map(store).lock().get(key).cloned())
    }

    async fn put(&self, store: StoreKind, key: &str, value: &[u8]) -> Result<(), FsError> {
        self.map(store).lock().insert(String::from(key), value.to_vec());
        Ok(())
    }

    async fn delete(&self, store: StoreKind, key: &str) -> Result<(), FsError> {
        self.map(store).lock().remove(key);
        Ok(())
    }

    async fn keys(&self, store: StoreKind) -> Result<Vec<String>, FsError> {
        Ok(self.map(store).lock().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), FsError> {
        self.files.lock().clear();
        self.directories.lock().clear();
        Ok(())
    }
}

// ============================================================================
// Record Layout
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    data: Vec<u8>,
    mode: u32,
    mtime: u64,
    atime: u64,
    ctime: u64,
    birthtime: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirRecord {
    mode: u32,
    mtime: u64,
    atime: u64,
    ctime: u64,
    birthtime: u64,
}

impl FileRecord {
    fn new(data: Vec<u8>, mode: u32, now: u64) -> Self {
        Self { data, mode, mtime: now, atime: now, ctime: now, birthtime: now }
    }

    fn stat(&self) -> FileStat {
        FileStat {
            is_file: true,
            is_dir: false,
            size: self.data.len() as u64,
            mode: self.mode,
            mtime: self.mtime,
            atime: self.atime,
            ctime: self.ctime,
            birthtime: self.birthtime,
        }
    }
}

impl DirRecord {
    fn new(mode: u32, now: u64) -> Self {
        Self { mode, mtime: now, atime: now, ctime: now, birthtime: now }
    }

    fn stat(&self) -> FileStat {
        FileStat {
            is_file: false,
            is_dir: true,
            size: 0,
            mode: self.mode,
            mtime: self.mtime,
            atime: self.atime,
            ctime: self.ctime,
            birthtime: self.birthtime,
        }
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, FsError> {
    serde_json::to_vec(record).map_err(|e| FsError::Io(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, FsError> {
    serde_json::from_slice(bytes).map_err(|e| FsError::Io(e.to_string()))
}

/// Remainder of `key` after the `parent` prefix, when `key` is a direct
/// child of `parent`
fn direct_child_name<'a>(parent: &str, key: &'a str) -> Option<&'a str> {
    if key == parent || !is_inside(parent, key) {
        return None;
    }
    let rest = if parent == "/" { &key[1..] } else { &key[parent.len() + 1..] };
    if rest.is_empty() || rest.contains('/') { None } else { Some(rest) }
}

// ============================================================================
// Backend
// ============================================================================

/// Persistent backend over an indexed key-value store
pub struct KvBackend {
    store: Box<dyn KvStore>,
}

impl KvBackend {
    pub fn new(store: Box<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn file_record(&self, path: &str) -> Result<Option<FileRecord>, FsError> {
        match self.store.get(StoreKind::Files, path).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn dir_record(&self, path: &str) -> Result<Option<DirRecord>, FsError> {
        match self.store.get(StoreKind::Directories, path).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_file_record(&self, path: &str, record: &FileRecord) -> Result<(), FsError> {
        self.store.put(StoreKind::Files, path, &encode(record)?).await
    }

    async fn put_dir_record(&self, path: &str, record: &DirRecord) -> Result<(), FsError> {
        self.store.put(StoreKind::Directories, path, &encode(record)?).await
    }

    /// Refresh a directory's mtime after a child add/remove
    async fn touch_dir_mtime(&self, path: &str, now: u64) -> Result<(), FsError> {
        if let Some(mut record) = self.dir_record(path).await? {
            record.mtime = now;
            self.put_dir_record(path, &record).await?;
        }
        Ok(())
    }

    /// Ensure the parent chain of `path` exists as directory records
    async fn ensure_parents(&self, path: &str, now: u64) -> Result<(), FsError> {
        for ancestor in crate::path::get_ancestors(&dirname(path)) {
            if self.dir_record(&ancestor).await?.is_none() {
                if self.file_record(&ancestor).await?.is_some() {
                    return Err(FsError::NotADirectory);
                }
                self.put_dir_record(&ancestor, &DirRecord::new(DEFAULT_DIR_MODE, now)).await?;
            }
        }
        Ok(())
    }

    /// Parent must already exist as a directory
    async fn require_parent(&self, path: &str) -> Result<(), FsError> {
        let parent = dirname(path);
        if self.dir_record(&parent).await?.is_none() {
            if self.file_record(&parent).await?.is_some() {
                return Err(FsError::NotADirectory);
            }
            return Err(FsError::NotFound);
        }
        Ok(())
    }

    /// All file and directory keys strictly under `path`
    async fn subtree_keys(&self, path: &str) -> Result<(Vec<String>, Vec<String>), FsError> {
        let files = self
            .store
            .keys(StoreKind::Files)
            .await?
            .into_iter()
            .filter(|k| k != path && is_inside(path, k))
            .collect();
        let dirs = self
            .store
            .keys(StoreKind::Directories)
            .await?
            .into_iter()
            .filter(|k| k != path && is_inside(path, k))
            .collect();
        Ok((files, dirs))
    }
}

#[async_trait(?Send)]
impl FsBackend for KvBackend {
    fn name(&self) -> &str {
        "kvfs"
    }

    fn caps(&self) -> BackendCaps {
        BackendCaps {
            persistent: true,
            sync_access: false,
            watchable: false,
            max_file_size: 0,
            max_storage: 0,
        }
    }

    async fn init(&self) -> Result<(), FsError> {
        // Root must always exist as a dir record.
        if self.dir_record("/").await?.is_none() {
            self.put_dir_record("/", &DirRecord::new(DEFAULT_DIR_MODE, now_ms())).await?;
        }
        Ok(())
    }

    async fn destroy(&self) -> Result<(), FsError> {
        self.store.clear().await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        match self.file_record(path).await? {
            Some(mut record) => {
                record.atime = now_ms();
                self.put_file_record(path, &record).await?;
                Ok(record.data)
            }
            None => {
                if self.dir_record(path).await?.is_some() {
                    Err(FsError::IsADirectory)
                } else {
                    Err(FsError::NotFound)
                }
            }
        }
    }

    async fn write_file(&self, path: &str, data: &[u8], opts: &WriteOptions) -> Result<(), FsError> {
        if self.dir_record(path).await?.is_some() {
            return Err(FsError::IsADirectory);
        }
        let now = now_ms();
        if opts.create_parents {
            self.ensure_parents(path, now).await?;
        } else {
            self.require_parent(path).await?;
        }

        let record = match self.file_record(path).await? {
            Some(mut existing) => {
                existing.data = data.to_vec();
                existing.mtime = now;
                existing.atime = now;
                existing
            }
            None => {
                let record = FileRecord::new(data.to_vec(), opts.mode.unwrap_or(DEFAULT_FILE_MODE), now);
                self.touch_dir_mtime(&dirname(path), now).await?;
                record
            }
        };
        self.put_file_record(path, &record).await
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        if self.file_record(path).await?.is_none() {
            if self.dir_record(path).await?.is_some() {
                return Err(FsError::IsADirectory);
            }
            return Err(FsError::NotFound);
        }
        self.store.delete(StoreKind::Files, path).await?;
        self.touch_dir_mtime(&dirname(path), now_ms()).await
    }

    async fn mkdir(&self, path: &str, opts: &MkdirOptions) -> Result<(), FsError> {
        if path == "/" {
            return Ok(());
        }
        if self.dir_record(path).await?.is_some() {
            return Ok(());
        }
        if self.file_record(path).await?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let now = now_ms();
        if opts.recursive {
            self.ensure_parents(path, now).await?;
        } else {
            self.require_parent(path).await?;
        }
        self.put_dir_record(path, &DirRecord::new(opts.mode.unwrap_or(DEFAULT_DIR_MODE), now)).await?;
        self.touch_dir_mtime(&dirname(path), now).await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        if path == "/" {
            return Err(FsError::InvalidPath);
        }
        if self.dir_record(path).await?.is_none() {
            if self.file_record(path).await?.is_some() {
                return Err(FsError::NotADirectory);
            }
            return Err(FsError::NotFound);
        }

        let (files, mut dirs) = self.subtree_keys(path).await?;
        if !recursive && (!files.is_empty() || !dirs.is_empty()) {
            return Err(FsError::DirectoryNotEmpty);
        }

        // Files first, then directories deepest-first.
        for key in &files {
            self.store.delete(StoreKind::Files, key).await?;
        }
        dirs.sort_by_key(|k| std::cmp::Reverse(k.len()));
        for key in &dirs {
            self.store.delete(StoreKind::Directories, key).await?;
        }
        self.store.delete(StoreKind::Directories, path).await?;
        self.touch_dir_mtime(&dirname(path), now_ms()).await
    }

    async fn readdir_with_types(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let mut record = match self.dir_record(path).await? {
            Some(record) => record,
            None => {
                if self.file_record(path).await?.is_some() {
                    return Err(FsError::NotADirectory);
                }
                return Err(FsError::NotFound);
            }
        };

        let mut entries = Vec::new();
        for key in self.store.keys(StoreKind::Directories).await? {
            if let Some(name) = direct_child_name(path, &key) {
                entries.push(DirEntry::dir(name));
            }
        }
        for key in self.store.keys(StoreKind::Files).await? {
            if let Some(name) = direct_child_name(path, &key) {
                entries.push(DirEntry::file(name));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        record.atime = now_ms();
        self.put_dir_record(path, &record).await?;
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        if let Some(record) = self.file_record(path).await? {
            return Ok(record.stat());
        }
        if let Some(record) = self.dir_record(path).await? {
            return Ok(record.stat());
        }
        Err(FsError::NotFound)
    }

    async fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        if old == "/" || new == "/" {
            return Err(FsError::InvalidPath);
        }
        let now = now_ms();

        if let Some(mut record) = self.file_record(old).await? {
            self.require_parent(new).await?;
            if self.dir_record(new).await?.is_some() {
                return Err(FsError::IsADirectory);
            }
            record.ctime = now;
            self.put_file_record(new, &record).await?;
            self.store.delete(StoreKind::Files, old).await?;
            self.touch_dir_mtime(&dirname(old), now).await?;
            return self.touch_dir_mtime(&dirname(new), now).await;
        }

        let Some(mut top) = self.dir_record(old).await? else {
            return Err(FsError::NotFound);
        };
        self.require_parent(new).await?;
        if self.file_record(new).await?.is_some() {
            return Err(FsError::NotADirectory);
        }

        // Copy every record to the new prefix, then remove the old subtree.
        // Not an atomic rekey: a successful return implies both halves done.
        let (files, dirs) = self.subtree_keys(old).await?;
        top.ctime = now;
        self.put_dir_record(new, &top).await?;
        for key in &dirs {
            if let Some(record) = self.dir_record(key).await? {
                let moved = format!("{new}{}", &key[old.len()..]);
                self.put_dir_record(&moved, &record).await?;
            }
        }
        for key in &files {
            if let Some(record) = self.file_record(key).await? {
                let moved = format!("{new}{}", &key[old.len()..]);
                self.put_file_record(&moved, &record).await?;
            }
        }

        for key in &files {
            self.store.delete(StoreKind::Files, key).await?;
        }
        let mut dirs = dirs;
        dirs.sort_by_key(|k| std::cmp::Reverse(k.len()));
        for key in &dirs {
            self.store.delete(StoreKind::Directories, key).await?;
        }
        self.store.delete(StoreKind::Directories, old).await?;
        self.touch_dir_mtime(&dirname(old), now).await?;
        self.touch_dir_mtime(&dirname(new), now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn backend() -> KvBackend {
        let backend = KvBackend::new(Box::new(MemoryKvStore::new()));
        block_on(backend.init()).unwrap();
        backend
    }

    #[test]
    fn test_root_exists_after_init() {
        let fs = backend();
        block_on(async {
            let stat = fs.stat("/").await.unwrap();
            assert!(stat.is_dir);
        });
    }

    #[test]
    fn test_write_read_roundtrip() {
        let fs = backend();
        block_on(async {
            fs.write_file("/a.bin", &[0, 159, 146, 150], &WriteOptions::default()).await.unwrap();
            assert_eq!(fs.read_file("/a.bin").await.unwrap(), vec![0, 159, 146, 150]);
        });
    }

    #[test]
    fn test_direct_children_only() {
        let fs = backend();
        block_on(async {
            let recursive = MkdirOptions { recursive: true, ..Default::default() };
            fs.mkdir("/x/sub/deeper", &recursive).await.unwrap();
            fs.write_file("/x/file.txt", b"1", &WriteOptions::default()).await.unwrap();
            fs.write_file("/x/sub/nested.txt", b"2", &WriteOptions::default()).await.unwrap();

            let names = fs.readdir("/x").await.unwrap();
            assert_eq!(names, vec!["file.txt", "sub"]);
        });
    }

    #[test]
    fn test_sibling_prefix_not_a_child() {
        let fs = backend();
        block_on(async {
            fs.mkdir("/ab", &MkdirOptions::default()).await.unwrap();
            fs.mkdir("/abc", &MkdirOptions::default()).await.unwrap();
            let names = fs.readdir("/ab").await.unwrap();
            assert!(names.is_empty());
        });
    }

    #[test]
    fn test_mkdir_missing_parent() {
        let fs = backend();
        block_on(async {
            assert_eq!(
                fs.mkdir("/a/b/c", &MkdirOptions::default()).await.unwrap_err(),
                FsError::NotFound
            );
        });
    }

    #[test]
    fn test_recursive_rmdir_clears_subtree() {
        let fs = backend();
        block_on(async {
            let opts = WriteOptions { create_parents: true, ..Default::default() };
            fs.write_file("/t/a/one.txt", b"1", &opts).await.unwrap();
            fs.write_file("/t/a/b/two.txt", b"2", &opts).await.unwrap();

            assert_eq!(fs.rmdir("/t", false).await.unwrap_err(), FsError::DirectoryNotEmpty);
            fs.rmdir("/t", true).await.unwrap();
            assert!(!fs.exists("/t").await.unwrap());
            assert!(!fs.exists("/t/a/b/two.txt").await.unwrap());
        });
    }

    #[test]
    fn test_rmdir_root_is_invalid() {
        let fs = backend();
        block_on(async {
            assert_eq!(fs.rmdir("/", true).await.unwrap_err(), FsError::InvalidPath);
        });
    }

    #[test]
    fn test_directory_rename_moves_both_halves() {
        let fs = backend();
        block_on(async {
            let opts = WriteOptions { create_parents: true, ..Default::default() };
            fs.write_file("/old/a/f.txt", b"data", &opts).await.unwrap();
            fs.rename("/old", "/moved").await.unwrap();

            assert!(!fs.exists("/old").await.unwrap());
            assert!(!fs.exists("/old/a/f.txt").await.unwrap());
            assert!(fs.stat("/moved/a").await.unwrap().is_dir);
            assert_eq!(fs.read_file("/moved/a/f.txt").await.unwrap(), b"data");
        });
    }

    #[test]
    fn test_read_errors() {
        let fs = backend();
        block_on(async {
            fs.mkdir("/d", &MkdirOptions::default()).await.unwrap();
            assert_eq!(fs.read_file("/d").await.unwrap_err(), FsError::IsADirectory);
            assert_eq!(fs.read_file("/missing").await.unwrap_err(), FsError::NotFound);
        });
    }

    #[test]
    fn test_readdir_on_file() {
        let fs = backend();
        block_on(async {
            fs.write_file("/f", b"x", &WriteOptions::default()).await.unwrap();
            assert_eq!(fs.readdir("/f").await.unwrap_err(), FsError::NotADirectory);
        });
    }

    #[test]
    fn test_overwrite_preserves_birthtime() {
        let fs = backend();
        block_on(async {
            fs.write_file("/f", b"one", &WriteOptions::default()).await.unwrap();
            let before = fs.stat("/f").await.unwrap();
            fs.write_file("/f", "二".as_bytes(), &WriteOptions::default()).await.unwrap();
            let after = fs.stat("/f").await.unwrap();
            assert_eq!(before.birthtime, after.birthtime);
            assert_eq!(before.ctime, after.ctime);
        });
    }

    #[test]
    fn test_destroy_clears_stores() {
        let fs = backend();
        block_on(async {
            fs.write_file("/f", b"x", &WriteOptions::default()).await.unwrap();
            fs.destroy().await.unwrap();
            assert_eq!(fs.stat("/f").await.unwrap_err(), FsError::NotFound);
            assert_eq!(fs.stat("/").await.unwrap_err(), FsError::NotFound);
            // init restores the root record
            fs.init().await.unwrap();
            assert!(fs.stat("/").await.unwrap().is_dir);
        });
    }
}
