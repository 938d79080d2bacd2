//! Persistent Directory-Handle Backend
//!
//! Backend over a native directory-handle API: each directory handle yields
//! child file or directory handles by name, each writable through a
//! short-lived writer. The API stores no mtime or mode, so a parallel
//! metadata sidecar file named `.bavini_meta_<name>` lives inside each
//! directory, one per entry, holding a JSON-encoded timestamp/mode record.
//! The reserved prefix is a contract: sidecars never appear in listings,
//! cannot be statted directly, and user filenames carrying the prefix are
//! rejected as invalid. The embedding front-end binds [`DirHandle`] /
//! [`FileHandle`] to the File System Access API; [`MemoryDirHandle`] is the
//! in-process reference driver used by the test suite.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spinning_top::Spinlock;

use super::{
    BackendCaps, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE, DirEntry, FileStat, FsBackend, FsError,
    MkdirOptions, WriteOptions,
};
use crate::clock::now_ms;
use crate::path::{basename, dirname};

/// Reserved sidecar name prefix. Never surfaced, never user-creatable.
pub const META_PREFIX: &str = ".bavini_meta_";

// ============================================================================
// Driver Traits
// ============================================================================

/// Kind of entry a directory handle reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    File,
    Directory,
}

/// A handle to a single file
#[async_trait(?Send)]
pub trait FileHandle {
    async fn read(&self) -> Result<Vec<u8>, FsError>;
    async fn write(&self, data: &[u8]) -> Result<(), FsError>;
    async fn size(&self) -> Result<u64, FsError>;
}

/// A handle to a single directory.
///
/// `get_dir` / `get_file` fail with `NotFound` when the entry is absent and
/// `create` is false, and with `NotADirectory` / `IsADirectory` when the
/// entry exists with the other kind.
#[async_trait(?Send)]
pub trait DirHandle {
    /// Cheap second handle to the same directory
    fn duplicate(&self) -> Box<dyn DirHandle>;

    async fn get_dir(&self, name: &str, create: bool) -> Result<Box<dyn DirHandle>, FsError>;
    async fn get_file(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>, FsError>;

    /// Remove a child entry; a non-empty directory requires `recursive`
    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), FsError>;

    /// All child entries, sidecars included, in unspecified order
    async fn entries(&self) -> Result<Vec<(String, HandleKind)>, FsError>;
}

// ============================================================================
// In-Memory Reference Driver
// ============================================================================

enum HNode {
    File(Vec<u8>),
    Dir(BTreeMap<String, Rc<RefCell<HNode>>>),
}

/// Reference driver: an in-process tree with handle semantics
pub struct MemoryDirHandle {
    node: Rc<RefCell<HNode>>,
}

pub struct MemoryFileHandle {
    node: Rc<RefCell<HNode>>,
}

impl MemoryDirHandle {
    pub fn new() -> Self {
        Self { node: Rc::new(RefCell::new(HNode::Dir(BTreeMap::new()))) }
    }
}

impl Default for MemoryDirHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl DirHandle for MemoryDirHandle {
    fn duplicate(&self) -> Box<dyn DirHandle> {
        Box::new(MemoryDirHandle { node: Rc::clone(&self.node) })
    }

    async fn get_dir(&self, name: &str, create: bool) -> Result<Box<dyn DirHandle>, FsError> {
        let mut node = self.node.borrow_mut();
        let HNode::Dir(children) = &mut *node else {
            return Err(FsError::NotADirectory);
        };
        match children.get(name) {
            Some(child) => match &*child.borrow() {
                HNode::Dir(_) => Ok(Box::new(MemoryDirHandle { node: Rc::clone(child) })),
                HNode::File(_) => Err(FsError::NotADirectory),
            },
            None if create => {
                let child = Rc::new(RefCell::new(HNode::Dir(BTreeMap::new())));
                children.insert(String::from(name), Rc::clone(&child));
                Ok(Box::new(MemoryDirHandle { node: child }))
            }
            None => Err(FsError::NotFound),
        }
    }

    async fn get_file(&self, name: &str, create: bool) -> Result<Box<dyn FileHandle>, FsError> {
        let mut node = self.node.borrow_mut();
        let HNode::Dir(children) = &mut *node else {
            return Err(FsError::NotADirectory);
        };
        match children.get(name) {
            Some(child) => match &*child.borrow() {
                HNode::File(_) => Ok(Box::new(MemoryFileHandle { node: Rc::clone(child) })),
                HNode::Dir(_) => Err(FsError::IsADirectory),
            },
            None if create => {
                let child = Rc::new(RefCell::new(HNode::File(Vec::new())));
                children.insert(String::from(name), Rc::clone(&child));
                Ok(Box::new(MemoryFileHandle { node: child }))
            }
            None => Err(FsError::NotFound),
        }
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<(), FsError> {
        let mut node = self.node.borrow_mut();
        let HNode::Dir(children) = &mut *node else {
            return Err(FsError::NotADirectory);
        };
        match children.get(name) {
            Some(child) => {
                if let HNode::Dir(grandchildren) = &*child.borrow() {
                    if !grandchildren.is_empty() && !recursive {
                        return Err(FsError::DirectoryNotEmpty);
                    }
                }
                children.remove(name);
                Ok(())
            }
            None => Err(FsError::NotFound),
        }
    }

    async fn entries(&self) -> Result<Vec<(String, HandleKind)>, FsError> {
        let node = self.node.borrow();
        let HNode::Dir(children) = &*node else {
            return Err(FsError::NotADirectory);
        };
        Ok(children
            .iter()
            .map(|(name, child)| {
                let kind = match &*child.borrow() {
                    HNode::File(_) => HandleKind::File,
                    HNode::Dir(_) => HandleKind::Directory,
                };
                (name.clone(), kind)
            })
            .collect())
    }
}

#[async_trait(?Send)]
impl FileHandle for MemoryFileHandle {
    async fn read(&self) -> Result<Vec<u8>, FsError> {
        match &*self.node.borrow() {
            HNode::File(data) => Ok(data.clone()),
            HNode::Dir(_) => Err(FsError::IsADirectory),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), FsError> {
        match &mut *self.node.borrow_mut() {
            HNode::File(existing) => {
                *existing = data.to_vec();
                Ok(())
            }
            HNode::Dir(_) => Err(FsError::IsADirectory),
        }
    }

    async fn size(&self) -> Result<u64, FsError> {
        match &*self.node.borrow() {
            HNode::File(data) => Ok(data.len() as u64),
            HNode::Dir(_) => Err(FsError::IsADirectory),
        }
    }
}

// ============================================================================
// Sidecar Metadata
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SidecarMeta {
    mode: u32,
    mtime: u64,
    atime: u64,
    ctime: u64,
    birthtime: u64,
}

impl SidecarMeta {
    fn new(mode: u32, now: u64) -> Self {
        Self { mode, mtime: now, atime: now, ctime: now, birthtime: now }
    }
}

fn meta_name(name: &str) -> String {
    format!("{META_PREFIX}{name}")
}

async fn read_meta(dir: &dyn DirHandle, name: &str) -> Result<Option<SidecarMeta>, FsError> {
    match dir.get_file(&meta_name(name), false).await {
        Ok(file) => {
            let bytes = file.read().await?;
            Ok(serde_json::from_slice(&bytes).ok())
        }
        Err(FsError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn write_meta(dir: &dyn DirHandle, name: &str, meta: &SidecarMeta) -> Result<(), FsError> {
    let bytes = serde_json::to_vec(meta).map_err(|e| FsError::Io(e.to_string()))?;
    let file = dir.get_file(&meta_name(name), true).await?;
    file.write(&bytes).await
}

async fn delete_meta(dir: &dyn DirHandle, name: &str) -> Result<(), FsError> {
    match dir.remove_entry(&meta_name(name), false).await {
        Ok(()) | Err(FsError::NotFound) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn kind_of(dir: &dyn DirHandle, name: &str) -> Result<Option<HandleKind>, FsError> {
    Ok(dir.entries().await?.into_iter().find(|(n, _)| n == name).map(|(_, k)| k))
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

// ============================================================================
// Backend
// ============================================================================

/// Persistent backend over a native directory-handle API
pub struct HandleBackend {
    root: Box<dyn DirHandle>,
    /// The root has no parent to hold its sidecar, so its metadata lives
    /// with the backend.
    root_meta: Spinlock<SidecarMeta>,
}

impl HandleBackend {
    pub fn new(root: Box<dyn DirHandle>) -> Self {
        Self { root, root_meta: Spinlock::new(SidecarMeta::new(DEFAULT_DIR_MODE, now_ms())) }
    }

    /// Reject any path containing a reserved sidecar name
    fn check_reserved(path: &str) -> Result<(), FsError> {
        if components(path).iter().any(|c| c.starts_with(META_PREFIX)) {
            return Err(FsError::InvalidPath);
        }
        Ok(())
    }

    /// Walk to the directory at `path`. Intermediate files surface as
    /// `NotFound` (the path does not exist); a trailing file keeps the
    /// driver's `NotADirectory`.
    async fn resolve_dir(&self, path: &str) -> Result<Box<dyn DirHandle>, FsError> {
        let parts = components(path);
        let mut current = self.root.duplicate();
        let last = parts.len().saturating_sub(1);
        for (i, part) in parts.iter().enumerate() {
            current = current.get_dir(part, false).await.map_err(|e| {
                if i < last && e == FsError::NotADirectory { FsError::NotFound } else { e }
            })?;
        }
        Ok(current)
    }

    /// Walk to the parent directory of `path`, optionally creating missing
    /// ancestors (with fresh sidecars), returning the handle and final name.
    async fn resolve_parent(
        &self,
        path: &str,
        create: bool,
        now: u64,
    ) -> Result<(Box<dyn DirHandle>, String), FsError> {
        let name = basename(path);
        if name.is_empty() {
            return Err(FsError::InvalidPath);
        }
        let parent = dirname(path);
        let mut current = self.root.duplicate();
        for part in components(&parent) {
            if create && kind_of(&*current, part).await?.is_none() {
                let child = current.get_dir(part, true).await?;
                write_meta(&*current, part, &SidecarMeta::new(DEFAULT_DIR_MODE, now)).await?;
                current = child;
            } else {
                current = current.get_dir(part, false).await?;
            }
        }
        Ok((current, name))
    }

    /// Refresh a directory's mtime after a child add/remove
    async fn touch_dir_meta(&self, dir_path: &str, now: u64) -> Result<(), FsError> {
        if components(dir_path).is_empty() {
            self.root_meta.lock().mtime = now;
            return Ok(());
        }
        let (parent, name) = self.resolve_parent(dir_path, false, now).await?;
        let mut meta = read_meta(&*parent, &name)
            .await?
            .unwrap_or_else(|| SidecarMeta::new(DEFAULT_DIR_MODE, now));
        meta.mtime = now;
        write_meta(&*parent, &name, &meta).await
    }

    /// Non-sidecar children of a directory handle
    async fn visible_entries(dir: &dyn DirHandle) -> Result<Vec<(String, HandleKind)>, FsError> {
        Ok(dir
            .entries()
            .await?
            .into_iter()
            .filter(|(name, _)| !name.starts_with(META_PREFIX))
            .collect())
    }
}

/// Recursively copy `src` into `dest`, sidecars rewritten per entry
fn copy_tree<'a>(
    src: &'a dyn DirHandle,
    dest: &'a dyn DirHandle,
    now: u64,
) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + 'a>> {
    Box::pin(async move {
        for (name, kind) in HandleBackend::visible_entries(src).await? {
            let mut meta = read_meta(src, &name)
                .await?
                .unwrap_or_else(|| SidecarMeta::new(DEFAULT_FILE_MODE, now));
            meta.ctime = now;
            match kind {
                HandleKind::File => {
                    let data = src.get_file(&name, false).await?.read().await?;
                    dest.get_file(&name, true).await?.write(&data).await?;
                }
                HandleKind::Directory => {
                    let src_child = src.get_dir(&name, false).await?;
                    let dest_child = dest.get_dir(&name, true).await?;
                    copy_tree(&*src_child, &*dest_child, now).await?;
                }
            }
            write_meta(dest, &name, &meta).await?;
        }
        Ok(())
    })
}

#[async_trait(?Send)]
impl FsBackend for HandleBackend {
    fn name(&self) -> &str {
        "handlefs"
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
        Ok(())
    }

    async fn destroy(&self) -> Result<(), FsError> {
        for (name, _) in self.root.entries().await? {
            self.root.remove_entry(&name, true).await?;
        }
        *self.root_meta.lock() = SidecarMeta::new(DEFAULT_DIR_MODE, now_ms());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        Self::check_reserved(path)?;
        let now = now_ms();
        let (parent, name) = self.resolve_parent(path, false, now).await?;
        match kind_of(&*parent, &name).await? {
            Some(HandleKind::Directory) => return Err(FsError::IsADirectory),
            Some(HandleKind::File) => {}
            None => return Err(FsError::NotFound),
        }
        let data = parent.get_file(&name, false).await?.read().await?;
        if let Some(mut meta) = read_meta(&*parent, &name).await? {
            meta.atime = now;
            write_meta(&*parent, &name, &meta).await?;
        }
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8], opts: &WriteOptions) -> Result<(), FsError> {
        Self::check_reserved(path)?;
        let now = now_ms();
        let (parent, name) = self.resolve_parent(path, opts.create_parents, now).await?;

        let existing = kind_of(&*parent, &name).await?;
        if existing == Some(HandleKind::Directory) {
            return Err(FsError::IsADirectory);
        }

        let meta = match read_meta(&*parent, &name).await? {
            Some(mut meta) if existing.is_some() => {
                meta.mtime = now;
                meta.atime = now;
                meta
            }
            _ => SidecarMeta::new(opts.mode.unwrap_or(DEFAULT_FILE_MODE), now),
        };

        parent.get_file(&name, true).await?.write(data).await?;
        write_meta(&*parent, &name, &meta).await?;
        if existing.is_none() {
            self.touch_dir_meta(&dirname(path), now).await?;
        }
        Ok(())
    }

    async fn unlink(&self, path: &str) -> Result<(), FsError> {
        Self::check_reserved(path)?;
        let now = now_ms();
        let (parent, name) = self.resolve_parent(path, false, now).await?;
        match kind_of(&*parent, &name).await? {
            Some(HandleKind::File) => {}
            Some(HandleKind::Directory) => return Err(FsError::IsADirectory),
            None => return Err(FsError::NotFound),
        }
        parent.remove_entry(&name, false).await?;
        delete_meta(&*parent, &name).await?;
        self.touch_dir_meta(&dirname(path), now).await
    }

    async fn mkdir(&self, path: &str, opts: &MkdirOptions) -> Result<(), FsError> {
        Self::check_reserved(path)?;
        if components(path).is_empty() {
            return Ok(());
        }
        let now = now_ms();
        let (parent, name) = self.resolve_parent(path, opts.recursive, now).await?;
        match kind_of(&*parent, &name).await? {
            Some(HandleKind::Directory) => return Ok(()),
            Some(HandleKind::File) => return Err(FsError::AlreadyExists),
            None => {}
        }
        parent.get_dir(&name, true).await?;
        write_meta(&*parent, &name, &SidecarMeta::new(opts.mode.unwrap_or(DEFAULT_DIR_MODE), now)).await?;
        self.touch_dir_meta(&dirname(path), now).await
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<(), FsError> {
        Self::check_reserved(path)?;
        if components(path).is_empty() {
            return Err(FsError::InvalidPath);
        }
        let now = now_ms();
        let (parent, name) = self.resolve_parent(path, false, now).await?;
        match kind_of(&*parent, &name).await? {
            Some(HandleKind::Directory) => {}
            Some(HandleKind::File) => return Err(FsError::NotADirectory),
            None => return Err(FsError::NotFound),
        }

        if !recursive {
            let dir = parent.get_dir(&name, false).await?;
            if !Self::visible_entries(&*dir).await?.is_empty() {
                return Err(FsError::DirectoryNotEmpty);
            }
        }
        // Always recursive at the driver level: orphan sidecars inside an
        // otherwise-empty directory still need to go.
        parent.remove_entry(&name, true).await?;
        delete_meta(&*parent, &name).await?;
        self.touch_dir_meta(&dirname(path), now).await
    }

    async fn readdir_with_types(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        Self::check_reserved(path)?;
        let dir = self.resolve_dir(path).await?;
        let mut entries: Vec<DirEntry> = Self::visible_entries(&*dir)
            .await?
            .into_iter()
            .map(|(name, kind)| match kind {
                HandleKind::File => DirEntry::file(name),
                HandleKind::Directory => DirEntry::dir(name),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat, FsError> {
        Self::check_reserved(path)?;
        if components(path).is_empty() {
            let meta = *self.root_meta.lock();
            return Ok(FileStat {
                is_file: false,
                is_dir: true,
                size: 0,
                mode: meta.mode,
                mtime: meta.mtime,
                atime: meta.atime,
                ctime: meta.ctime,
                birthtime: meta.birthtime,
            });
        }

        let (parent, name) = self.resolve_parent(path, false, now_ms()).await?;
        let kind = kind_of(&*parent, &name).await?.ok_or(FsError::NotFound)?;
        let meta = read_meta(&*parent, &name).await?.unwrap_or_else(|| {
            SidecarMeta::new(
                match kind {
                    HandleKind::File => DEFAULT_FILE_MODE,
                    HandleKind::Directory => DEFAULT_DIR_MODE,
                },
                0,
            )
        });

        let size = match kind {
            HandleKind::File => parent.get_file(&name, false).await?.size().await?,
            HandleKind::Directory => 0,
        };
        Ok(FileStat {
            is_file: kind == HandleKind::File,
            is_dir: kind == HandleKind::Directory,
            size,
            mode: meta.mode,
            mtime: meta.mtime,
            atime: meta.atime,
            ctime: meta.ctime,
            birthtime: meta.birthtime,
        })
    }

    async fn rename(&self, old: &str, new: &str) -> Result<(), FsError> {
        Self::check_reserved(old)?;
        Self::check_reserved(new)?;
        if components(old).is_empty() || components(new).is_empty() {
            return Err(FsError::InvalidPath);
        }
        let now = now_ms();
        let (old_parent, old_name) = self.resolve_parent(old, false, now).await?;
        let kind = kind_of(&*old_parent, &old_name).await?.ok_or(FsError::NotFound)?;
        let (new_parent, new_name) = self.resolve_parent(new, false, now).await?;

        let mut meta = read_meta(&*old_parent, &old_name).await?.unwrap_or_else(|| {
            SidecarMeta::new(
                match kind {
                    HandleKind::File => DEFAULT_FILE_MODE,
                    HandleKind::Directory => DEFAULT_DIR_MODE,
                },
                now,
            )
        });
        meta.ctime = now;

        match kind {
            HandleKind::File => {
                if kind_of(&*new_parent, &new_name).await? == Some(HandleKind::Directory) {
                    return Err(FsError::IsADirectory);
                }
                let data = old_parent.get_file(&old_name, false).await?.read().await?;
                new_parent.get_file(&new_name, true).await?.write(&data).await?;
            }
            HandleKind::Directory => {
                if kind_of(&*new_parent, &new_name).await? == Some(HandleKind::File) {
                    return Err(FsError::NotADirectory);
                }
                let src = old_parent.get_dir(&old_name, false).await?;
                let dest = new_parent.get_dir(&new_name, true).await?;
                copy_tree(&*src, &*dest, now).await?;
            }
        }
        write_meta(&*new_parent, &new_name, &meta).await?;

        old_parent.remove_entry(&old_name, true).await?;
        delete_meta(&*old_parent, &old_name).await?;
        self.touch_dir_meta(&dirname(old), now).await?;
        self.touch_dir_meta(&dirname(new), now).await
    }
}
