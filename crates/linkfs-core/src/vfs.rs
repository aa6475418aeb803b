//! Filesystem front end for linkfs core

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::directory::{DirectoryTable, InMemoryDirectoryTable};
use crate::error::{FsError, FsResult};
use crate::links::LinkManager;
use crate::storage::{InMemoryInodeStore, InodeStore};
use crate::walker::PathWalker;
use crate::{DirEntry, FsConfig, FsStats, HandleId, InodeId, InodeKind, Metadata, OpenOptions};

// Attempts at winning or observing a contended O_CREATE before giving up
const CREATE_ATTEMPTS: usize = 16;

/// Open file handle
#[derive(Debug)]
struct Handle {
    node: InodeId,
    position: u64,
    options: OpenOptions,
}

/// The main filesystem core implementation
///
/// Relative paths given directly to `FsCore` resolve from the root. Callers
/// that need a current directory of their own work through a [`Session`].
pub struct FsCore {
    config: FsConfig,
    inodes: Arc<dyn InodeStore>,
    dirs: Arc<dyn DirectoryTable>,
    root: InodeId,
    handles: Mutex<HashMap<HandleId, Arc<Mutex<Handle>>>>,
    next_handle_id: Mutex<u64>,
}

/// One caller's view of an `FsCore`, carrying its own current directory.
/// Handles opened through a session belong to the shared handle table.
pub struct Session<'a> {
    fs: &'a FsCore,
    cwd: InodeId,
}

impl FsCore {
    pub fn new(config: FsConfig) -> FsResult<Self> {
        let inodes: Arc<dyn InodeStore> =
            Arc::new(InMemoryInodeStore::with_capacity_limit(config.limits.max_inodes));
        let dirs: Arc<dyn DirectoryTable> = Arc::new(InMemoryDirectoryTable::new());
        Self::with_backends(config, inodes, dirs)
    }

    /// Build a filesystem on top of caller-provided collaborators. A fresh root
    /// directory is allocated in `inodes`.
    pub fn with_backends(
        config: FsConfig,
        inodes: Arc<dyn InodeStore>,
        dirs: Arc<dyn DirectoryTable>,
    ) -> FsResult<Self> {
        let root = inodes.alloc(InodeKind::Directory)?;
        inodes.add_link(root)?;
        dirs.create(root, root)?;
        debug!("created root directory {}", root);

        Ok(Self {
            config,
            inodes,
            dirs,
            root,
            handles: Mutex::new(HashMap::new()),
            next_handle_id: Mutex::new(1),
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn root(&self) -> InodeId {
        self.root
    }

    /// Start a session whose current directory is the root
    pub fn session(&self) -> Session<'_> {
        Session {
            fs: self,
            cwd: self.root,
        }
    }

    fn walker(&self) -> PathWalker<'_> {
        PathWalker::new(&*self.inodes, &*self.dirs, self.root, &self.config.limits)
    }

    fn links(&self) -> LinkManager<'_> {
        LinkManager::new(&*self.inodes, &*self.dirs, self.root, &self.config.limits)
    }

    fn allocate_handle_id(&self) -> HandleId {
        let mut next_id = self.next_handle_id.lock().unwrap();
        let id = HandleId::new(*next_id);
        *next_id += 1;
        id
    }

    fn handle(&self, handle_id: HandleId) -> FsResult<Arc<Mutex<Handle>>> {
        let handles = self.handles.lock().unwrap();
        handles.get(&handle_id).cloned().ok_or(FsError::BadHandle)
    }

    // Namespace operations

    /// Create a symlink at `link_path` holding `target`, returning the new
    /// link's inode
    pub fn symlink(&self, target: &Path, link_path: &Path) -> FsResult<InodeId> {
        self.session().symlink(target, link_path)
    }

    pub fn link(&self, existing: &Path, new_path: &Path) -> FsResult<()> {
        self.session().link(existing, new_path)
    }

    pub fn unlink(&self, path: &Path) -> FsResult<()> {
        self.session().unlink(path)
    }

    pub fn mkdir(&self, path: &Path) -> FsResult<()> {
        self.session().mkdir(path)
    }

    // Metadata operations
    pub fn stat(&self, path: &Path) -> FsResult<Metadata> {
        self.session().stat(path)
    }

    /// Metadata of the final component itself, never following a symlink there
    pub fn stat_no_follow(&self, path: &Path) -> FsResult<Metadata> {
        self.session().stat_no_follow(path)
    }

    pub fn readlink(&self, path: &Path) -> FsResult<String> {
        self.session().readlink(path)
    }

    pub fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        self.session().readdir(path)
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            live_inodes: self.inodes.live_count(),
            open_handles: self.handles.lock().unwrap().len(),
        }
    }

    // Handle operations
    pub fn open(&self, path: &Path, opts: &OpenOptions) -> FsResult<HandleId> {
        self.session().open(path, opts)
    }

    fn register_handle(&self, node: InodeId, opts: &OpenOptions) -> FsResult<HandleId> {
        let mut handles = self.handles.lock().unwrap();
        if handles.len() >= self.config.limits.max_open_handles as usize {
            return Err(FsError::TooManyOpenFiles);
        }

        self.inodes.pin(node)?;
        let handle_id = self.allocate_handle_id();
        handles.insert(
            handle_id,
            Arc::new(Mutex::new(Handle {
                node,
                position: 0,
                options: opts.clone(),
            })),
        );
        Ok(handle_id)
    }

    pub fn fstat(&self, handle_id: HandleId) -> FsResult<Metadata> {
        let handle = self.handle(handle_id)?;
        let node = handle.lock().unwrap().node;
        self.inodes.metadata(node)
    }

    /// Read from the handle's cursor, advancing it
    pub fn read(&self, handle_id: HandleId, buf: &mut [u8]) -> FsResult<usize> {
        let handle = self.handle(handle_id)?;
        let mut handle = handle.lock().unwrap();

        if !handle.options.read {
            return Err(FsError::AccessDenied);
        }
        if self.inodes.metadata(handle.node)?.kind == InodeKind::Directory {
            return Err(FsError::IsADirectory);
        }

        let n = self.inodes.read(handle.node, handle.position, buf)?;
        handle.position += n as u64;
        Ok(n)
    }

    /// Write at the handle's cursor, advancing it
    pub fn write(&self, handle_id: HandleId, data: &[u8]) -> FsResult<usize> {
        let handle = self.handle(handle_id)?;
        let mut handle = handle.lock().unwrap();

        if !handle.options.write {
            return Err(FsError::AccessDenied);
        }
        match self.inodes.metadata(handle.node)?.kind {
            InodeKind::File => {}
            InodeKind::Directory => return Err(FsError::IsADirectory),
            InodeKind::Symlink => return Err(FsError::InvalidArgument),
        }

        let written = self.inodes.write(handle.node, handle.position, data)?;
        handle.position += written as u64;
        Ok(written)
    }

    pub fn close(&self, handle_id: HandleId) -> FsResult<()> {
        let handle = self
            .handles
            .lock()
            .unwrap()
            .remove(&handle_id)
            .ok_or(FsError::BadHandle)?;

        let node = handle.lock().unwrap().node;
        self.inodes.unpin(node)
    }
}

impl<'a> Session<'a> {
    pub fn fs(&self) -> &'a FsCore {
        self.fs
    }

    pub fn cwd(&self) -> InodeId {
        self.cwd
    }

    fn resolve(&self, path: &Path, follow_final: bool) -> FsResult<InodeId> {
        let walker = self.fs.walker();
        let mut ctx = walker.context();
        walker.resolve(&mut ctx, self.cwd, path, follow_final)
    }

    /// Change the directory this session resolves relative paths from
    pub fn chdir(&mut self, path: &Path) -> FsResult<()> {
        let dir = self.resolve(path, true)?;
        self.fs.walker().require_dir(dir)?;
        trace!("session cwd {} -> {}", self.cwd, dir);
        self.cwd = dir;
        Ok(())
    }

    pub fn symlink(&self, target: &Path, link_path: &Path) -> FsResult<InodeId> {
        let target = target.to_str().ok_or(FsError::InvalidArgument)?;
        self.fs.links().create_symlink(self.cwd, target, link_path)
    }

    pub fn link(&self, existing: &Path, new_path: &Path) -> FsResult<()> {
        self.fs.links().link(self.cwd, existing, new_path)
    }

    pub fn unlink(&self, path: &Path) -> FsResult<()> {
        self.fs.links().unlink(self.cwd, path)
    }

    pub fn mkdir(&self, path: &Path) -> FsResult<()> {
        self.fs.links().mkdir(self.cwd, path)?;
        Ok(())
    }

    pub fn stat(&self, path: &Path) -> FsResult<Metadata> {
        let node = self.resolve(path, true)?;
        self.fs.inodes.metadata(node)
    }

    pub fn stat_no_follow(&self, path: &Path) -> FsResult<Metadata> {
        let node = self.resolve(path, false)?;
        self.fs.inodes.metadata(node)
    }

    pub fn readlink(&self, path: &Path) -> FsResult<String> {
        let node = self.resolve(path, false)?;
        self.fs.walker().read_target(node)
    }

    pub fn readdir(&self, path: &Path) -> FsResult<Vec<DirEntry>> {
        let node = self.resolve(path, true)?;
        self.fs.walker().require_dir(node)?;

        let mut entries = Vec::new();
        for (name, ino) in self.fs.dirs.entries(node)? {
            // Entries unlinked since the listing was taken are skipped
            let Ok(meta) = self.fs.inodes.metadata(ino) else {
                continue;
            };
            entries.push(DirEntry {
                name,
                ino,
                kind: meta.kind,
            });
        }
        Ok(entries)
    }

    pub fn open(&self, path: &Path, opts: &OpenOptions) -> FsResult<HandleId> {
        let node = self.resolve_for_open(path, opts)?;
        let meta = self.fs.inodes.metadata(node)?;
        if meta.kind == InodeKind::Directory && (opts.write || opts.truncate) {
            return Err(FsError::IsADirectory);
        }

        let handle_id = self.fs.register_handle(node, opts)?;

        if opts.truncate && opts.write && meta.kind == InodeKind::File {
            if let Err(e) = self.fs.inodes.truncate(node, 0) {
                self.fs.close(handle_id)?;
                return Err(e);
            }
        }

        trace!("opened {} as {:?} ({})", path.display(), handle_id, node);
        Ok(handle_id)
    }

    fn resolve_for_open(&self, path: &Path, opts: &OpenOptions) -> FsResult<InodeId> {
        let walker = self.fs.walker();
        let mut ctx = walker.context();
        if !opts.create {
            return walker.resolve(&mut ctx, self.cwd, path, !opts.nofollow);
        }

        let (dir, name) = walker.resolve_parent(&mut ctx, self.cwd, path)?;
        for _ in 0..CREATE_ATTEMPTS {
            match self.fs.dirs.lookup(dir, &name)? {
                Some(node) => {
                    let kind = match self.fs.inodes.metadata(node) {
                        Ok(meta) => meta.kind,
                        Err(FsError::NotFound) => continue,
                        Err(e) => return Err(e),
                    };
                    if kind == InodeKind::Symlink && !opts.nofollow {
                        return walker.follow(&mut ctx, dir, node);
                    }
                    return Ok(node);
                }
                None => {
                    if let Some(node) = self.fs.links().create_file(dir, &name)? {
                        return Ok(node);
                    }
                }
            }
        }

        debug!("gave up creating {} after {} attempts", path.display(), CREATE_ATTEMPTS);
        Err(FsError::AlreadyExists)
    }
}
