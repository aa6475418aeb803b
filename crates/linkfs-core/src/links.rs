//! Namespace mutation: symlinks, hard links, directories and unlink.
//!
//! The manager holds no locks. `DirectoryTable::insert_if_absent` and
//! `DirectoryTable::remove` are the only points where racing callers meet, so
//! an inode is fully initialised and linked before its entry becomes visible,
//! and an entry is gone before its inode loses the link.

use std::path::Path;

use tracing::{debug, warn};

use crate::directory::DirectoryTable;
use crate::error::FsResult;
use crate::storage::InodeStore;
use crate::walker::PathWalker;
use crate::{FsError, FsLimits, InodeId, InodeKind};

pub struct LinkManager<'a> {
    inodes: &'a dyn InodeStore,
    dirs: &'a dyn DirectoryTable,
    walker: PathWalker<'a>,
    limits: &'a FsLimits,
}

impl<'a> LinkManager<'a> {
    pub fn new(
        inodes: &'a dyn InodeStore,
        dirs: &'a dyn DirectoryTable,
        root: InodeId,
        limits: &'a FsLimits,
    ) -> Self {
        Self {
            inodes,
            dirs,
            walker: PathWalker::new(inodes, dirs, root, limits),
            limits,
        }
    }

    /// Create a symlink at `link_path` whose payload is `target`, verbatim.
    ///
    /// The target is not resolved: dangling and cyclic targets are accepted
    /// and only surface when the link is followed.
    pub fn create_symlink(&self, cwd: InodeId, target: &str, link_path: &Path) -> FsResult<InodeId> {
        if target.is_empty() || target.len() > self.limits.max_target_len {
            return Err(FsError::InvalidArgument);
        }

        let mut ctx = self.walker.context();
        let (dir, name) = self.walker.resolve_parent(&mut ctx, cwd, link_path)?;

        let id = self.inodes.alloc(InodeKind::Symlink)?;
        if let Err(e) = self.inodes.write(id, 0, target.as_bytes()) {
            self.discard(id, InodeKind::Symlink);
            return Err(e);
        }
        self.publish(dir, &name, id, InodeKind::Symlink)?;

        debug!("symlink {} -> {} ({})", link_path.display(), target, id);
        Ok(id)
    }

    /// Add a second name for an existing inode. The final component of
    /// `existing` is not followed, so linking a symlink links the symlink.
    pub fn link(&self, cwd: InodeId, existing: &Path, new_path: &Path) -> FsResult<()> {
        let mut ctx = self.walker.context();
        let id = self.walker.resolve(&mut ctx, cwd, existing, false)?;
        if self.inodes.metadata(id)?.kind == InodeKind::Directory {
            return Err(FsError::IsADirectory);
        }

        let mut ctx = self.walker.context();
        let (dir, name) = self.walker.resolve_parent(&mut ctx, cwd, new_path)?;

        self.inodes.add_link(id)?;
        match self.dirs.insert_if_absent(dir, &name, id) {
            Ok(true) => {
                debug!("link {} -> {}", new_path.display(), id);
                Ok(())
            }
            Ok(false) => {
                self.release(id)?;
                Err(FsError::AlreadyExists)
            }
            Err(e) => {
                self.release(id)?;
                Err(e)
            }
        }
    }

    pub fn mkdir(&self, cwd: InodeId, path: &Path) -> FsResult<InodeId> {
        let mut ctx = self.walker.context();
        let (dir, name) = self.walker.resolve_parent(&mut ctx, cwd, path)?;

        let id = self.inodes.alloc(InodeKind::Directory)?;
        if let Err(e) = self.dirs.create(id, dir) {
            self.inodes.free(id)?;
            return Err(e);
        }
        self.publish(dir, &name, id, InodeKind::Directory)?;

        debug!("mkdir {} ({})", path.display(), id);
        Ok(id)
    }

    /// Create an empty regular file named `name` in `dir`. Returns `None` when
    /// another caller already holds the name.
    pub fn create_file(&self, dir: InodeId, name: &str) -> FsResult<Option<InodeId>> {
        let id = self.inodes.alloc(InodeKind::File)?;
        match self.publish(dir, name, id, InodeKind::File) {
            Ok(()) => {
                debug!("created {} in {} ({})", name, dir, id);
                Ok(Some(id))
            }
            Err(FsError::AlreadyExists) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove the entry named by `path`. The final component is never
    /// dereferenced and a missing entry is not an error.
    pub fn unlink(&self, cwd: InodeId, path: &Path) -> FsResult<()> {
        let mut ctx = self.walker.context();
        let (dir, name) = self.walker.resolve_parent(&mut ctx, cwd, path)?;

        let Some(id) = self.dirs.lookup(dir, &name)? else {
            debug!("unlink {}: no such entry", path.display());
            return Ok(());
        };

        let kind = match self.inodes.metadata(id) {
            Ok(meta) => meta.kind,
            // Lost a race with another unlink of the same entry
            Err(FsError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        if kind == InodeKind::Directory {
            self.dirs.retire(id)?;
        }

        match self.dirs.remove(dir, &name, Some(id))? {
            Some(_) => {
                self.release(id)?;
                debug!("unlinked {} ({})", path.display(), id);
            }
            None => debug!("unlink {}: entry already removed", path.display()),
        }
        Ok(())
    }

    fn publish(&self, dir: InodeId, name: &str, id: InodeId, kind: InodeKind) -> FsResult<()> {
        let inserted = self
            .inodes
            .add_link(id)
            .and_then(|_| self.dirs.insert_if_absent(dir, name, id));

        match inserted {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!("{} already exists in {}, releasing {}", name, dir, id);
                self.discard(id, kind);
                Err(FsError::AlreadyExists)
            }
            Err(e) => {
                self.discard(id, kind);
                Err(e)
            }
        }
    }

    /// Roll back an inode that never became visible
    fn discard(&self, id: InodeId, kind: InodeKind) {
        if let Err(e) = self.try_discard(id, kind) {
            warn!("failed to release unpublished inode {}: {}", id, e);
        }
    }

    fn try_discard(&self, id: InodeId, kind: InodeKind) -> FsResult<()> {
        if kind == InodeKind::Directory {
            self.dirs.retire(id)?;
        }
        self.inodes.free(id)
    }

    fn release(&self, id: InodeId) -> FsResult<()> {
        if self.inodes.drop_link(id)? == 0 {
            self.inodes.free(id)?;
        }
        Ok(())
    }
}
