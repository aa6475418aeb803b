//! Path resolution with bounded symlink following.
//!
//! Every call walks the namespace from scratch; nothing resolved here outlives
//! the call. Symlink dereferences are counted in a [`ResolveContext`] and the
//! walk fails with [`FsError::TooManyLinks`] once the configured bound is
//! exceeded, which is also how cycles are rejected.

use std::path::{Component, Path};

use tracing::{trace, warn};

use crate::directory::DirectoryTable;
use crate::error::FsResult;
use crate::storage::InodeStore;
use crate::{FsError, FsLimits, InodeId, InodeKind};

/// Per-call resolution state
#[derive(Debug)]
pub struct ResolveContext {
    hops: u32,
    max_hops: u32,
}

impl ResolveContext {
    pub fn new(max_hops: u32) -> Self {
        Self { hops: 0, max_hops }
    }

    /// Symlinks dereferenced so far
    pub fn hops(&self) -> u32 {
        self.hops
    }

    fn hop(&mut self) -> FsResult<()> {
        if self.hops >= self.max_hops {
            warn!("symlink hop bound of {} exceeded", self.max_hops);
            return Err(FsError::TooManyLinks);
        }
        self.hops += 1;
        Ok(())
    }
}

/// Resolves paths against an inode store and its directory tables
pub struct PathWalker<'a> {
    inodes: &'a dyn InodeStore,
    dirs: &'a dyn DirectoryTable,
    root: InodeId,
    limits: &'a FsLimits,
}

impl<'a> PathWalker<'a> {
    pub fn new(
        inodes: &'a dyn InodeStore,
        dirs: &'a dyn DirectoryTable,
        root: InodeId,
        limits: &'a FsLimits,
    ) -> Self {
        Self {
            inodes,
            dirs,
            root,
            limits,
        }
    }

    pub fn context(&self) -> ResolveContext {
        ResolveContext::new(self.limits.max_symlink_hops)
    }

    /// Resolve `path` to an inode. Relative paths start at `start`.
    ///
    /// Symlinks in intermediate components are always followed; a symlink in
    /// the final component is followed only when `follow_final` is set.
    pub fn resolve(
        &self,
        ctx: &mut ResolveContext,
        start: InodeId,
        path: &Path,
        follow_final: bool,
    ) -> FsResult<InodeId> {
        let (origin, components) = self.split(start, path)?;
        self.walk(ctx, origin, &components, follow_final)
    }

    /// Resolve everything but the last component of `path`, which must name an
    /// entry inside a directory. Returns that directory and the entry name.
    pub fn resolve_parent(
        &self,
        ctx: &mut ResolveContext,
        start: InodeId,
        path: &Path,
    ) -> FsResult<(InodeId, String)> {
        let (origin, mut components) = self.split(start, path)?;
        let name = match components.pop() {
            Some(Component::Normal(name)) => name.to_str().ok_or(FsError::InvalidName)?,
            _ => return Err(FsError::InvalidArgument),
        };
        self.check_name(name)?;

        let dir = self.walk(ctx, origin, &components, true)?;
        self.require_dir(dir)?;
        Ok((dir, name.to_string()))
    }

    /// Dereference the symlink `link`, which lives in directory `dir`.
    /// Relative targets are resolved from `dir`.
    pub fn follow(&self, ctx: &mut ResolveContext, dir: InodeId, link: InodeId) -> FsResult<InodeId> {
        ctx.hop()?;
        let target = self.read_target(link)?;
        trace!("hop {}: {} -> {}", ctx.hops(), link, target);
        self.resolve(ctx, dir, Path::new(&target), true)
    }

    /// Read the target path stored in a symlink inode
    pub fn read_target(&self, link: InodeId) -> FsResult<String> {
        let meta = self.inodes.metadata(link)?;
        if meta.kind != InodeKind::Symlink {
            return Err(FsError::InvalidArgument);
        }

        let mut buf = vec![0u8; meta.len as usize];
        let n = self.inodes.read(link, 0, &mut buf)?;
        buf.truncate(n);
        String::from_utf8(buf).map_err(|_| FsError::InvalidArgument)
    }

    /// Fails with `NotADirectory` unless `id` is a directory
    pub fn require_dir(&self, id: InodeId) -> FsResult<()> {
        match self.inodes.metadata(id)?.kind {
            InodeKind::Directory => Ok(()),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn check_name(&self, name: &str) -> FsResult<()> {
        if name.len() > self.limits.max_name_len || name.contains('\0') {
            return Err(FsError::InvalidName);
        }
        Ok(())
    }

    fn split<'p>(&self, start: InodeId, path: &'p Path) -> FsResult<(InodeId, Vec<Component<'p>>)> {
        if path.as_os_str().is_empty() {
            return Err(FsError::InvalidArgument);
        }

        let mut origin = start;
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::RootDir => origin = self.root,
                Component::CurDir => {}
                Component::Prefix(_) => return Err(FsError::InvalidArgument),
                other => components.push(other),
            }
        }
        Ok((origin, components))
    }

    fn walk(
        &self,
        ctx: &mut ResolveContext,
        origin: InodeId,
        components: &[Component<'_>],
        follow_final: bool,
    ) -> FsResult<InodeId> {
        let mut current = origin;

        for (i, component) in components.iter().enumerate() {
            let is_last = i + 1 == components.len();
            self.require_dir(current)?;

            current = match component {
                Component::ParentDir => self.dirs.parent(current)?,
                Component::Normal(name) => {
                    let name = name.to_str().ok_or(FsError::InvalidName)?;
                    let child = self.dirs.lookup(current, name)?.ok_or(FsError::NotFound)?;
                    trace!("lookup {} in {} -> {}", name, current, child);

                    let kind = self.inodes.metadata(child)?.kind;
                    if kind == InodeKind::Symlink && (follow_final || !is_last) {
                        self.follow(ctx, current, child)?
                    } else {
                        child
                    }
                }
                _ => current,
            };
        }

        Ok(current)
    }
}
