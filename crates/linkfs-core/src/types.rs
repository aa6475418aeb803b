//! Core type definitions for linkfs

use std::fmt;

use serde::{Deserialize, Serialize};

/// Inode number. Ids are handed out monotonically and never reused by a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(u64);

impl InodeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque handle identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Inode kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InodeKind {
    File,
    Directory,
    Symlink,
}

/// Inode metadata as reported by stat calls
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub ino: InodeId,
    pub kind: InodeKind,
    pub len: u64,
    pub nlink: u32,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == InodeKind::Symlink
    }
}

/// Directory entry information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub ino: InodeId,
    pub kind: InodeKind,
}

/// Flags accepted by `FsCore::open`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    /// Create a regular file when the final name is missing
    pub create: bool,
    /// Empty an existing regular file opened for writing
    pub truncate: bool,
    /// Do not dereference a symlink in the final component
    pub nofollow: bool,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn nofollow(mut self, nofollow: bool) -> Self {
        self.nofollow = nofollow;
        self
    }
}

/// Resource counters, mostly useful to check for leaks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FsStats {
    pub live_inodes: usize,
    pub open_handles: usize,
}
