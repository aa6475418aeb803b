//! linkfs core — in-memory namespace with symbolic links
//!
//! This crate resolves paths through chains of symlinks with a bounded hop
//! count, creates and removes links safely under concurrent callers, and
//! exposes an open/stat front end over pluggable inode and directory stores.

pub mod config;
pub mod directory;
pub mod error;
pub mod links;
pub mod storage;
pub mod types;
pub mod vfs;
pub mod walker;

// Re-export key types for convenience
pub use config::{FsConfig, FsLimits};
pub use directory::{DirectoryTable, InMemoryDirectoryTable};
pub use error::{FsError, FsResult};
pub use links::LinkManager;
pub use storage::{InMemoryInodeStore, InodeStore};
pub use types::*;
pub use vfs::{FsCore, Session};
pub use walker::{PathWalker, ResolveContext};
