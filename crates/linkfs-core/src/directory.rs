//! Directory tables for linkfs core

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::error::FsResult;
use crate::{FsError, InodeId};

/// Name to inode mapping for every directory.
///
/// `insert_if_absent` and `remove` are the only synchronisation points for
/// namespace mutation: each is linearizable with respect to every other
/// operation on the same `(dir, name)` pair.
pub trait DirectoryTable: Send + Sync {
    /// Register an empty table for `dir`. The root is its own parent.
    fn create(&self, dir: InodeId, parent: InodeId) -> FsResult<()>;
    /// Drop the table of an empty directory; later lookups and inserts in it fail with `NotFound`.
    /// Retiring a directory that is already gone succeeds.
    fn retire(&self, dir: InodeId) -> FsResult<()>;
    fn parent(&self, dir: InodeId) -> FsResult<InodeId>;
    fn lookup(&self, dir: InodeId, name: &str) -> FsResult<Option<InodeId>>;
    /// Insert `name -> ino` unless `name` is present. Returns whether the insert happened.
    fn insert_if_absent(&self, dir: InodeId, name: &str, ino: InodeId) -> FsResult<bool>;
    /// Remove `name` if present and, when `expected` is given, only if it still maps to it.
    fn remove(&self, dir: InodeId, name: &str, expected: Option<InodeId>) -> FsResult<Option<InodeId>>;
    fn entries(&self, dir: InodeId) -> FsResult<Vec<(String, InodeId)>>;
}

#[derive(Debug)]
struct DirState {
    parent: InodeId,
    entries: HashMap<String, InodeId>,
    retired: bool,
}

/// In-memory directory table, one lock per directory
#[derive(Default)]
pub struct InMemoryDirectoryTable {
    dirs: RwLock<HashMap<InodeId, Arc<RwLock<DirState>>>>,
}

impl InMemoryDirectoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn dir(&self, dir: InodeId) -> FsResult<Arc<RwLock<DirState>>> {
        let dirs = self.dirs.read().unwrap();
        dirs.get(&dir).cloned().ok_or(FsError::NotFound)
    }
}

impl DirectoryTable for InMemoryDirectoryTable {
    fn create(&self, dir: InodeId, parent: InodeId) -> FsResult<()> {
        let mut dirs = self.dirs.write().unwrap();
        if dirs.contains_key(&dir) {
            return Err(FsError::AlreadyExists);
        }
        dirs.insert(
            dir,
            Arc::new(RwLock::new(DirState {
                parent,
                entries: HashMap::new(),
                retired: false,
            })),
        );
        Ok(())
    }

    fn retire(&self, dir: InodeId) -> FsResult<()> {
        let table = match self.dir(dir) {
            Ok(table) => table,
            Err(FsError::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };

        {
            let mut state = table.write().unwrap();
            if !state.entries.is_empty() {
                return Err(FsError::NotEmpty);
            }
            state.retired = true;
        }

        self.dirs.write().unwrap().remove(&dir);
        trace!("retired directory {}", dir);
        Ok(())
    }

    fn parent(&self, dir: InodeId) -> FsResult<InodeId> {
        let table = self.dir(dir)?;
        let state = table.read().unwrap();
        if state.retired {
            return Err(FsError::NotFound);
        }
        Ok(state.parent)
    }

    fn lookup(&self, dir: InodeId, name: &str) -> FsResult<Option<InodeId>> {
        let table = self.dir(dir)?;
        let state = table.read().unwrap();
        if state.retired {
            return Err(FsError::NotFound);
        }
        Ok(state.entries.get(name).copied())
    }

    fn insert_if_absent(&self, dir: InodeId, name: &str, ino: InodeId) -> FsResult<bool> {
        let table = self.dir(dir)?;
        let mut state = table.write().unwrap();
        if state.retired {
            return Err(FsError::NotFound);
        }
        if state.entries.contains_key(name) {
            return Ok(false);
        }
        state.entries.insert(name.to_string(), ino);
        Ok(true)
    }

    fn remove(&self, dir: InodeId, name: &str, expected: Option<InodeId>) -> FsResult<Option<InodeId>> {
        let table = self.dir(dir)?;
        let mut state = table.write().unwrap();
        if state.retired {
            return Err(FsError::NotFound);
        }
        match (state.entries.get(name), expected) {
            (None, _) => Ok(None),
            (Some(current), Some(expected)) if *current != expected => Ok(None),
            _ => Ok(state.entries.remove(name)),
        }
    }

    fn entries(&self, dir: InodeId) -> FsResult<Vec<(String, InodeId)>> {
        let table = self.dir(dir)?;
        let state = table.read().unwrap();
        if state.retired {
            return Err(FsError::NotFound);
        }
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .map(|(name, ino)| (name.clone(), *ino))
            .collect();
        entries.sort();
        Ok(entries)
    }
}
