//! Inode store implementations for linkfs core

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tracing::trace;

use crate::error::FsResult;
use crate::{FsError, InodeId, InodeKind, Metadata};

/// Inode allocation, link counting and byte-range content access.
///
/// Every method is atomic with respect to every other call on the same inode.
/// Ids are never reused, so a stale id resolves to the original inode or to
/// `FsError::NotFound`.
pub trait InodeStore: Send + Sync {
    /// Allocate an inode with `nlink == 0` and an empty payload.
    fn alloc(&self, kind: InodeKind) -> FsResult<InodeId>;
    /// Reclaim an inode. Reclamation of a pinned inode is deferred to the last `unpin`.
    fn free(&self, id: InodeId) -> FsResult<()>;
    fn metadata(&self, id: InodeId) -> FsResult<Metadata>;
    fn read(&self, id: InodeId, offset: u64, buf: &mut [u8]) -> FsResult<usize>;
    fn write(&self, id: InodeId, offset: u64, data: &[u8]) -> FsResult<usize>;
    fn truncate(&self, id: InodeId, new_len: u64) -> FsResult<()>;
    /// Increment the link count, returning the new value. Fails once the count has dropped to zero.
    fn add_link(&self, id: InodeId) -> FsResult<u32>;
    /// Decrement the link count, returning the remaining value.
    fn drop_link(&self, id: InodeId) -> FsResult<u32>;
    /// Hold the inode alive for an open handle.
    fn pin(&self, id: InodeId) -> FsResult<()>;
    fn unpin(&self, id: InodeId) -> FsResult<()>;
    /// Number of inodes not yet reclaimed, including pinned orphans.
    fn live_count(&self) -> usize;
}

#[derive(Debug)]
struct InodeRecord {
    kind: InodeKind,
    nlink: u32,
    pins: u32,
    // set once nlink has dropped to zero; the inode can no longer gain links or pins
    unlinked: bool,
    // freed while pinned
    orphaned: bool,
    data: Vec<u8>,
}

impl InodeRecord {
    fn metadata(&self, id: InodeId) -> Metadata {
        Metadata {
            ino: id,
            kind: self.kind,
            len: self.data.len() as u64,
            nlink: self.nlink,
        }
    }
}

/// In-memory inode store implementation
pub struct InMemoryInodeStore {
    next_id: Mutex<u64>,
    max_inodes: Option<u64>,
    inodes: RwLock<HashMap<InodeId, InodeRecord>>,
}

impl InMemoryInodeStore {
    pub fn new() -> Self {
        Self::with_capacity_limit(None)
    }

    pub fn with_capacity_limit(max_inodes: Option<u64>) -> Self {
        Self {
            next_id: Mutex::new(1),
            max_inodes,
            inodes: RwLock::new(HashMap::new()),
        }
    }

    fn get_next_id(&self) -> InodeId {
        let mut next_id = self.next_id.lock().unwrap();
        let id = InodeId::new(*next_id);
        *next_id += 1;
        id
    }
}

impl InodeStore for InMemoryInodeStore {
    fn alloc(&self, kind: InodeKind) -> FsResult<InodeId> {
        let mut inodes = self.inodes.write().unwrap();
        if let Some(max) = self.max_inodes {
            if inodes.len() as u64 >= max {
                return Err(FsError::NoSpace);
            }
        }

        let id = self.get_next_id();
        inodes.insert(
            id,
            InodeRecord {
                kind,
                nlink: 0,
                pins: 0,
                unlinked: false,
                orphaned: false,
                data: Vec::new(),
            },
        );
        trace!("allocated inode {} ({:?})", id, kind);
        Ok(id)
    }

    fn free(&self, id: InodeId) -> FsResult<()> {
        let mut inodes = self.inodes.write().unwrap();
        let record = inodes.get_mut(&id).ok_or(FsError::NotFound)?;
        if record.pins > 0 {
            record.unlinked = true;
            record.orphaned = true;
            trace!("inode {} orphaned with {} pins", id, record.pins);
        } else {
            inodes.remove(&id);
            trace!("reclaimed inode {}", id);
        }
        Ok(())
    }

    fn metadata(&self, id: InodeId) -> FsResult<Metadata> {
        let inodes = self.inodes.read().unwrap();
        let record = inodes.get(&id).ok_or(FsError::NotFound)?;
        Ok(record.metadata(id))
    }

    fn read(&self, id: InodeId, offset: u64, buf: &mut [u8]) -> FsResult<usize> {
        let inodes = self.inodes.read().unwrap();
        let content = &inodes.get(&id).ok_or(FsError::NotFound)?.data;

        let start = offset as usize;
        if start >= content.len() {
            return Ok(0);
        }

        let end = std::cmp::min(start + buf.len(), content.len());
        let bytes_to_copy = end - start;
        buf[..bytes_to_copy].copy_from_slice(&content[start..end]);
        Ok(bytes_to_copy)
    }

    fn write(&self, id: InodeId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let mut inodes = self.inodes.write().unwrap();
        let content = &mut inodes.get_mut(&id).ok_or(FsError::NotFound)?.data;

        let start = offset as usize;
        let end = start + data.len();

        // Extend the content if necessary
        if end > content.len() {
            content.resize(end, 0);
        }

        content[start..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn truncate(&self, id: InodeId, new_len: u64) -> FsResult<()> {
        let mut inodes = self.inodes.write().unwrap();
        let content = &mut inodes.get_mut(&id).ok_or(FsError::NotFound)?.data;
        content.resize(new_len as usize, 0);
        Ok(())
    }

    fn add_link(&self, id: InodeId) -> FsResult<u32> {
        let mut inodes = self.inodes.write().unwrap();
        let record = inodes.get_mut(&id).ok_or(FsError::NotFound)?;
        if record.unlinked {
            return Err(FsError::NotFound);
        }
        record.nlink += 1;
        Ok(record.nlink)
    }

    fn drop_link(&self, id: InodeId) -> FsResult<u32> {
        let mut inodes = self.inodes.write().unwrap();
        let record = inodes.get_mut(&id).ok_or(FsError::NotFound)?;
        record.nlink = record.nlink.saturating_sub(1);
        if record.nlink == 0 {
            record.unlinked = true;
        }
        Ok(record.nlink)
    }

    fn pin(&self, id: InodeId) -> FsResult<()> {
        let mut inodes = self.inodes.write().unwrap();
        let record = inodes.get_mut(&id).ok_or(FsError::NotFound)?;
        if record.unlinked {
            return Err(FsError::NotFound);
        }
        record.pins += 1;
        Ok(())
    }

    fn unpin(&self, id: InodeId) -> FsResult<()> {
        let mut inodes = self.inodes.write().unwrap();
        let record = inodes.get_mut(&id).ok_or(FsError::NotFound)?;
        record.pins = record.pins.saturating_sub(1);
        if record.pins == 0 && record.orphaned {
            inodes.remove(&id);
            trace!("reclaimed orphaned inode {}", id);
        }
        Ok(())
    }

    fn live_count(&self) -> usize {
        self.inodes.read().unwrap().len()
    }
}

impl Default for InMemoryInodeStore {
    fn default() -> Self {
        Self::new()
    }
}
