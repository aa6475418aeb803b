//! Configuration types for linkfs core

use serde::{Deserialize, Serialize};

/// System limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FsLimits {
    /// Symlink dereferences allowed within a single resolution
    pub max_symlink_hops: u32,
    /// Longest symlink target, in bytes
    pub max_target_len: usize,
    /// Longest single path component, in bytes
    pub max_name_len: usize,
    pub max_open_handles: u32,
    /// Inode quota; `None` means unlimited
    pub max_inodes: Option<u64>,
}

impl Default for FsLimits {
    fn default() -> Self {
        Self {
            max_symlink_hops: 32,
            max_target_len: 1024,
            max_name_len: 255,
            max_open_handles: 10000,
            max_inodes: None,
        }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub limits: FsLimits,
}
