//! Archive entries and progress records

use serde::{Deserialize, Serialize};
use snapsafe_core::chunk::Chunk;
use snapsafe_core::error::{Result, SnapSafeError};
use std::collections::HashMap;

/// Kind of filesystem object captured by an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    File,
    Directory,
    SymLink,
}

/// One filesystem object within a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemData {
    /// Path relative to the snapshot root
    pub path: String,

    pub item_type: ItemType,

    /// POSIX metadata, restored verbatim
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,

    /// Modification time in nanoseconds since the Unix epoch
    pub mod_time: i64,

    /// Symlink target (SymLink only)
    #[serde(default)]
    pub points_to: Option<String>,

    /// Content chunks (File only). Order by `num` is authoritative but the
    /// list may be stored in any order; consumers look up by `num`.
    #[serde(default)]
    pub chunks: Vec<Chunk>,

    /// Aggregate plaintext bytes
    pub size: u64,

    /// Aggregate encoded bytes
    pub storage_size: u64,
}

impl ItemData {
    /// Build the `num → list index` map for this entry's chunks
    ///
    /// Constructed once per archive traversal so per-chunk lookups stay
    /// O(1) regardless of list order.
    pub fn chunk_index(&self) -> HashMap<u32, usize> {
        self.chunks
            .iter()
            .enumerate()
            .map(|(idx, chunk)| (chunk.num, idx))
            .collect()
    }

    /// Look up a chunk by its archive index through a prebuilt map
    pub fn chunk_by_num<'a>(
        &'a self,
        index: &HashMap<u32, usize>,
        num: u32,
    ) -> Result<&'a Chunk> {
        index
            .get(&num)
            .map(|&idx| &self.chunks[idx])
            .ok_or(SnapSafeError::ChunkNotFound { num })
    }
}

/// Cumulative counters for a store or restore run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub size: u64,
    pub storage_size: u64,
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
}

impl std::ops::Add for Stats {
    type Output = Stats;

    fn add(self, other: Stats) -> Stats {
        Stats {
            size: self.size + other.size,
            storage_size: self.storage_size + other.storage_size,
            files: self.files + other.files,
            dirs: self.dirs + other.dirs,
            symlinks: self.symlinks + other.symlinks,
        }
    }
}

/// One progress record emitted while storing or restoring
#[derive(Debug, Clone, Default)]
pub struct Progress {
    /// Path of the entry currently being processed
    pub path: String,

    /// Bytes processed for this entry so far
    pub size: u64,

    /// Encoded bytes for this entry so far
    pub storage_size: u64,

    /// Cumulative statistics for the whole run
    pub statistics: Stats,
}
