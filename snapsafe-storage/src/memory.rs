//! In-memory storage backend
//!
//! Used for testing and development. Not persistent.

use crate::backend::{chunk_file_name, Backend};
use parking_lot::RwLock;
use snapsafe_core::error::{Result, SnapSafeError};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory storage backend
pub struct MemoryBackend {
    repository: RwLock<Option<Vec<u8>>>,
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
    chunks: RwLock<HashMap<String, Vec<u8>>>,
    initialized: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            repository: RwLock::new(None),
            snapshots: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Number of chunk shards currently stored
    pub fn shard_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Drop a stored shard, simulating backend data loss
    pub fn evict_shard(&self, sha_sum: &str, part: u32, total_parts: u32) -> bool {
        self.chunks
            .write()
            .remove(&chunk_file_name(sha_sum, part, total_parts))
            .is_some()
    }

    /// Corrupt a stored shard in place, if present
    pub fn corrupt_shard(&self, sha_sum: &str, part: u32, total_parts: u32, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        let mut chunks = self.chunks.write();
        match chunks.get_mut(&chunk_file_name(sha_sum, part, total_parts)) {
            Some(data) => {
                f(data);
                true
            }
            None => false,
        }
    }

    fn not_found(what: &str) -> SnapSafeError {
        SnapSafeError::Io(io::Error::new(io::ErrorKind::NotFound, what.to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn location(&self) -> String {
        "memory://".to_string()
    }

    fn protocols(&self) -> Vec<String> {
        vec!["memory".to_string()]
    }

    fn description(&self) -> String {
        "In-Memory Storage".to_string()
    }

    fn available_space(&self) -> Result<u64> {
        Ok(u64::MAX)
    }

    fn init_repository(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(SnapSafeError::RepositoryExists);
        }
        Ok(())
    }

    fn load_repository(&self) -> Result<Vec<u8>> {
        self.repository
            .read()
            .clone()
            .ok_or_else(|| Self::not_found("repository metadata"))
    }

    fn save_repository(&self, data: &[u8]) -> Result<()> {
        *self.repository.write() = Some(data.to_vec());
        Ok(())
    }

    fn load_snapshot(&self, id: &str) -> Result<Vec<u8>> {
        self.snapshots
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Self::not_found("snapshot"))
    }

    fn save_snapshot(&self, id: &str, data: &[u8]) -> Result<()> {
        self.snapshots.write().insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn load_chunk(&self, sha_sum: &str, part: u32, total_parts: u32) -> Result<Vec<u8>> {
        self.chunks
            .read()
            .get(&chunk_file_name(sha_sum, part, total_parts))
            .cloned()
            .ok_or_else(|| Self::not_found("chunk shard"))
    }

    fn store_chunk(&self, sha_sum: &str, part: u32, total_parts: u32, data: &[u8]) -> Result<u64> {
        let key = chunk_file_name(sha_sum, part, total_parts);
        let mut chunks = self.chunks.write();
        if let Some(existing) = chunks.get(&key) {
            if existing.len() == data.len() {
                return Ok(0);
            }
        }
        chunks.insert(key, data.to_vec());
        Ok(data.len() as u64)
    }
}
