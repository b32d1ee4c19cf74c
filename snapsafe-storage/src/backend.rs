//! Storage backend contract
//!
//! Defines the interface that all storage drivers implement, plus the
//! repository path layout every driver must realize bit-exactly so that
//! repositories are interoperable across backends.

use snapsafe_core::error::Result;

/// File name of the repository metadata blob under the repository root
pub const REPOSITORY_FILENAME: &str = "repository.snapsafe";

/// Directory holding snapshot blobs under the repository root
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Directory holding chunk shards under the repository root
pub const CHUNKS_DIR: &str = "chunks";

/// Two-character fan-out directory for a chunk, derived from the first
/// two hex characters of its content address
pub fn sub_dir_for_chunk(sha_sum: &str) -> &str {
    &sha_sum[..2]
}

/// File name of one chunk shard: `<sha_sum>.<part>_<total_parts>`
pub fn chunk_file_name(sha_sum: &str, part: u32, total_parts: u32) -> String {
    format!("{sha_sum}.{part}_{total_parts}")
}

/// Storage backend driver
///
/// Drivers are value objects held behind dynamic dispatch in the backend
/// manager's ordered list. All implementations must be Send + Sync; the
/// manager may be shared across the writer thread and read-ahead tasks.
pub trait Backend: Send + Sync {
    /// Human-readable URL of this backend
    fn location(&self) -> String;

    /// URL schemes this driver claims
    fn protocols(&self) -> Vec<String>;

    /// Descriptive name for this driver
    fn description(&self) -> String;

    /// Free bytes on this backend, best effort
    fn available_space(&self) -> Result<u64>;

    /// Create the repository root, snapshots area and chunks area.
    /// Fails with `RepositoryExists` if any of them already exist.
    fn init_repository(&self) -> Result<()>;

    /// Read the repository metadata blob
    fn load_repository(&self) -> Result<Vec<u8>>;

    /// Write the repository metadata blob
    fn save_repository(&self, data: &[u8]) -> Result<()>;

    /// Read one snapshot blob by opaque id
    fn load_snapshot(&self, id: &str) -> Result<Vec<u8>>;

    /// Write one snapshot blob by opaque id
    fn save_snapshot(&self, id: &str, data: &[u8]) -> Result<()>;

    /// Fetch one chunk shard
    fn load_chunk(&self, sha_sum: &str, part: u32, total_parts: u32) -> Result<Vec<u8>>;

    /// Write one chunk shard, returning the stored byte count.
    ///
    /// If a blob already exists at the target path with matching byte
    /// length the write is skipped and 0 is returned, signalling
    /// "already present". This is what makes duplicate chunk writes
    /// idempotent across snapshots.
    fn store_chunk(&self, sha_sum: &str, part: u32, total_parts: u32, data: &[u8]) -> Result<u64>;
}

impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    fn location(&self) -> String {
        (**self).location()
    }
    fn protocols(&self) -> Vec<String> {
        (**self).protocols()
    }
    fn description(&self) -> String {
        (**self).description()
    }
    fn available_space(&self) -> Result<u64> {
        (**self).available_space()
    }
    fn init_repository(&self) -> Result<()> {
        (**self).init_repository()
    }
    fn load_repository(&self) -> Result<Vec<u8>> {
        (**self).load_repository()
    }
    fn save_repository(&self, data: &[u8]) -> Result<()> {
        (**self).save_repository(data)
    }
    fn load_snapshot(&self, id: &str) -> Result<Vec<u8>> {
        (**self).load_snapshot(id)
    }
    fn save_snapshot(&self, id: &str, data: &[u8]) -> Result<()> {
        (**self).save_snapshot(id, data)
    }
    fn load_chunk(&self, sha_sum: &str, part: u32, total_parts: u32) -> Result<Vec<u8>> {
        (**self).load_chunk(sha_sum, part, total_parts)
    }
    fn store_chunk(&self, sha_sum: &str, part: u32, total_parts: u32, data: &[u8]) -> Result<u64> {
        (**self).store_chunk(sha_sum, part, total_parts, data)
    }
}
