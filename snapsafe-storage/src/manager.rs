//! Multi-backend manager
//!
//! Multiplexes one logical repository across N backends: chunk shards are
//! distributed round-robin for capacity pooling, repository and snapshot
//! metadata are mirrored to every backend for durability, and reads fail
//! over across backends in order.

use crate::backend::Backend;
use snapsafe_core::chunk::Chunk;
use snapsafe_core::error::{Result, SnapSafeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Routes repository data across an ordered list of backends
///
/// The round-robin cursor is advanced `(cursor + 1) mod N` before each
/// shard placement. It survives across chunks within a run but is not
/// persisted.
pub struct BackendManager {
    backends: Vec<Box<dyn Backend>>,
    last_used_backend: AtomicUsize,
}

impl BackendManager {
    /// Create a manager with no backends attached
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            last_used_backend: AtomicUsize::new(0),
        }
    }

    /// Append a backend to the ordered list
    pub fn add_backend(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Number of attached backends
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// URLs of all backends, preserving order
    pub fn locations(&self) -> Vec<String> {
        self.backends.iter().map(|be| be.location()).collect()
    }

    /// Load one shard of a chunk, trying each backend in order
    ///
    /// The shard file name carries `chunk.data_parts` as its total-parts
    /// component; this mirrors the store path so the layout stays
    /// bit-exact across drivers.
    pub fn load_chunk(&self, chunk: &Chunk, part: u32) -> Result<Vec<u8>> {
        for be in &self.backends {
            match be.load_chunk(&chunk.sha_sum, part, chunk.data_parts) {
                Ok(data) => return Ok(data),
                Err(err) => {
                    debug!(
                        backend = %be.location(),
                        sha_sum = %chunk.sha_sum,
                        part,
                        %err,
                        "shard load failed, trying next backend"
                    );
                }
            }
        }

        Err(SnapSafeError::LoadChunkFailed)
    }

    /// Store all shards of a chunk, one backend per shard round-robin
    ///
    /// Any shard write error aborts the chunk; partial state is tolerated
    /// and later restores rely on erasure coding or a retry. Returns the
    /// encoded payload size on success.
    pub fn store_chunk(&self, chunk: &Chunk) -> Result<u64> {
        let shards = chunk.data.as_ref().ok_or_else(|| {
            SnapSafeError::Configuration("chunk has no shard data to store".to_string())
        })?;
        if self.backends.is_empty() {
            return Err(SnapSafeError::Configuration(
                "no storage backends attached".to_string(),
            ));
        }

        for (i, shard) in shards.iter().enumerate() {
            let idx = self.next_backend();
            let be = &self.backends[idx];
            be.store_chunk(&chunk.sha_sum, i as u32, chunk.data_parts, shard)?;
            debug!(
                backend = %be.location(),
                sha_sum = %chunk.sha_sum,
                part = i,
                "stored chunk shard"
            );
        }

        Ok(chunk.size)
    }

    /// Load a snapshot blob, first success wins
    pub fn load_snapshot(&self, id: &str) -> Result<Vec<u8>> {
        for be in &self.backends {
            if let Ok(data) = be.load_snapshot(id) {
                return Ok(data);
            }
        }

        Err(SnapSafeError::LoadSnapshotFailed)
    }

    /// Store a snapshot blob on every backend
    pub fn save_snapshot(&self, id: &str, data: &[u8]) -> Result<()> {
        for be in &self.backends {
            if let Err(err) = be.save_snapshot(id, data) {
                warn!(backend = %be.location(), %err, "snapshot save failed");
                return Err(err);
            }
        }

        Ok(())
    }

    /// Create the repository on every backend
    pub fn init_repository(&self) -> Result<()> {
        for be in &self.backends {
            be.init_repository()?;
        }

        Ok(())
    }

    /// Load the repository metadata blob, first success wins
    pub fn load_repository(&self) -> Result<Vec<u8>> {
        for be in &self.backends {
            if let Ok(data) = be.load_repository() {
                return Ok(data);
            }
        }

        Err(SnapSafeError::LoadRepositoryFailed)
    }

    /// Store the repository metadata blob on every backend
    pub fn save_repository(&self, data: &[u8]) -> Result<()> {
        for be in &self.backends {
            if let Err(err) = be.save_repository(data) {
                warn!(backend = %be.location(), %err, "repository save failed");
                return Err(err);
            }
        }

        Ok(())
    }

    /// Advance the round-robin cursor and return the selected index
    fn next_backend(&self) -> usize {
        let n = self.backends.len();
        self.last_used_backend
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                Some((cursor + 1) % n)
            })
            .map(|prev| (prev + 1) % n)
            .unwrap_or(0)
    }
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use bytes::Bytes;
    use snapsafe_core::compress::Compression;
    use snapsafe_core::crypto::Encryption;
    use std::io;
    use std::sync::Arc;

    /// Backend stub whose every operation fails
    struct BrokenBackend;

    impl Backend for BrokenBackend {
        fn location(&self) -> String {
            "broken://".to_string()
        }
        fn protocols(&self) -> Vec<String> {
            vec!["broken".to_string()]
        }
        fn description(&self) -> String {
            "Broken Storage".to_string()
        }
        fn available_space(&self) -> Result<u64> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn init_repository(&self) -> Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn load_repository(&self) -> Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn save_repository(&self, _data: &[u8]) -> Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn load_snapshot(&self, _id: &str) -> Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn save_snapshot(&self, _id: &str, _data: &[u8]) -> Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn load_chunk(&self, _sha_sum: &str, _part: u32, _total_parts: u32) -> Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
        fn store_chunk(
            &self,
            _sha_sum: &str,
            _part: u32,
            _total_parts: u32,
            _data: &[u8],
        ) -> Result<u64> {
            Err(io::Error::new(io::ErrorKind::Other, "down").into())
        }
    }

    fn manager_with_memories(n: usize) -> (BackendManager, Vec<Arc<MemoryBackend>>) {
        let mut manager = BackendManager::new();
        let mut memories = Vec::new();
        for _ in 0..n {
            let mem = Arc::new(MemoryBackend::new());
            manager.add_backend(Box::new(mem.clone()));
            memories.push(mem);
        }
        (manager, memories)
    }

    fn make_chunk(
        num: u32,
        sha_sum: &str,
        shards: Vec<Vec<u8>>,
        data_parts: u32,
        parity_parts: u32,
    ) -> Chunk {
        let size = shards
            .iter()
            .take(data_parts as usize)
            .map(|s| s.len() as u64)
            .sum();
        Chunk {
            num,
            original_size: size,
            size,
            sha_sum: sha_sum.to_string(),
            decrypted_sha_sum: sha_sum.to_string(),
            compressed: Compression::None,
            encrypted: Encryption::None,
            data_parts,
            parity_parts,
            data: Some(shards.into_iter().map(Bytes::from).collect()),
        }
    }

    #[test]
    fn test_round_robin_distribution() {
        // 4 chunks x 3 shards over 3 backends: each backend ends up with
        // one shard of every chunk, and the cursor wraps exactly at N.
        let (manager, memories) = manager_with_memories(3);

        for num in 0..4 {
            let sha = format!("{:02x}{}", num, "ab".repeat(31));
            let chunk = make_chunk(num, &sha, vec![b"s0".to_vec(), b"s1".to_vec(), b"s2".to_vec()], 2, 1);
            manager.store_chunk(&chunk).unwrap();
        }

        for mem in &memories {
            assert_eq!(mem.shard_count(), 4);
        }
    }

    #[test]
    fn test_load_chunk_fails_over() {
        let mut manager = BackendManager::new();
        manager.add_backend(Box::new(BrokenBackend));
        let mem = Arc::new(MemoryBackend::new());
        manager.add_backend(Box::new(mem.clone()));

        mem.store_chunk("cafe", 0, 1, b"shard").unwrap();

        let chunk = make_chunk(0, "cafe", vec![b"shard".to_vec()], 1, 0);
        assert_eq!(manager.load_chunk(&chunk, 0).unwrap(), b"shard");
    }

    #[test]
    fn test_load_chunk_all_backends_fail() {
        let mut manager = BackendManager::new();
        manager.add_backend(Box::new(BrokenBackend));
        manager.add_backend(Box::new(BrokenBackend));

        let chunk = make_chunk(0, "cafe", vec![b"shard".to_vec()], 1, 0);
        assert!(matches!(
            manager.load_chunk(&chunk, 0),
            Err(SnapSafeError::LoadChunkFailed)
        ));
    }

    #[test]
    fn test_store_chunk_aborts_on_failure() {
        let mut manager = BackendManager::new();
        let mem = Arc::new(MemoryBackend::new());
        manager.add_backend(Box::new(mem.clone()));
        manager.add_backend(Box::new(BrokenBackend));

        let chunk = make_chunk(0, "cafe", vec![b"s0".to_vec(), b"s1".to_vec(), b"s2".to_vec()], 2, 1);
        assert!(manager.store_chunk(&chunk).is_err());
        // The round robin placed at most one shard before aborting
        assert!(mem.shard_count() <= 1);
    }

    #[test]
    fn test_metadata_mirrored_to_all() {
        let (manager, memories) = manager_with_memories(3);

        manager.save_repository(b"meta").unwrap();
        for mem in &memories {
            assert_eq!(mem.load_repository().unwrap(), b"meta");
        }

        manager.save_snapshot("id1", b"snap").unwrap();
        for mem in &memories {
            assert_eq!(mem.load_snapshot("id1").unwrap(), b"snap");
        }
    }

    #[test]
    fn test_metadata_save_surfaces_failure() {
        let mut manager = BackendManager::new();
        let mem = Arc::new(MemoryBackend::new());
        manager.add_backend(Box::new(mem));
        manager.add_backend(Box::new(BrokenBackend));

        assert!(manager.save_repository(b"meta").is_err());
        assert!(manager.save_snapshot("id", b"snap").is_err());
        assert!(manager.init_repository().is_err());
    }

    #[test]
    fn test_metadata_load_first_success() {
        let mut manager = BackendManager::new();
        manager.add_backend(Box::new(BrokenBackend));
        let mem = Arc::new(MemoryBackend::new());
        mem.save_repository(b"meta").unwrap();
        mem.save_snapshot("id", b"snap").unwrap();
        manager.add_backend(Box::new(mem));

        assert_eq!(manager.load_repository().unwrap(), b"meta");
        assert_eq!(manager.load_snapshot("id").unwrap(), b"snap");

        let empty = BackendManager::new();
        assert!(matches!(
            empty.load_repository(),
            Err(SnapSafeError::LoadRepositoryFailed)
        ));
        assert!(matches!(
            empty.load_snapshot("id"),
            Err(SnapSafeError::LoadSnapshotFailed)
        ));
    }

    #[test]
    fn test_locations_preserve_order() {
        let mut manager = BackendManager::new();
        manager.add_backend(Box::new(BrokenBackend));
        manager.add_backend(Box::new(MemoryBackend::new()));
        assert_eq!(
            manager.locations(),
            vec!["broken://".to_string(), "memory://".to_string()]
        );
    }
}
