//! Archive read paths
//!
//! Three ways to get bytes back out of an archive entry:
//! - `decode_archive` restores an entry to disk with its POSIX metadata
//! - `decode_archive_data` materializes a file's plaintext in memory
//! - `read_archive` serves random-access reads with read-ahead
//!
//! All of them drive the chunk pipeline in reverse: fetch shards across
//! backends, reconstruct through erasure coding when some are missing,
//! decrypt, decompress and verify the plaintext checksum.

use crate::cache::ChunkCache;
use crate::fsutil;
use crate::item::{ItemData, ItemType, Progress, Stats};
use crate::repository::Repository;
use bytes::Bytes;
use snapsafe_core::chunk::{decode_chunk, Chunk};
use snapsafe_core::erasure::ErasureCoder;
use snapsafe_core::error::{Result, SnapSafeError};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Reads archives back out of a repository
///
/// Cheap to clone; the repository handle and chunk cache are shared.
/// The cache serves the random-access path; whole-archive restores
/// bypass it so large restores do not thrash it.
#[derive(Clone)]
pub struct ArchiveReader {
    repo: Arc<Repository>,
    cache: Arc<ChunkCache>,
}

impl ArchiveReader {
    /// Create a reader with a default-budget chunk cache
    pub fn new(repo: Arc<Repository>) -> Self {
        Self::with_cache(repo, Arc::new(ChunkCache::new()))
    }

    /// Create a reader over an explicit cache
    pub fn with_cache(repo: Arc<Repository>, cache: Arc<ChunkCache>) -> Self {
        Self { repo, cache }
    }

    /// Load and fully decode one chunk, without touching the cache
    pub fn load_chunk(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        let payload = self.load_encoded(chunk)?;
        decode_chunk(chunk, payload, self.repo.key())
    }

    /// Fetch the encoded payload of a chunk from the backends,
    /// reconstructing through erasure coding when shards are missing
    fn load_encoded(&self, chunk: &Chunk) -> Result<Vec<u8>> {
        if chunk.parity_parts == 0 {
            return self.repo.manager().load_chunk(chunk, 0);
        }

        let total = chunk.total_parts() as usize;
        let coder = ErasureCoder::new(chunk.data_parts as usize, chunk.parity_parts as usize)?;
        let expected_len = chunk.shard_size();

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut blocks_found = 0u32;
        let mut failed = 0u32;

        for part in 0..total {
            match self.repo.manager().load_chunk(chunk, part as u32) {
                Ok(data) if data.len() == expected_len => {
                    shards[part] = Some(data);
                    blocks_found += 1;
                }
                Ok(data) => {
                    warn!(
                        sha_sum = %chunk.sha_sum,
                        part,
                        len = data.len(),
                        expected_len,
                        "shard has unexpected length, treating as missing"
                    );
                    failed += 1;
                }
                Err(_) => {
                    failed += 1;
                }
            }

            if blocks_found < chunk.data_parts {
                continue;
            }

            // Enough clean shards: recompute any holes, then join.
            // Failures here are retried with further shards while any
            // remain unfetched.
            let mut attempt = shards.clone();
            if attempt.iter().any(Option::is_none) {
                if let Err(err) = coder.reconstruct(&mut attempt) {
                    debug!(sha_sum = %chunk.sha_sum, %err, "reconstruction failed, trying more shards");
                    continue;
                }
            }
            match coder.join(&attempt, chunk.size as usize) {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    debug!(sha_sum = %chunk.sha_sum, %err, "join failed, trying more shards");
                    continue;
                }
            }
        }

        Err(SnapSafeError::DataReconstruction {
            num: chunk.num,
            data_parts: chunk.data_parts,
            blocks_found,
            failed_backends: failed,
        })
    }

    /// Restore one archive entry to `path`
    ///
    /// Directories and symlinks are recreated directly; files are decoded
    /// chunk by chunk in `num` order and written out, then mtime and
    /// ownership are restored. Returns the entry's statistics.
    pub fn decode_archive(&self, arc: &ItemData, path: &Path) -> Result<Stats> {
        self.decode_archive_with(arc, path, |_| {})
    }

    /// Restore one archive entry, emitting a progress record per chunk
    pub fn decode_archive_with<F>(&self, arc: &ItemData, path: &Path, mut emit: F) -> Result<Stats>
    where
        F: FnMut(Progress),
    {
        let mut prog = Progress {
            path: arc.path.clone(),
            ..Progress::default()
        };

        match arc.item_type {
            ItemType::Directory => {
                fs::create_dir_all(path)?;
                fsutil::apply_mode(path, arc.mode)?;
                prog.statistics.dirs += 1;
                emit(prog.clone());
            }
            ItemType::SymLink => {
                let target = arc.points_to.as_deref().ok_or_else(|| {
                    SnapSafeError::Configuration(format!(
                        "symlink entry {} has no target",
                        arc.path
                    ))
                })?;
                std::os::unix::fs::symlink(target, path)?;
                prog.statistics.symlinks += 1;
                emit(prog.clone());
            }
            ItemType::File => {
                prog.statistics.files += 1;
                prog.statistics.storage_size = arc.storage_size;
                prog.storage_size = arc.storage_size;

                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .mode(arc.mode)
                    .open(path)?;

                let index = arc.chunk_index();
                for num in 0..arc.chunks.len() as u32 {
                    let chunk = arc.chunk_by_num(&index, num)?;
                    let data = self.load_chunk(chunk)?;
                    file.write_all(&data)?;

                    prog.statistics.size += data.len() as u64;
                    prog.size += data.len() as u64;
                    emit(prog.clone());
                }

                file.sync_all()?;
                drop(file);

                // The open mode is subject to the umask; reassert it
                fsutil::apply_mode(path, arc.mode)?;
                fsutil::set_times(path, arc.mod_time)?;
            }
        }

        fsutil::lchown(path, arc.uid, arc.gid)?;
        Ok(prog.statistics)
    }

    /// Materialize a file entry's full plaintext in memory
    pub fn decode_archive_data(&self, arc: &ItemData) -> Result<(Vec<u8>, Stats)> {
        let mut dat = Vec::with_capacity(arc.size as usize);
        let mut stats = Stats::default();

        if arc.item_type == ItemType::File {
            let index = arc.chunk_index();
            for num in 0..arc.chunks.len() as u32 {
                let chunk = arc.chunk_by_num(&index, num)?;
                let data = self.read_cached_chunk(chunk)?;
                stats.size += data.len() as u64;
                stats.storage_size += chunk.size;
                dat.extend_from_slice(&data);
            }
            stats.files += 1;
        }

        Ok((dat, stats))
    }

    /// Serve a random-access read: `arc` bytes `[offset, offset + size)`
    ///
    /// Reads past the end of the archive are truncated; an offset at or
    /// beyond the end yields an empty buffer. After serving, the next
    /// chunk is prefetched in the background to warm the cache.
    pub fn read_archive(&self, arc: &ItemData, offset: u64, size: usize) -> Result<Vec<u8>> {
        if arc.item_type != ItemType::File {
            return Ok(Vec::new());
        }

        let index = arc.chunk_index();
        let Some((mut needed, mut internal_offset)) = chunk_for_offset(arc, &index, offset)?
        else {
            return Ok(Vec::new());
        };

        let mut dat = Vec::with_capacity(size);
        while dat.len() < size && (needed as usize) < arc.chunks.len() {
            let chunk = arc.chunk_by_num(&index, needed)?;
            let block = self.read_cached_chunk(chunk)?;

            let rest = &block[internal_offset.min(block.len())..];
            let take = rest.len().min(size - dat.len());
            dat.extend_from_slice(&rest[..take]);

            internal_offset = 0;
            needed += 1;
        }

        // Warm the cache with the next block now
        if (needed as usize) < arc.chunks.len() {
            if let Ok(next) = arc.chunk_by_num(&index, needed) {
                let reader = self.clone();
                let next = next.clone();
                thread::spawn(move || {
                    let _ = reader.read_cached_chunk(&next);
                });
            }
        }

        Ok(dat)
    }

    /// Decode one chunk through the cache, coalescing concurrent loads
    fn read_cached_chunk(&self, chunk: &Chunk) -> Result<Bytes> {
        self.cache
            .get_or_load(&chunk.sha_sum, || self.load_chunk(chunk))
    }
}

/// Map a byte offset to `(chunk num, offset within that chunk)`
///
/// Linear scan over cumulative plaintext sizes in `num` order. `None`
/// means the offset is at or past the end of the archive.
fn chunk_for_offset(
    arc: &ItemData,
    index: &HashMap<u32, usize>,
    offset: u64,
) -> Result<Option<(u32, usize)>> {
    let mut size = 0u64;
    for num in 0..arc.chunks.len() as u32 {
        let chunk = arc
            .chunk_by_num(index, num)
            .map_err(|_| SnapSafeError::SeekFailed { offset })?;
        if size + chunk.original_size > offset {
            return Ok(Some((chunk.num, (offset - size) as usize)));
        }
        size += chunk.original_size;
    }

    Ok(None)
}

/// A background restore run
///
/// Progress records stream out while the worker restores entries; the
/// final statistics (or the first error) are returned by `wait`.
pub struct RestoreJob {
    /// Per-chunk progress records with cumulative statistics
    pub progress: mpsc::Receiver<Progress>,
    handle: thread::JoinHandle<Result<Stats>>,
}

impl RestoreJob {
    /// Block until the restore finishes
    pub fn wait(self) -> Result<Stats> {
        self.handle.join().map_err(|_| {
            SnapSafeError::Configuration("restore worker panicked".to_string())
        })?
    }
}

/// Restore a set of archive entries under `dst`
///
/// Entries are restored in the order given; errors stop the run and are
/// surfaced through the job result, leaving partially written files in
/// place for inspection.
pub fn restore_items(reader: ArchiveReader, items: Vec<ItemData>, dst: &Path) -> RestoreJob {
    let dst = dst.to_path_buf();
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let mut total = Stats::default();
        for arc in &items {
            let path = dst.join(&arc.path);
            let base = total;
            let entry = reader.decode_archive_with(arc, &path, |mut prog| {
                prog.statistics = base + prog.statistics;
                let _ = tx.send(prog);
            })?;
            total = base + entry;
        }
        Ok(total)
    });

    RestoreJob {
        progress: rx,
        handle,
    }
}
