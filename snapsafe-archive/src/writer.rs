//! Archive writer
//!
//! Walks filesystem trees, streams file bytes through the chunk pipeline
//! and places the shards across the repository's backends. Progress is
//! emitted on a channel from a worker thread; the produced archive
//! entries and final statistics come back when the job is joined.

use crate::item::{ItemData, ItemType, Progress, Stats};
use crate::repository::Repository;
use snapsafe_core::chunk::ChunkPipeline;
use snapsafe_core::compress::Compression;
use snapsafe_core::crypto::Encryption;
use snapsafe_core::error::{Result, SnapSafeError};
use snapsafe_core::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use std::fs;
use std::io::Read;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Options for one store run
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Free-form snapshot label
    pub description: String,

    /// Payload compression, off by default
    pub compression: Compression,

    /// Payload encryption, AES by default
    pub encryption: Encryption,

    /// Number of backend failures the snapshot must survive.
    /// Must be lower than the number of attached backends.
    pub failure_tolerance: u32,

    /// Plaintext bytes per chunk, clamped to the engine bounds
    pub chunk_size: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            description: String::new(),
            compression: Compression::None,
            encryption: Encryption::Aes,
            failure_tolerance: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SnapshotOptions {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn with_failure_tolerance(mut self, tolerance: u32) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// A background store run
pub struct StoreJob {
    /// Per-chunk progress records with cumulative statistics
    pub progress: mpsc::Receiver<Progress>,
    handle: thread::JoinHandle<Result<(Vec<ItemData>, Stats)>>,
}

impl std::fmt::Debug for StoreJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreJob").finish_non_exhaustive()
    }
}

impl StoreJob {
    /// Block until the store finishes, returning the archive entries
    /// produced and the final statistics
    pub fn wait(self) -> Result<(Vec<ItemData>, Stats)> {
        self.handle.join().map_err(|_| {
            SnapSafeError::Configuration("store worker panicked".to_string())
        })?
    }
}

/// Streams filesystem trees into a repository
pub struct ArchiveWriter {
    repo: Arc<Repository>,
}

impl ArchiveWriter {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Store `targets` (paths under `root`) as archive entries
    ///
    /// The erasure shape is derived from the failure tolerance: with N
    /// backends and tolerance T, chunks are split `(N - T, T)` so any T
    /// backends may be lost. Validation happens before any I/O.
    pub fn store(
        &self,
        root: &Path,
        targets: &[PathBuf],
        options: SnapshotOptions,
    ) -> Result<StoreJob> {
        let backends = self.repo.manager().backend_count() as u32;
        if options.failure_tolerance >= backends {
            return Err(SnapSafeError::RedundancyAmount);
        }

        let data_parts = backends - options.failure_tolerance;
        let pipeline = ChunkPipeline::new(
            options.compression,
            options.encryption,
            self.repo.key().cloned(),
            data_parts,
            options.failure_tolerance,
        )?;
        let chunk_size = options.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);

        info!(
            description = %options.description,
            backends,
            tolerance = options.failure_tolerance,
            "starting store run"
        );

        let repo = self.repo.clone();
        let root = root.to_path_buf();
        let targets = targets.to_vec();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let worker = StoreWorker {
                repo,
                pipeline,
                chunk_size,
                root,
                progress: tx,
                stats: Stats::default(),
            };
            worker.run(&targets)
        });

        Ok(StoreJob {
            progress: rx,
            handle,
        })
    }
}

struct StoreWorker {
    repo: Arc<Repository>,
    pipeline: ChunkPipeline,
    chunk_size: usize,
    root: PathBuf,
    progress: mpsc::Sender<Progress>,
    stats: Stats,
}

impl StoreWorker {
    fn run(mut self, targets: &[PathBuf]) -> Result<(Vec<ItemData>, Stats)> {
        let mut items = Vec::new();

        for target in targets {
            for entry in walkdir::WalkDir::new(target).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    SnapSafeError::Io(e.into_io_error().unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "walk failed")
                    }))
                })?;
                let item = self.store_entry(entry.path())?;
                items.push(item);
            }
        }

        Ok((items, self.stats))
    }

    fn store_entry(&mut self, path: &Path) -> Result<ItemData> {
        let meta = fs::symlink_metadata(path)?;
        let rel = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        let mut item = ItemData {
            path: rel,
            item_type: ItemType::File,
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
            mod_time: meta.mtime() * 1_000_000_000 + meta.mtime_nsec(),
            points_to: None,
            chunks: Vec::new(),
            size: 0,
            storage_size: 0,
        };

        let file_type = meta.file_type();
        if file_type.is_dir() {
            item.item_type = ItemType::Directory;
            self.stats.dirs += 1;
            self.emit(&item);
        } else if file_type.is_symlink() {
            item.item_type = ItemType::SymLink;
            item.points_to = Some(fs::read_link(path)?.to_string_lossy().into_owned());
            self.stats.symlinks += 1;
            self.emit(&item);
        } else {
            self.stats.files += 1;
            self.store_file(path, &mut item)?;
        }

        Ok(item)
    }

    /// Stream one file into chunks and place them across the backends
    fn store_file(&mut self, path: &Path, item: &mut ItemData) -> Result<()> {
        let mut file = fs::File::open(path)?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut num = 0u32;

        loop {
            let filled = read_block(&mut file, &mut buf)?;
            if filled == 0 {
                break;
            }

            let mut chunk = self.pipeline.encode(num, &buf[..filled])?;
            let stored = self.repo.manager().store_chunk(&chunk)?;

            // Shards are on the backends now; only the record is kept
            chunk.data = None;

            item.size += chunk.original_size;
            item.storage_size += stored;
            self.stats.size += chunk.original_size;
            self.stats.storage_size += stored;
            debug!(path = %item.path, num, sha_sum = %chunk.sha_sum, "stored chunk");
            item.chunks.push(chunk);

            self.emit(item);
            num += 1;
        }

        Ok(())
    }

    fn emit(&self, item: &ItemData) {
        // Progress is advisory; a dropped receiver must not stop the run
        let _ = self.progress.send(Progress {
            path: item.path.clone(),
            size: item.size,
            storage_size: item.storage_size,
            statistics: self.stats,
        });
    }
}

/// Fill `buf` as far as the reader allows, returning the filled length
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
