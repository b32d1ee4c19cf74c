//! End-to-end tests for the SnapSafe engine
//!
//! Each test drives the full pipeline: files → chunks → compress/encrypt
//! → erasure shards → backends, and back out through restore, in-memory
//! materialize or random access.

use snapsafe_archive::{
    restore_items, ArchiveReader, ArchiveWriter, ItemData, ItemType, Repository, SnapshotOptions,
};
use snapsafe_core::compress::Compression;
use snapsafe_core::crypto::Encryption;
use snapsafe_core::error::SnapSafeError;
use snapsafe_storage::{BackendManager, MemoryBackend};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Repository over `n` in-memory backends, plus handles to the backends
/// so tests can inspect and damage stored shards
fn memory_repository(n: usize, password: Option<&str>) -> (Arc<Repository>, Vec<Arc<MemoryBackend>>) {
    let mut manager = BackendManager::new();
    let mut memories = Vec::new();
    for _ in 0..n {
        let mem = Arc::new(MemoryBackend::new());
        manager.add_backend(Box::new(mem.clone()));
        memories.push(mem);
    }
    let repo = Repository::init(manager, password).unwrap();
    (Arc::new(repo), memories)
}

/// Deterministic pseudo-random buffer
fn pattern(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u64).wrapping_mul(2654435761).to_le_bytes()[0])
        .collect()
}

fn write_source(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, data).unwrap();
    path
}

fn store_one(
    repo: &Arc<Repository>,
    root: &TempDir,
    target: PathBuf,
    options: SnapshotOptions,
) -> Vec<ItemData> {
    let writer = ArchiveWriter::new(repo.clone());
    let job = writer.store(root.path(), &[target], options).unwrap();
    let (items, _stats) = job.wait().unwrap();
    items
}

#[test]
fn test_erasure_across_backends_survives_two_losses() {
    // 64 KiB over 5 backends with tolerance 2: shape (3, 2)
    let (repo, memories) = memory_repository(5, None);
    let src = TempDir::new().unwrap();
    let data = pattern(64 * 1024);
    let target = write_source(&src, "data.bin", &data);

    let options = SnapshotOptions::default()
        .with_encryption(Encryption::None)
        .with_failure_tolerance(2);
    let items = store_one(&repo, &src, target, options);

    assert_eq!(items.len(), 1);
    let arc = &items[0];
    assert_eq!(arc.chunks.len(), 1);
    let chunk = &arc.chunks[0];
    assert_eq!(chunk.data_parts, 3);
    assert_eq!(chunk.parity_parts, 2);

    // Destroy two of the five shards, wherever they landed
    let mut evicted = 0;
    for part in [0u32, 3u32] {
        for mem in &memories {
            if mem.evict_shard(&chunk.sha_sum, part, chunk.data_parts) {
                evicted += 1;
                break;
            }
        }
    }
    assert_eq!(evicted, 2);

    // Restore and compare byte for byte
    let dst = TempDir::new().unwrap();
    let reader = ArchiveReader::new(repo);
    let out = dst.path().join("data.bin");
    reader.decode_archive(arc, &out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), data);
}

#[test]
fn test_losing_more_shards_than_parity_fails() {
    let (repo, memories) = memory_repository(5, None);
    let src = TempDir::new().unwrap();
    let target = write_source(&src, "data.bin", &pattern(64 * 1024));

    let options = SnapshotOptions::default()
        .with_encryption(Encryption::None)
        .with_failure_tolerance(2);
    let items = store_one(&repo, &src, target, options);
    let chunk = &items[0].chunks[0];

    // p + 1 losses cannot be reconstructed
    for part in [0u32, 2u32, 4u32] {
        for mem in &memories {
            if mem.evict_shard(&chunk.sha_sum, part, chunk.data_parts) {
                break;
            }
        }
    }

    let reader = ArchiveReader::new(repo);
    let err = reader.decode_archive_data(&items[0]).unwrap_err();
    match err {
        SnapSafeError::DataReconstruction {
            blocks_found,
            failed_backends,
            ..
        } => {
            assert_eq!(blocks_found, 2);
            assert_eq!(failed_backends, 3);
        }
        other => panic!("expected reconstruction failure, got {other}"),
    }
}

#[test]
fn test_gzip_aes_small_file() {
    let (repo, _) = memory_repository(1, Some("correct horse"));
    let src = TempDir::new().unwrap();
    let target = write_source(&src, "hello.txt", b"hello world\n");

    let options = SnapshotOptions::default().with_compression(Compression::Gzip);
    let items = store_one(&repo, &src, target, options);

    let arc = &items[0];
    assert_eq!(arc.chunks.len(), 1);
    let chunk = &arc.chunks[0];
    assert_eq!(chunk.original_size, 12);
    assert_eq!(
        chunk.sha_sum,
        "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
    );
    assert_eq!(chunk.compressed, Compression::Gzip);
    assert_eq!(chunk.encrypted, Encryption::Aes);

    let reader = ArchiveReader::new(repo);
    let (data, stats) = reader.decode_archive_data(arc).unwrap();
    assert_eq!(data, b"hello world\n");
    assert_eq!(stats.files, 1);
    assert_eq!(stats.size, 12);
}

#[test]
fn test_redundancy_amount_before_any_io() {
    let (repo, memories) = memory_repository(3, None);
    let src = TempDir::new().unwrap();
    let target = write_source(&src, "data.bin", &pattern(1024));

    let writer = ArchiveWriter::new(repo);
    let options = SnapshotOptions::default()
        .with_encryption(Encryption::None)
        .with_failure_tolerance(3);
    let err = writer.store(src.path(), &[target], options).unwrap_err();

    assert!(matches!(err, SnapSafeError::RedundancyAmount));
    for mem in &memories {
        assert_eq!(mem.shard_count(), 0);
    }
}

#[test]
fn test_init_repository_twice_fails() {
    let mem = Arc::new(MemoryBackend::new());

    let mut manager = BackendManager::new();
    manager.add_backend(Box::new(mem.clone()));
    Repository::init(manager, None).unwrap();

    let mut manager = BackendManager::new();
    manager.add_backend(Box::new(mem));
    assert!(matches!(
        Repository::init(manager, None),
        Err(SnapSafeError::RepositoryExists)
    ));
}

#[test]
fn test_truncated_shard_recovered_by_reconstruction() {
    // Shape (2, 1) over 3 backends; one data shard loses its last byte
    let (repo, memories) = memory_repository(3, None);
    let src = TempDir::new().unwrap();
    let data = pattern(4321);
    let target = write_source(&src, "data.bin", &data);

    let options = SnapshotOptions::default()
        .with_encryption(Encryption::None)
        .with_failure_tolerance(1);
    let items = store_one(&repo, &src, target, options);
    let chunk = &items[0].chunks[0];
    assert_eq!((chunk.data_parts, chunk.parity_parts), (2, 1));

    let mut truncated = false;
    for mem in &memories {
        if mem.corrupt_shard(&chunk.sha_sum, 0, chunk.data_parts, |shard| {
            shard.pop();
        }) {
            truncated = true;
            break;
        }
    }
    assert!(truncated);

    let reader = ArchiveReader::new(repo);
    let (restored, _) = reader.decode_archive_data(&items[0]).unwrap();
    assert_eq!(restored, data);
}

#[test]
fn test_corrupt_blob_fails_checksum() {
    // No parity, no encryption: the sha256 check is the only guard
    let (repo, memories) = memory_repository(1, None);
    let src = TempDir::new().unwrap();
    let target = write_source(&src, "data.bin", &pattern(2048));

    let options = SnapshotOptions::default().with_encryption(Encryption::None);
    let items = store_one(&repo, &src, target, options);
    let chunk = &items[0].chunks[0];
    assert_eq!(chunk.parity_parts, 0);

    assert!(memories[0].corrupt_shard(&chunk.sha_sum, 0, chunk.data_parts, |shard| {
        shard[10] ^= 0x01;
    }));

    let reader = ArchiveReader::new(repo);
    let err = reader.decode_archive_data(&items[0]).unwrap_err();
    match err {
        SnapSafeError::ChecksumMismatch { method, .. } => assert_eq!(method, "sha256"),
        other => panic!("expected checksum mismatch, got {other}"),
    }
}

#[test]
fn test_random_access_matches_slices() {
    let (repo, _) = memory_repository(2, Some("pw"));
    let src = TempDir::new().unwrap();
    // Several chunks at the minimum chunk size
    let data = pattern(200_000);
    let target = write_source(&src, "data.bin", &data);

    let options = SnapshotOptions::default()
        .with_compression(Compression::Gzip)
        .with_failure_tolerance(1)
        .with_chunk_size(64 * 1024);
    let items = store_one(&repo, &src, target, options);
    let arc = &items[0];
    assert!(arc.chunks.len() > 2);

    let reader = ArchiveReader::new(repo);
    for (offset, size) in [
        (0usize, 10usize),
        (1, 0),
        (65_535, 2),
        (65_536, 65_536),
        (100_000, 50_000),
        (199_990, 100),
        (0, 200_000),
        (200_000, 10),
    ] {
        let got = reader.read_archive(arc, offset as u64, size).unwrap();
        let want = &data[offset.min(data.len())..(offset + size).min(data.len())];
        assert_eq!(got, want, "offset {offset} size {size}");
    }
}

#[test]
fn test_read_ahead_warms_cache() {
    let (repo, _) = memory_repository(1, None);
    let src = TempDir::new().unwrap();
    let data = pattern(160_000);
    let target = write_source(&src, "data.bin", &data);

    let options = SnapshotOptions::default()
        .with_encryption(Encryption::None)
        .with_chunk_size(64 * 1024);
    let items = store_one(&repo, &src, target, options);
    let arc = &items[0];
    assert_eq!(arc.chunks.len(), 3);

    let cache = Arc::new(snapsafe_archive::ChunkCache::new());
    let reader = ArchiveReader::with_cache(repo, cache.clone());

    // Reading within chunk 0 should speculatively pull in chunk 1
    reader.read_archive(arc, 0, 100).unwrap();
    let second = &arc.chunks.iter().find(|c| c.num == 1).unwrap().sha_sum;
    for _ in 0..100 {
        if cache.get(second).is_some() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    panic!("read-ahead never warmed the cache");
}

#[test]
fn test_restore_tree_fidelity() {
    let (repo, _) = memory_repository(2, Some("pw"));

    // Source tree: dir with custom mode, file with custom mode, symlink
    let src = TempDir::new().unwrap();
    let tree = src.path().join("tree");
    fs::create_dir(&tree).unwrap();
    let sub = tree.join("sub");
    fs::create_dir(&sub).unwrap();
    fs::set_permissions(&sub, fs::Permissions::from_mode(0o750)).unwrap();
    let data = pattern(70_000);
    fs::write(tree.join("file.bin"), &data).unwrap();
    fs::set_permissions(tree.join("file.bin"), fs::Permissions::from_mode(0o640)).unwrap();
    std::os::unix::fs::symlink("file.bin", tree.join("link")).unwrap();

    let options = SnapshotOptions::default().with_failure_tolerance(1);
    let writer = ArchiveWriter::new(repo.clone());
    let job = writer.store(src.path(), &[tree.clone()], options).unwrap();
    let (items, stats) = job.wait().unwrap();

    assert_eq!(stats.files, 1);
    assert_eq!(stats.dirs, 2);
    assert_eq!(stats.symlinks, 1);
    assert_eq!(stats.size, 70_000);

    // Restore into a fresh destination
    let dst = TempDir::new().unwrap();
    let reader = ArchiveReader::new(repo);
    let job = restore_items(reader, items, dst.path());
    let restored_stats = job.wait().unwrap();
    assert_eq!(restored_stats.files, 1);
    assert_eq!(restored_stats.dirs, 2);
    assert_eq!(restored_stats.symlinks, 1);

    let out = dst.path().join("tree");
    assert_eq!(fs::read(out.join("file.bin")).unwrap(), data);
    assert_eq!(
        fs::metadata(out.join("file.bin")).unwrap().mode() & 0o777,
        0o640
    );
    assert_eq!(fs::metadata(out.join("sub")).unwrap().mode() & 0o777, 0o750);
    assert_eq!(
        fs::read_link(out.join("link")).unwrap(),
        PathBuf::from("file.bin")
    );

    // mtime restored to the second
    let src_meta = fs::metadata(tree.join("file.bin")).unwrap();
    let dst_meta = fs::metadata(out.join("file.bin")).unwrap();
    assert_eq!(src_meta.mtime(), dst_meta.mtime());
    assert_eq!(src_meta.uid(), dst_meta.uid());
    assert_eq!(src_meta.gid(), dst_meta.gid());
}

#[test]
fn test_duplicate_content_is_deduplicated() {
    let (repo, memories) = memory_repository(1, None);
    let src = TempDir::new().unwrap();
    let data = pattern(10_000);
    let target_a = write_source(&src, "a.bin", &data);
    let target_b = write_source(&src, "b.bin", &data);

    let options = SnapshotOptions::default().with_encryption(Encryption::None);
    store_one(&repo, &src, target_a, options.clone());
    let shards_after_first = memories[0].shard_count();

    // Same bytes under another name: no new shards appear.
    // Encryption would break this, a fresh nonce changes the blob.
    store_one(&repo, &src, target_b, options);
    assert_eq!(memories[0].shard_count(), shards_after_first);
}

#[test]
fn test_store_progress_reaches_totals() {
    let (repo, _) = memory_repository(1, None);
    let src = TempDir::new().unwrap();
    let data = pattern(150_000);
    let target = write_source(&src, "data.bin", &data);

    let writer = ArchiveWriter::new(repo);
    let options = SnapshotOptions::default()
        .with_encryption(Encryption::None)
        .with_chunk_size(64 * 1024);
    let job = writer.store(src.path(), &[target], options).unwrap();

    let progress: Vec<_> = job.progress.iter().collect();
    let (items, stats) = job.wait().unwrap();

    assert!(!progress.is_empty());
    let last = progress.last().unwrap();
    assert_eq!(last.path, "data.bin");
    assert_eq!(last.statistics, stats);
    assert_eq!(stats.size, 150_000);
    assert_eq!(items[0].size, 150_000);
    // Sizes grow monotonically along the stream
    assert!(progress.windows(2).all(|w| w[0].size <= w[1].size));
}

#[test]
fn test_empty_file_roundtrip() {
    let (repo, _) = memory_repository(1, None);
    let src = TempDir::new().unwrap();
    let target = write_source(&src, "empty", b"");

    let options = SnapshotOptions::default().with_encryption(Encryption::None);
    let items = store_one(&repo, &src, target, options);
    assert_eq!(items[0].chunks.len(), 0);
    assert_eq!(items[0].size, 0);

    let dst = TempDir::new().unwrap();
    let reader = ArchiveReader::new(repo);
    let out = dst.path().join("empty");
    reader.decode_archive(&items[0], &out).unwrap();
    assert_eq!(fs::read(&out).unwrap(), b"");

    // Random access on an empty file yields nothing
    assert!(reader.read_archive(&items[0], 0, 16).unwrap().is_empty());
}

#[test]
fn test_wrong_password_cannot_decode() {
    let mem = Arc::new(MemoryBackend::new());

    let mut manager = BackendManager::new();
    manager.add_backend(Box::new(mem.clone()));
    let repo = Arc::new(Repository::init(manager, Some("right")).unwrap());

    let src = TempDir::new().unwrap();
    let target = write_source(&src, "secret.txt", b"classified payload");
    let items = store_one(&repo, &src, target, SnapshotOptions::default());

    let mut manager = BackendManager::new();
    manager.add_backend(Box::new(mem));
    let wrong = Arc::new(Repository::open(manager, Some("wrong")).unwrap());
    let reader = ArchiveReader::new(wrong);
    assert!(matches!(
        reader.decode_archive_data(&items[0]),
        Err(SnapSafeError::Decryption(_))
    ));
}

#[test]
fn test_item_types_recorded() {
    let (repo, _) = memory_repository(1, None);
    let src = TempDir::new().unwrap();
    let tree = src.path().join("t");
    fs::create_dir(&tree).unwrap();
    fs::write(tree.join("f"), b"x").unwrap();
    std::os::unix::fs::symlink("f", tree.join("l")).unwrap();

    let options = SnapshotOptions::default().with_encryption(Encryption::None);
    let items = store_one(&repo, &src, tree, options);

    let kind = |p: &str| {
        items
            .iter()
            .find(|i| i.path == p)
            .map(|i| i.item_type)
            .unwrap()
    };
    assert_eq!(kind("t"), ItemType::Directory);
    assert_eq!(kind("t/f"), ItemType::File);
    assert_eq!(kind("t/l"), ItemType::SymLink);
    assert_eq!(
        items.iter().find(|i| i.path == "t/l").unwrap().points_to,
        Some("f".to_string())
    );
}
