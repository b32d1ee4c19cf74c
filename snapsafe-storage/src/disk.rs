//! Local filesystem backend
//!
//! The reference driver: realizes the repository layout on a local
//! directory tree. Claims the `file` URL scheme.

use crate::backend::{
    chunk_file_name, sub_dir_for_chunk, Backend, CHUNKS_DIR, REPOSITORY_FILENAME, SNAPSHOTS_DIR,
};
use snapsafe_core::error::{Result, SnapSafeError};
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Backend storing a repository on the local filesystem
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    /// Create a driver rooted at `root`. The directory itself is created
    /// by `init_repository`, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repository_path(&self) -> PathBuf {
        self.root.join(REPOSITORY_FILENAME)
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR).join(id)
    }

    fn chunk_path(&self, sha_sum: &str, part: u32, total_parts: u32) -> PathBuf {
        self.root
            .join(CHUNKS_DIR)
            .join(sub_dir_for_chunk(sha_sum))
            .join(chunk_file_name(sha_sum, part, total_parts))
    }

    /// Write a blob atomically: temp file in the target directory, then
    /// rename over the final name.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path.parent().ok_or_else(|| {
            SnapSafeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "blob path has no parent",
            ))
        })?;
        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl Backend for DiskBackend {
    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn protocols(&self) -> Vec<String> {
        vec!["file".to_string()]
    }

    fn description(&self) -> String {
        "Local Filesystem Storage".to_string()
    }

    fn available_space(&self) -> Result<u64> {
        let cpath = CString::new(self.root.as_os_str().as_bytes()).map_err(|_| {
            SnapSafeError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path contains interior NUL",
            ))
        })?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        if unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) } != 0 {
            return Err(SnapSafeError::Io(io::Error::last_os_error()));
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    fn init_repository(&self) -> Result<()> {
        let snapshots = self.root.join(SNAPSHOTS_DIR);
        let chunks = self.root.join(CHUNKS_DIR);
        if self.repository_path().exists() || snapshots.exists() || chunks.exists() {
            return Err(SnapSafeError::RepositoryExists);
        }
        fs::create_dir_all(&snapshots)?;
        fs::create_dir_all(&chunks)?;
        Ok(())
    }

    fn load_repository(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.repository_path())?)
    }

    fn save_repository(&self, data: &[u8]) -> Result<()> {
        self.write_atomic(&self.repository_path(), data)
    }

    fn load_snapshot(&self, id: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.snapshot_path(id))?)
    }

    fn save_snapshot(&self, id: &str, data: &[u8]) -> Result<()> {
        self.write_atomic(&self.snapshot_path(id), data)
    }

    fn load_chunk(&self, sha_sum: &str, part: u32, total_parts: u32) -> Result<Vec<u8>> {
        Ok(fs::read(self.chunk_path(sha_sum, part, total_parts))?)
    }

    fn store_chunk(&self, sha_sum: &str, part: u32, total_parts: u32, data: &[u8]) -> Result<u64> {
        let path = self.chunk_path(sha_sum, part, total_parts);
        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() == data.len() as u64 {
                // Shard is already stored
                debug!(sha_sum, part, "chunk shard already present, skipping");
                return Ok(0);
            }
        }

        fs::create_dir_all(path.parent().expect("chunk path has a parent"))?;
        self.write_atomic(&path, data)?;
        Ok(data.len() as u64)
    }
}
