//! Error types for SnapSafe
//!
//! Provides a unified error type shared by all SnapSafe crates.

use thiserror::Error;

/// Result type alias for SnapSafe operations
pub type Result<T> = std::result::Result<T, SnapSafeError>;

/// Unified error type for SnapSafe
#[derive(Error, Debug)]
pub enum SnapSafeError {
    // ===== Configuration Errors =====
    #[error("failure tolerance must be lower than the number of storage backends")]
    RedundancyAmount,

    #[error("repository already exists")]
    RepositoryExists,

    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Backend Errors =====
    #[error("unable to load chunk from any storage backend")]
    LoadChunkFailed,

    #[error("unable to load snapshot from any storage backend")]
    LoadSnapshotFailed,

    #[error("unable to load repository from any storage backend")]
    LoadRepositoryFailed,

    // ===== Structural Errors =====
    #[error("could not find chunk #{num}")]
    ChunkNotFound { num: u32 },

    #[error("could not seek to offset {offset}")]
    SeekFailed { offset: u64 },

    // ===== Integrity Errors =====
    #[error("{method} mismatch, expected {expected}, got {found}")]
    ChecksumMismatch {
        method: String,
        expected: String,
        found: String,
    },

    #[error(
        "could not reconstruct chunk #{num}, got {blocks_found} out of {data_parts} parts \
         ({failed_backends} backends missing data)"
    )]
    DataReconstruction {
        num: u32,
        data_parts: u32,
        blocks_found: u32,
        failed_backends: u32,
    },

    // ===== Pipeline Errors =====
    #[error("Erasure coding error: {0}")]
    ErasureCoding(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Compression error: {0}")]
    Compression(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reed_solomon_erasure::Error> for SnapSafeError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        SnapSafeError::ErasureCoding(err.to_string())
    }
}
