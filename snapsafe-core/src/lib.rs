//! SnapSafe Core Library
//!
//! Core abstractions for the SnapSafe backup engine.
//! This crate provides:
//! - The chunk pipeline (content addressing, gzip, AES-GCM, Reed-Solomon)
//! - Cryptographic primitives (SHA-256 addressing, Argon2 key derivation)
//! - Common types and error handling

pub mod chunk;
pub mod compress;
pub mod crypto;
pub mod erasure;
pub mod error;

pub use chunk::{decode_chunk, Chunk, ChunkPipeline};
pub use compress::Compression;
pub use crypto::{ContentAddress, Encryption, EncryptionKey};
pub use erasure::ErasureCoder;
pub use error::{Result, SnapSafeError};

/// Chunk size bounds for the archive writer
pub const MIN_CHUNK_SIZE: usize = 64 * 1024; // 64 KB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MB
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024; // 16 MB
