//! Chunk types and the encode/decode pipeline
//!
//! Chunks are the fundamental unit of storage in SnapSafe. Each chunk is
//! content-addressed by the hex SHA-256 of its plaintext, and its stored
//! representation is the plaintext pushed through compress → encrypt →
//! Reed-Solomon split.

use crate::compress::{self, Compression};
use crate::crypto::{self, ContentAddress, Encryption, EncryptionKey};
use crate::erasure::{ErasureCoder, MAX_TOTAL_SHARDS};
use crate::error::{Result, SnapSafeError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A content-addressed chunk and its pipeline metadata
///
/// The chunk list of an archive entry may be stored in any order; `num`
/// is authoritative for reassembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Index within the parent archive (0-based)
    pub num: u32,

    /// Plaintext byte length before pipeline transforms
    pub original_size: u64,

    /// Byte length of the encoded payload fed into the erasure coder
    /// (post-compress, post-encrypt)
    pub size: u64,

    /// Hex SHA-256 of the plaintext; content address and cache key
    pub sha_sum: String,

    /// Hex SHA-256 recomputed on read for integrity verification.
    /// Equal to `sha_sum` for chunks written by this engine; kept as a
    /// separate field so future formats may address encrypted blobs.
    pub decrypted_sha_sum: String,

    /// Compression codec applied to the payload
    pub compressed: Compression,

    /// Encryption scheme applied to the payload
    pub encrypted: Encryption,

    /// Reed-Solomon shape; `parity_parts == 0` means a single stored blob
    pub data_parts: u32,
    pub parity_parts: u32,

    /// Computed shards, indexed 0..data_parts+parity_parts (write-time only)
    #[serde(skip)]
    pub data: Option<Vec<Bytes>>,
}

impl Chunk {
    /// Total number of stored shards for this chunk
    pub fn total_parts(&self) -> u32 {
        self.data_parts + self.parity_parts
    }

    /// Expected byte length of every shard of this chunk
    pub fn shard_size(&self) -> usize {
        (self.size as usize).div_ceil(self.data_parts as usize)
    }
}

/// Write-side chunk transform: plaintext in, shards out
///
/// One pipeline is built per store run and applied to every chunk, so
/// all chunks of a snapshot share the same codec settings and shape.
pub struct ChunkPipeline {
    compression: Compression,
    encryption: Encryption,
    key: Option<EncryptionKey>,
    data_parts: u32,
    parity_parts: u32,
    coder: Option<ErasureCoder>,
}

impl ChunkPipeline {
    /// Create a pipeline for the given settings
    ///
    /// `key` must be present when `encryption` is AES. A shape with
    /// `parity_parts == 0` disables erasure coding; the payload is then
    /// stored as a single blob (`data_parts` forced to 1).
    pub fn new(
        compression: Compression,
        encryption: Encryption,
        key: Option<EncryptionKey>,
        data_parts: u32,
        parity_parts: u32,
    ) -> Result<Self> {
        if data_parts == 0 {
            return Err(SnapSafeError::ErasureCoding(
                "data_parts must be > 0".to_string(),
            ));
        }
        if parity_parts > 0 && (data_parts + parity_parts) as usize > MAX_TOTAL_SHARDS {
            return Err(SnapSafeError::ErasureCoding(format!(
                "total shards {} exceed the GF(2^8) limit of {}",
                data_parts + parity_parts,
                MAX_TOTAL_SHARDS
            )));
        }
        if encryption == Encryption::Aes && key.is_none() {
            return Err(SnapSafeError::Configuration(
                "AES encryption requested but no repository key available".to_string(),
            ));
        }
        let data_parts = if parity_parts == 0 { 1 } else { data_parts };
        let coder = if parity_parts > 0 {
            Some(ErasureCoder::new(data_parts as usize, parity_parts as usize)?)
        } else {
            None
        };
        Ok(Self {
            compression,
            encryption,
            key,
            data_parts,
            parity_parts,
            coder,
        })
    }

    /// Run the write transform over one plaintext block
    pub fn encode(&self, num: u32, plaintext: &[u8]) -> Result<Chunk> {
        let sha_sum = ContentAddress::compute(plaintext).to_hex();
        let original_size = plaintext.len() as u64;

        let mut payload = compress::compress(self.compression, plaintext)?;

        if self.encrypted() {
            let key = self.key.as_ref().ok_or_else(|| {
                SnapSafeError::Configuration("pipeline misconfigured: no key".to_string())
            })?;
            payload = crypto::encrypt(&payload, key)?;
        }

        let size = payload.len() as u64;

        let shards = match &self.coder {
            Some(coder) => coder.split(&payload)?,
            None => vec![Bytes::from(payload)],
        };

        Ok(Chunk {
            num,
            original_size,
            size,
            decrypted_sha_sum: sha_sum.clone(),
            sha_sum,
            compressed: self.compression,
            encrypted: self.encryption,
            data_parts: self.data_parts,
            parity_parts: self.parity_parts,
            data: Some(shards),
        })
    }

    fn encrypted(&self) -> bool {
        self.encryption == Encryption::Aes
    }
}

/// Read-side chunk transform: encoded payload in, verified plaintext out
///
/// Inverts encrypt and compress according to the chunk record, then
/// checks the plaintext SHA-256 against `decrypted_sha_sum`. The AEAD
/// authentication tag and the checksum must both hold.
pub fn decode_chunk(chunk: &Chunk, payload: Vec<u8>, key: Option<&EncryptionKey>) -> Result<Vec<u8>> {
    let mut data = payload;

    if chunk.encrypted == Encryption::Aes {
        let key = key.ok_or_else(|| {
            SnapSafeError::Decryption("chunk is encrypted but no password was given".to_string())
        })?;
        data = crypto::decrypt(&data, key)?;
    }

    if chunk.compressed == Compression::Gzip {
        data = compress::decompress(Compression::Gzip, &data)?;
    }

    let found = ContentAddress::compute(&data).to_hex();
    if chunk.decrypted_sha_sum != found {
        return Err(SnapSafeError::ChecksumMismatch {
            method: "sha256".to_string(),
            expected: chunk.decrypted_sha_sum.clone(),
            found,
        });
    }

    Ok(data)
}
