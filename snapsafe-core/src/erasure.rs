//! Reed-Solomon erasure coding
//!
//! A chunk payload is split into `data_parts` equal-length shards plus
//! `parity_parts` parity shards over GF(2^8). Any `data_parts` of the
//! `data_parts + parity_parts` shards suffice to reconstruct the payload,
//! so a repository spread over that many backends tolerates the loss of
//! any `parity_parts` of them.

use crate::error::{Result, SnapSafeError};
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Classical RS over GF(2^8) caps the total shard count
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Reed-Solomon splitter/joiner for one `(data_parts, parity_parts)` shape
pub struct ErasureCoder {
    data_parts: usize,
    parity_parts: usize,
    codec: ReedSolomon,
}

impl ErasureCoder {
    /// Create a coder for the given shape
    ///
    /// Requires `data_parts >= 1`, `parity_parts >= 1` and
    /// `data_parts + parity_parts <= 256`. Chunks written without parity
    /// are stored as a single blob and never pass through the coder.
    pub fn new(data_parts: usize, parity_parts: usize) -> Result<Self> {
        if data_parts == 0 {
            return Err(SnapSafeError::ErasureCoding(
                "data_parts must be > 0".to_string(),
            ));
        }
        if parity_parts == 0 {
            return Err(SnapSafeError::ErasureCoding(
                "parity_parts must be > 0".to_string(),
            ));
        }
        if data_parts + parity_parts > MAX_TOTAL_SHARDS {
            return Err(SnapSafeError::ErasureCoding(format!(
                "total shards {} exceed the GF(2^8) limit of {}",
                data_parts + parity_parts,
                MAX_TOTAL_SHARDS
            )));
        }
        let codec = ReedSolomon::new(data_parts, parity_parts)?;
        Ok(Self {
            data_parts,
            parity_parts,
            codec,
        })
    }

    /// Total number of shards
    pub fn total_shards(&self) -> usize {
        self.data_parts + self.parity_parts
    }

    /// Length of each shard for a payload of `size` bytes
    pub fn shard_size(&self, size: usize) -> usize {
        size.div_ceil(self.data_parts)
    }

    /// Split a payload into `data_parts + parity_parts` equal-length shards
    ///
    /// The last data shard is zero-padded; `join` trims the padding back
    /// off using the recorded payload size.
    pub fn split(&self, data: &[u8]) -> Result<Vec<Bytes>> {
        if data.is_empty() {
            return Err(SnapSafeError::ErasureCoding(
                "cannot split an empty payload".to_string(),
            ));
        }
        let shard_size = self.shard_size(data.len());

        // Pad data to be evenly divisible by data_parts
        let padded_size = shard_size * self.data_parts;
        let mut padded_data = data.to_vec();
        padded_data.resize(padded_size, 0);

        // Split into data shards
        let mut shards: Vec<Vec<u8>> = padded_data.chunks(shard_size).map(|c| c.to_vec()).collect();

        // Add empty parity shards
        for _ in 0..self.parity_parts {
            shards.push(vec![0u8; shard_size]);
        }

        // Encode (fills in parity shards)
        self.codec.encode(&mut shards)?;

        Ok(shards.into_iter().map(Bytes::from).collect())
    }

    /// Recompute missing shards in place
    ///
    /// Requires at least `data_parts` present shards; missing shards are
    /// `None` and are filled in on success.
    pub fn reconstruct(&self, shards: &mut Vec<Option<Vec<u8>>>) -> Result<()> {
        if shards.len() != self.total_shards() {
            return Err(SnapSafeError::ErasureCoding(format!(
                "expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }
        self.codec.reconstruct(shards)?;
        Ok(())
    }

    /// Join data shards back into a payload of exactly `size` bytes
    pub fn join(&self, shards: &[Option<Vec<u8>>], size: usize) -> Result<Vec<u8>> {
        let mut result = Vec::with_capacity(self.shard_size(size) * self.data_parts);
        for (i, shard) in shards.iter().take(self.data_parts).enumerate() {
            match shard {
                Some(data) => result.extend_from_slice(data),
                None => {
                    return Err(SnapSafeError::ErasureCoding(format!(
                        "data shard {i} missing after reconstruction"
                    )))
                }
            }
        }
        if result.len() < size {
            return Err(SnapSafeError::ErasureCoding(format!(
                "joined {} bytes, expected {}",
                result.len(),
                size
            )));
        }

        // Trim zero padding off the last data shard
        result.truncate(size);
        Ok(result)
    }

    /// Verify that parity shards are consistent with the data shards
    pub fn verify(&self, shards: &[Bytes]) -> Result<bool> {
        if shards.len() != self.total_shards() {
            return Ok(false);
        }
        let refs: Vec<&[u8]> = shards.iter().map(|s| s.as_ref()).collect();
        Ok(self.codec.verify(&refs)?)
    }
}
