//! Chunk payload compression
//!
//! The repository format supports exactly one compression codec, gzip.
//! The codec applied to a chunk is recorded in its metadata so readers
//! can decode chunks written under a different setting.

use crate::error::{Result, SnapSafeError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression codec applied to a chunk payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// Parse a codec name as used in snapshot options ("none", "gzip")
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            other => Err(SnapSafeError::Configuration(format!(
                "unknown compression codec: {other}"
            ))),
        }
    }
}

/// Compress a payload with the given codec
pub fn compress(codec: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| SnapSafeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| SnapSafeError::Compression(e.to_string()))
        }
    }
}

/// Decompress a payload written with the given codec
pub fn decompress(codec: Compression, data: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| SnapSafeError::Compression(e.to_string()))?;
            Ok(out)
        }
    }
}
