//! Repository handle
//!
//! A thin wrapper tying a backend manager to the repository's derived
//! encryption key. The metadata blob it owns is deliberately minimal:
//! a format version and the Argon2 salt, so the same password derives
//! the same key on every open. Snapshot bookkeeping above the chunk
//! layer stays with the caller; the blobs pass through opaquely.

use serde::{Deserialize, Serialize};
use snapsafe_core::crypto::{self, EncryptionKey, SALT_SIZE};
use snapsafe_core::error::{Result, SnapSafeError};
use snapsafe_storage::BackendManager;
use tracing::info;

/// Current repository metadata format version
pub const REPOSITORY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RepositoryMeta {
    version: u32,
    salt: [u8; SALT_SIZE],
}

/// An open repository: backends plus the derived chunk encryption key
pub struct Repository {
    manager: BackendManager,
    key: Option<EncryptionKey>,
}

impl Repository {
    /// Create a new repository across all attached backends
    ///
    /// Initializes the storage layout everywhere, generates a fresh KDF
    /// salt and mirrors the metadata blob. `RepositoryExists` surfaces
    /// before any key derivation if a layout is already present.
    pub fn init(manager: BackendManager, password: Option<&str>) -> Result<Self> {
        manager.init_repository()?;

        let salt = crypto::generate_salt();
        let meta = RepositoryMeta {
            version: REPOSITORY_VERSION,
            salt,
        };
        let blob = bincode::serialize(&meta)
            .map_err(|e| SnapSafeError::Serialization(e.to_string()))?;
        manager.save_repository(&blob)?;

        let key = Self::derive_key(password, &salt)?;
        info!(backends = manager.backend_count(), "initialized repository");
        Ok(Self { manager, key })
    }

    /// Open an existing repository
    pub fn open(manager: BackendManager, password: Option<&str>) -> Result<Self> {
        let blob = manager.load_repository()?;
        let meta: RepositoryMeta = bincode::deserialize(&blob)
            .map_err(|e| SnapSafeError::Serialization(e.to_string()))?;
        if meta.version != REPOSITORY_VERSION {
            return Err(SnapSafeError::Configuration(format!(
                "unsupported repository version {}",
                meta.version
            )));
        }

        let key = Self::derive_key(password, &meta.salt)?;
        Ok(Self { manager, key })
    }

    fn derive_key(password: Option<&str>, salt: &[u8]) -> Result<Option<EncryptionKey>> {
        password
            .map(|pw| EncryptionKey::derive_from_password(pw.as_bytes(), salt))
            .transpose()
    }

    /// The backend manager this repository stores through
    pub fn manager(&self) -> &BackendManager {
        &self.manager
    }

    /// The password-derived chunk key, if the repository has a password
    pub fn key(&self) -> Option<&EncryptionKey> {
        self.key.as_ref()
    }

    /// Store a snapshot blob on all backends
    pub fn save_snapshot(&self, id: &str, data: &[u8]) -> Result<()> {
        self.manager.save_snapshot(id, data)
    }

    /// Load a snapshot blob from the first backend that has it
    pub fn load_snapshot(&self, id: &str) -> Result<Vec<u8>> {
        self.manager.load_snapshot(id)
    }
}
