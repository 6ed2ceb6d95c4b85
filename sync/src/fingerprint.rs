//! Content fingerprints for snapshot file entries

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;

use crate::error::{Result, SyncError};

/// Hash algorithms supported for fingerprints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Blake3 hash (faster)
    #[default]
    Blake3,
    /// SHA-256 hash
    Sha256,
}

enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3(hasher) => {
                hasher.update(data);
            }
            Hasher::Sha256(hasher) => hasher.update(data),
        }
    }

    fn finalize(self) -> String {
        match self {
            Hasher::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
            Hasher::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Streams file content through a hash in fixed-size chunks
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    algorithm: HashAlgorithm,
    buffer_size: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl Fingerprinter {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            buffer_size: 64 * 1024, // 64KB buffer
        }
    }

    /// Create a fingerprinter with a custom read buffer size
    pub fn with_buffer_size(algorithm: HashAlgorithm, buffer_size: usize) -> Self {
        Self {
            algorithm,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest of the file at `path`
    pub async fn fingerprint(&self, path: &Path) -> Result<String> {
        let mut file = fs::File::open(path).await.map_err(|e| {
            SyncError::hash_error(path, format!("Failed to open file: {}", e))
        })?;

        let mut buffer = vec![0u8; self.buffer_size];
        let mut hasher = Hasher::new(self.algorithm);

        loop {
            let bytes_read = file.read(&mut buffer).await.map_err(|e| {
                SyncError::hash_error(path, format!("Failed to read file: {}", e))
            })?;

            if bytes_read == 0 {
                break;
            }

            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize())
    }
}
