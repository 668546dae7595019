use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Canonical content hash: `sha256:` followed by the lowercase hex digest
/// of the file's exact bytes. No line-ending normalization is applied, so
/// the same logical text with different line endings hashes differently.
///
/// Consumers treat the value as an opaque string; equality is string
/// equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an already-formatted `sha256:<hex>` string without checking it.
    /// Used when restoring persisted snapshots, where the value came from a
    /// prior [`hash_bytes`] call.
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

/// Outcome of a bounded file-hash attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HashOutcome {
    Hashed { size_bytes: u64, hash: ContentHash },
    TooLarge { size_bytes: u64, max_bytes: u64 },
    NotARegularFile,
}

/// SHA-256 of the raw bytes in the canonical `sha256:<hex>` format.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    ContentHash(format!("sha256:{}", hex::encode(digest)))
}

/// Hashes a file's contents without ever holding more than one read buffer
/// in memory. Files whose metadata size exceeds `max_bytes` are rejected
/// before any content is read.
pub fn hash_file_bounded(path: &Path, max_bytes: u64) -> io::Result<HashOutcome> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Ok(HashOutcome::NotARegularFile);
    }

    let size = meta.len();
    if size > max_bytes {
        return Ok(HashOutcome::TooLarge {
            size_bytes: size,
            max_bytes,
        });
    }

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        match reader.read(&mut buf)? {
            0 => break,
            n => hasher.update(&buf[..n]),
        };
    }

    Ok(HashOutcome::Hashed {
        size_bytes: size,
        hash: ContentHash(format!("sha256:{}", hex::encode(hasher.finalize()))),
    })
}

#[cfg(feature = "read-tokio")]
mod read_tokio {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Async twin of [`hash_file_bounded`] for use on the service runtime.
    pub async fn hash_file_bounded_async(path: &Path, max_bytes: u64) -> io::Result<HashOutcome> {
        let file = tokio::fs::File::open(path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Ok(HashOutcome::NotARegularFile);
        }

        let size = meta.len();
        if size > max_bytes {
            return Ok(HashOutcome::TooLarge {
                size_bytes: size,
                max_bytes,
            });
        }

        let mut reader = tokio::io::BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(HashOutcome::Hashed {
            size_bytes: size,
            hash: ContentHash(format!("sha256:{}", hex::encode(hasher.finalize()))),
        })
    }
}

#[cfg(feature = "read-tokio")]
pub use read_tokio::hash_file_bounded_async;
