//! SHA-256 content hashing, the change-detection fingerprint shared by the
//! ingestor and the consistency auditor.

use crate::core::error::DriftguardError;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Chunk size for streaming file hashes. A large artifact never needs to be
/// resident in memory all at once.
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text);
    format!("{:x}", hasher.finalize())
}

/// Streaming SHA-256 over a file's bytes, 1 MiB at a time.
pub fn hash_file(path: &Path) -> Result<String, DriftguardError> {
    let mut file = std::fs::File::open(path).map_err(DriftguardError::IoError)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(DriftguardError::IoError)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
