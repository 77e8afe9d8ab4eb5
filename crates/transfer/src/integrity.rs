use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::TransferError;

/// Read buffer for whole-file hashing.
const HASH_BUF_SIZE: usize = 8192;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes a file on the blocking pool so large files don't stall the runtime.
pub async fn checksum_file(path: PathBuf) -> Result<String, TransferError> {
    tokio::task::spawn_blocking(move || calculate_file_checksum(&path))
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}

/// Compares two hex digests, ignoring ASCII case.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b.trim())
}
