//! Content hashing
//!
//! SHA-256 over raw bytes, rendered as lowercase hex. Files are streamed
//! through a fixed-size buffer so large files never load fully into memory.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer used when streaming file content into the hasher.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

pub fn hash_bytes(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    hash_reader(File::open(path)?)
}

/// True if `hash` is the digest of `content` (hex compared case-insensitively).
pub fn validate_hash(content: &[u8], hash: &str) -> bool {
    hash_bytes(content).eq_ignore_ascii_case(hash.trim())
}

/// True if `hash` looks like a SHA-256 hex digest.
pub fn is_well_formed(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit())
}
