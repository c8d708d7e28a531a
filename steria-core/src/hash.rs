//! SHA-256 content hashing.
//!
//! Whole-file and commit-record hashes share one format: lowercase
//! hexadecimal SHA-256, 64 characters. Abbreviations are display-only.

use crate::error::Result;
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Number of hex characters shown for abbreviated hashes
pub const SHORT_LEN: usize = 8;

/// Files larger than this are hashed through a memory map
const MMAP_THRESHOLD: u64 = 1024 * 1024;

/// Hash a byte slice
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hash a file's contents.
///
/// Large files go through a memory map, small ones stream through a 64 KiB
/// buffer; the two paths produce identical digests.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    if len > MMAP_THRESHOLD {
        // Safety: the working tree is not mutated by the core while a scan
        // is in flight, and the map is dropped before this call returns.
        let map = unsafe { Mmap::map(&file)? };
        return Ok(hash_bytes(&map));
    }

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `s` is a full-length lowercase hex hash
pub fn is_full_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Abbreviate a hash for display
pub fn short(hash: &str) -> &str {
    &hash[..SHORT_LEN.min(hash.len())]
}
