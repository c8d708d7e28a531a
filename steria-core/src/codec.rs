//! Object codec
//!
//! The one component that understands how stored bytes relate to working
//! bytes: gzip compression on write, decompression on read, line-oriented
//! delta patches, and transparent reconstruction of `delta:<base>:<patch>`
//! references. Everything else treats blob references as opaque strings.
//!
//! Resolved blobs and raw patches each sit behind a 128-entry LRU, backed
//! by a disk cache keyed by a filesystem-safe transform of the reference.

use crate::error::{CoreError, Result};
use crate::store::SharedStore;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use lru::LruCache;
use parking_lot::Mutex;
use similar::{DiffTag, TextDiff};
use std::fs;
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Entries kept in each in-memory cache
pub const LRU_CAPACITY: usize = 128;

/// Longest delta chain a new reference may extend
pub const MAX_DELTA_DEPTH: usize = 8;

const DELTA_PREFIX: &str = "delta:";

/// Whether a blob reference is a delta chain
pub fn is_delta(blob_ref: &str) -> bool {
    blob_ref.starts_with(DELTA_PREFIX)
}

/// Split `delta:<base>:<patch>` into base reference and patch hash.
///
/// The base may itself be a delta reference, so the patch hash is the last
/// colon-separated component.
pub fn split_delta(blob_ref: &str) -> Option<(&str, &str)> {
    blob_ref.strip_prefix(DELTA_PREFIX)?.rsplit_once(':')
}

/// Number of delta hops before a reference reaches its full base blob
pub fn delta_depth(blob_ref: &str) -> usize {
    let mut depth = 0;
    let mut current = blob_ref;
    while let Some((base, _)) = split_delta(current) {
        depth += 1;
        current = base;
    }
    depth
}

/// gzip-compress a payload
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip payload
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Encode the transformation from `base` to `new` as a line-oriented patch.
///
/// The format is a sequence of operations over base lines: `c <n>` copies
/// the next `n` lines, `d <n>` drops them, and `a <bytes>` inserts exactly
/// `bytes` of payload that follow the header. Byte-counted payloads keep
/// reconstruction exact for non-UTF-8 content and missing trailing
/// newlines.
pub fn make_patch(base: &[u8], new: &[u8]) -> Vec<u8> {
    let diff = TextDiff::from_lines(base, new);
    let new_lines = diff.new_slices();
    let mut patch = Vec::new();
    for op in diff.ops() {
        match op.tag() {
            DiffTag::Equal => {
                patch.extend_from_slice(format!("c {}\n", op.old_range().len()).as_bytes());
            }
            DiffTag::Delete => {
                patch.extend_from_slice(format!("d {}\n", op.old_range().len()).as_bytes());
            }
            DiffTag::Insert | DiffTag::Replace => {
                if !op.old_range().is_empty() {
                    patch.extend_from_slice(
                        format!("d {}\n", op.old_range().len()).as_bytes(),
                    );
                }
                let payload: Vec<u8> = new_lines[op.new_range()].concat();
                patch.extend_from_slice(format!("a {}\n", payload.len()).as_bytes());
                patch.extend_from_slice(&payload);
            }
        }
    }
    patch
}

/// Apply a patch produced by [`make_patch`] to its base bytes
pub fn apply_patch(base: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let base_lines = split_lines(base);
    let mut out = Vec::with_capacity(base.len());
    let mut cursor = 0usize;
    let mut line_pos = 0usize;

    while cursor < patch.len() {
        let header_end = patch[cursor..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt_patch("truncated header"))?;
        let header = std::str::from_utf8(&patch[cursor..cursor + header_end])
            .map_err(|_| corrupt_patch("non-text header"))?;
        cursor += header_end + 1;

        let (op, arg) = header
            .split_once(' ')
            .ok_or_else(|| corrupt_patch("malformed header"))?;
        let count: usize = arg
            .parse()
            .map_err(|_| corrupt_patch("malformed count"))?;

        match op {
            "c" => {
                let end = line_pos
                    .checked_add(count)
                    .filter(|&end| end <= base_lines.len())
                    .ok_or_else(|| corrupt_patch("copy past end of base"))?;
                for line in &base_lines[line_pos..end] {
                    out.extend_from_slice(line);
                }
                line_pos = end;
            }
            "d" => {
                line_pos = line_pos
                    .checked_add(count)
                    .filter(|&end| end <= base_lines.len())
                    .ok_or_else(|| corrupt_patch("drop past end of base"))?;
            }
            "a" => {
                let end = cursor
                    .checked_add(count)
                    .filter(|&end| end <= patch.len())
                    .ok_or_else(|| corrupt_patch("insert past end of patch"))?;
                out.extend_from_slice(&patch[cursor..end]);
                cursor = end;
            }
            other => return Err(corrupt_patch(&format!("unknown op '{other}'"))),
        }
    }
    Ok(out)
}

fn corrupt_patch(reason: &str) -> CoreError {
    CoreError::CorruptObject(format!("delta patch: {reason}"))
}

/// Split bytes into lines, keeping the terminator on each line
pub(crate) fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in data.iter().enumerate() {
        if b == b'\n' {
            lines.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

/// Codec bound to one repository's local store and cache directory
pub struct ObjectCodec {
    store: SharedStore,
    cache_dir: PathBuf,
    blobs: Mutex<LruCache<String, Bytes>>,
    patches: Mutex<LruCache<String, Bytes>>,
}

impl ObjectCodec {
    pub fn new(store: SharedStore, cache_dir: PathBuf) -> Self {
        let capacity = NonZeroUsize::new(LRU_CAPACITY).expect("nonzero cache capacity");
        Self {
            store,
            cache_dir,
            blobs: Mutex::new(LruCache::new(capacity)),
            patches: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Compress and store a payload under `hash`
    pub async fn put_blob(&self, hash: &str, raw: &[u8]) -> Result<()> {
        let payload = gzip(raw)?;
        self.store.put(hash, Bytes::from(payload)).await
    }

    /// Resolve a blob reference to its uncompressed bytes.
    ///
    /// Full references decompress the stored payload; delta references
    /// recursively resolve the base, fetch the patch, and reconstruct.
    pub async fn resolve(&self, blob_ref: &str) -> Result<Bytes> {
        if let Some(hit) = self.blobs.lock().get(blob_ref) {
            return Ok(hit.clone());
        }

        let cache_file = self.cache_dir.join(safe_cache_name(blob_ref));
        if let Ok(data) = fs::read(&cache_file) {
            let data = Bytes::from(data);
            self.blobs.lock().put(blob_ref.to_string(), data.clone());
            return Ok(data);
        }

        let data = if let Some((base, patch_hash)) = split_delta(blob_ref) {
            let base_data = Box::pin(self.resolve(base)).await?;
            let patch = self.patch_bytes(patch_hash).await?;
            Bytes::from(apply_patch(&base_data, &patch)?)
        } else {
            Bytes::from(gunzip(&self.store.get(blob_ref).await?)?)
        };

        // Disk cache is best-effort; a failed write only costs a re-read.
        if fs::create_dir_all(&self.cache_dir).is_ok() {
            let _ = fs::write(&cache_file, &data);
        }
        self.blobs.lock().put(blob_ref.to_string(), data.clone());
        Ok(data)
    }

    async fn patch_bytes(&self, patch_hash: &str) -> Result<Bytes> {
        if let Some(hit) = self.patches.lock().get(patch_hash) {
            return Ok(hit.clone());
        }
        let patch = Bytes::from(gunzip(&self.store.get(patch_hash).await?)?);
        self.patches.lock().put(patch_hash.to_string(), patch.clone());
        Ok(patch)
    }
}

/// Filesystem-safe cache file name for a blob reference
fn safe_cache_name(blob_ref: &str) -> String {
    blob_ref.replace([':', '/'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;
    use crate::store::{BlobStore, LocalBlobStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn patch_round_trip(base: &[u8], new: &[u8]) {
        let patch = make_patch(base, new);
        assert_eq!(apply_patch(base, &patch).unwrap(), new);
    }

    #[test]
    fn gzip_round_trip_is_identity() {
        let data = b"line one\nline two\n";
        assert_eq!(gunzip(&gzip(data).unwrap()).unwrap(), data);
    }

    #[test]
    fn patch_round_trips() {
        patch_round_trip(b"line1\nline2\nline3\n", b"line1\nline2 changed\nline3\n");
        patch_round_trip(b"", b"brand new file\n");
        patch_round_trip(b"going away\n", b"");
        patch_round_trip(b"no trailing newline", b"still no trailing newline");
        patch_round_trip(b"a\nb\nc\n", b"a\nc\nd");
        patch_round_trip(b"\x00\x01\n\xff binary\n", b"\x00\x02\n\xff binary\n");
    }

    #[test]
    fn patch_of_identical_content_is_pure_copy() {
        let data = b"same\nsame\n";
        let patch = make_patch(data, data);
        assert_eq!(patch, b"c 2\n");
    }

    #[test]
    fn corrupt_patch_is_rejected() {
        assert!(apply_patch(b"a\n", b"c 5\n").is_err());
        assert!(apply_patch(b"a\n", b"x 1\n").is_err());
        assert!(apply_patch(b"a\n", b"a 10\nhi").is_err());
    }

    #[test]
    fn delta_refs_parse() {
        let full = "ab".repeat(32);
        assert!(!is_delta(&full));
        assert_eq!(delta_depth(&full), 0);

        let one = format!("delta:{full}:{}", "cd".repeat(32));
        let (base, patch) = split_delta(&one).unwrap();
        assert_eq!(base, full);
        assert_eq!(patch, "cd".repeat(32));
        assert_eq!(delta_depth(&one), 1);

        let two = format!("delta:{one}:{}", "ef".repeat(32));
        assert_eq!(delta_depth(&two), 2);
        assert_eq!(split_delta(&two).unwrap().0, one);
    }

    fn codec_in(dir: &TempDir) -> ObjectCodec {
        let store = Arc::new(LocalBlobStore::new(dir.path().join("blobs")));
        ObjectCodec::new(store, dir.path().join("cache"))
    }

    #[tokio::test]
    async fn resolve_full_reference() {
        let dir = TempDir::new().unwrap();
        let codec = codec_in(&dir);
        let content = b"hello\n";
        let content_hash = hash::hash_bytes(content);

        codec.put_blob(&content_hash, content).await.unwrap();
        assert_eq!(codec.resolve(&content_hash).await.unwrap().as_ref(), content);
    }

    #[tokio::test]
    async fn resolve_delta_reference() {
        let dir = TempDir::new().unwrap();
        let codec = codec_in(&dir);
        let base = b"line1\nline2\n";
        let new = b"line1\nline2 edited\nline3\n";

        let base_hash = hash::hash_bytes(base);
        codec.put_blob(&base_hash, base).await.unwrap();

        let patch = make_patch(base, new);
        let patch_hash = hash::hash_bytes(&patch);
        codec.put_blob(&patch_hash, &patch).await.unwrap();

        let blob_ref = format!("delta:{base_hash}:{patch_hash}");
        assert_eq!(codec.resolve(&blob_ref).await.unwrap().as_ref(), new);
    }

    #[tokio::test]
    async fn resolved_bytes_are_cached() {
        let dir = TempDir::new().unwrap();
        let codec = codec_in(&dir);
        let content = b"cache me\n";
        let content_hash = hash::hash_bytes(content);
        codec.put_blob(&content_hash, content).await.unwrap();

        codec.resolve(&content_hash).await.unwrap();

        // Remove the stored payload; the codec must answer from cache.
        let store = LocalBlobStore::new(dir.path().join("blobs"));
        std::fs::remove_file(dir.path().join("blobs").join(format!("{content_hash}.gz")))
            .unwrap();
        assert!(!store.has(&content_hash).await);
        assert_eq!(codec.resolve(&content_hash).await.unwrap().as_ref(), content);
    }
}
