//! Core object model
//!
//! Implements the immutable records the engine stores: commits, tags, and
//! the small serde types shared across components (change records, remote
//! descriptors). Commits are content-addressed: the `hash` field is the
//! SHA-256 of the record's canonical JSON serialization.

use crate::error::Result;
use crate::hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable commit record.
///
/// `files` is always the sorted key set of `file_blobs`; `file_blobs` maps
/// repo-relative paths to blob references. A reference is either a full
/// content hash or a `delta:<base>:<patch>` chain that only the codec
/// interprets. `parent` is empty for the root commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub parent: String,
    pub files: Vec<String>,
    pub file_blobs: BTreeMap<String, String>,
}

impl Commit {
    /// Build a sealed commit from its parts.
    ///
    /// The record is serialized with an empty `hash` field and fields in
    /// declaration order; the SHA-256 of those bytes becomes the hash. The
    /// `BTreeMap` keys give `file_blobs` a canonical order, so the same
    /// snapshot hashes identically on every platform.
    pub fn new(
        message: impl Into<String>,
        author: impl Into<String>,
        parent: impl Into<String>,
        file_blobs: BTreeMap<String, String>,
    ) -> Result<Self> {
        let files = file_blobs.keys().cloned().collect();
        let mut commit = Self {
            hash: String::new(),
            message: message.into(),
            author: author.into(),
            timestamp: Utc::now(),
            parent: parent.into(),
            files,
            file_blobs,
        };
        commit.hash = commit.pre_image_hash()?;
        Ok(commit)
    }

    /// Hash of the record with the `hash` field cleared
    fn pre_image_hash(&self) -> Result<String> {
        let mut pre_image = self.clone();
        pre_image.hash = String::new();
        Ok(hash::hash_bytes(&serde_json::to_vec(&pre_image)?))
    }

    /// Recompute the hash and compare against the stored one
    pub fn verify_hash(&self) -> Result<bool> {
        Ok(self.pre_image_hash()? == self.hash)
    }

    /// Abbreviated hash for display
    pub fn short_hash(&self) -> &str {
        hash::short(&self.hash)
    }

    /// Whether this is a root commit
    pub fn is_root(&self) -> bool {
        self.parent.is_empty()
    }
}

/// Immutable named reference to a commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub commit: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Kind of working-tree change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Modified => write!(f, "modified"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A single change between two tree snapshots.
///
/// `hash` is the working-tree content hash, empty for deletions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub hash: String,
}

/// Backend type of a configured remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    Local,
    Http,
    S3,
    Peer,
}

impl std::str::FromStr for RemoteKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "http" => Ok(Self::Http),
            "s3" => Ok(Self::S3),
            "peer" => Ok(Self::Peer),
            other => Err(crate::error::CoreError::InvalidArgument(format!(
                "unknown remote type '{other}' (expected local, http, s3 or peer)"
            ))),
        }
    }
}

/// A configured remote blob store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RemoteKind,
    pub url: String,
}
