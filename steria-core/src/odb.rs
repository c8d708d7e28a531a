//! Commit object database
//!
//! Commits are immutable JSON records stored under a two-character shard:
//! `objects/<hash[:2]>/<hash[2:]>`. Mutable metadata (HEAD, branch refs,
//! tags, conflicts, remotes) goes through [`atomic_write`] so readers never
//! observe a torn file.

use crate::error::{CoreError, Result};
use crate::object::Commit;
use std::fs;
use std::path::{Path, PathBuf};

/// Commit record storage for one repository
#[derive(Debug, Clone)]
pub struct ObjectDb {
    dir: PathBuf,
}

impl ObjectDb {
    /// `dir` is the repository's `objects/` directory
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn commit_path(&self, hash: &str) -> PathBuf {
        self.dir.join(&hash[..2]).join(&hash[2..])
    }

    /// Persist a commit record
    pub fn save(&self, commit: &Commit) -> Result<()> {
        if commit.hash.len() < 2 {
            return Err(CoreError::InvalidArgument(format!(
                "commit hash too short: '{}'",
                commit.hash
            )));
        }
        let path = self.commit_path(&commit.hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, &serde_json::to_vec_pretty(commit)?)
    }

    /// Load a commit record by full hash
    pub fn load(&self, hash: &str) -> Result<Commit> {
        if hash.len() < 2 {
            return Err(CoreError::InvalidArgument(format!(
                "commit hash too short: '{hash}'"
            )));
        }
        let data = match fs::read(self.commit_path(hash)) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::not_found("commit", hash));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data)
            .map_err(|err| CoreError::CorruptObject(format!("commit {hash}: {err}")))
    }

    /// Whether a commit record exists
    pub fn contains(&self, hash: &str) -> bool {
        hash.len() >= 2 && self.commit_path(hash).is_file()
    }
}

/// Write a file atomically: temp sibling first, then rename
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| CoreError::InvalidArgument(format!("bad ref path: {}", path.display())))?
        .to_string_lossy()
        .into_owned();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
