//! Stash stack
//!
//! Puts aside working-tree edits without committing them. Each entry
//! records the files that differ from HEAD as ordinary blobs plus a JSON
//! record under `.steria/stash/<id>.json`; applying an entry writes the
//! recorded bytes back. Stashed content is deduplicated like any other
//! blob.

use crate::error::{CoreError, Result};
use crate::object::ChangeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::repo::Repository;

/// One saved stash entry: path → full blob reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashEntry {
    pub id: u64,
    pub message: String,
    pub created: DateTime<Utc>,
    pub files: BTreeMap<String, String>,
}

impl Repository {
    fn stash_dir(&self) -> PathBuf {
        self.meta_dir().join("stash")
    }

    /// Save added and modified files as a stash entry, then roll the
    /// working tree back to HEAD for those paths
    pub async fn stash_save(&self, message: &str) -> Result<StashEntry> {
        let changes = self.changes().await?;
        let mut files = BTreeMap::new();
        for change in &changes {
            if change.kind == ChangeKind::Deleted {
                continue;
            }
            let data = fs::read(self.root().join(&change.path))?;
            self.codec().put_blob(&change.hash, &data).await?;
            files.insert(change.path.clone(), change.hash.clone());
        }
        if files.is_empty() {
            return Err(CoreError::InvalidArgument(
                "nothing to stash: working tree matches HEAD".into(),
            ));
        }

        let entry = StashEntry {
            id: self.next_stash_id()?,
            message: message.to_string(),
            created: Utc::now(),
            files,
        };
        fs::create_dir_all(self.stash_dir())?;
        fs::write(
            self.stash_dir().join(format!("{}.json", entry.id)),
            serde_json::to_vec_pretty(&entry)?,
        )?;

        // Put the stashed paths back to their committed state.
        let head = self.head()?;
        if !head.is_empty() {
            let tip = self.load_commit(&head)?;
            for path in entry.files.keys() {
                match tip.file_blobs.get(path) {
                    Some(blob_ref) => {
                        let data = self.codec().resolve(blob_ref).await?;
                        self.write_working_file(path, &data)?;
                    }
                    None => self.remove_working_file(path)?,
                }
            }
        }
        Ok(entry)
    }

    fn next_stash_id(&self) -> Result<u64> {
        Ok(self.stash_list()?.iter().map(|e| e.id).max().unwrap_or(0) + 1)
    }

    /// All stash entries, oldest first
    pub fn stash_list(&self) -> Result<Vec<StashEntry>> {
        let dir = self.stash_dir();
        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            if !dir_entry.file_name().to_string_lossy().ends_with(".json") {
                continue;
            }
            let data = fs::read(dir_entry.path())?;
            let entry: StashEntry = serde_json::from_slice(&data).map_err(|err| {
                CoreError::CorruptObject(format!(
                    "stash {}: {err}",
                    dir_entry.file_name().to_string_lossy()
                ))
            })?;
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    /// Write a stash entry's files back into the working tree
    pub async fn stash_apply(&self, id: u64) -> Result<StashEntry> {
        let entry = self
            .stash_list()?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| CoreError::not_found("stash", id.to_string()))?;
        for (path, blob_ref) in &entry.files {
            let data = self.codec().resolve(blob_ref).await?;
            self.write_working_file(path, &data)?;
        }
        Ok(entry)
    }
}
