//! Conflict registry
//!
//! Durable record of files the merge engine could not auto-reconcile,
//! persisted as `conflicts.json` under the metadata directory. Markers in
//! working-tree files are never parsed back; the user edits the file and
//! then resolves the entry explicitly.

use crate::error::{CoreError, Result};
use crate::odb::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Granularity of a recorded conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    /// Whole-file divergence (e.g. deleted on one side, modified on the other)
    File,
    /// Diverging line ranges, `lines` lists the marked output lines
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// One registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<usize>>,
    pub status: ConflictStatus,
    pub detected: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Conflict {
    pub fn new(file: impl Into<String>, kind: ConflictKind) -> Self {
        Self {
            file: file.into(),
            kind,
            lines: None,
            status: ConflictStatus::Unresolved,
            detected: Utc::now(),
            resolved: None,
            resolver: None,
            details: None,
        }
    }

    pub fn with_lines(mut self, lines: Vec<usize>) -> Self {
        self.lines = Some(lines);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConflictsFile {
    conflicts: Vec<Conflict>,
}

/// Registry bound to one repository's metadata directory
#[derive(Debug, Clone)]
pub struct ConflictRegistry {
    path: PathBuf,
}

impl ConflictRegistry {
    pub fn new(meta_dir: &Path) -> Self {
        Self {
            path: meta_dir.join("conflicts.json"),
        }
    }

    fn read(&self) -> Result<ConflictsFile> {
        match fs::read(&self.path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|err| CoreError::CorruptObject(format!("conflicts.json: {err}"))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(ConflictsFile::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, file: &ConflictsFile) -> Result<()> {
        atomic_write(&self.path, &serde_json::to_vec_pretty(file)?)
    }

    /// Every recorded conflict, resolved or not
    pub fn all(&self) -> Result<Vec<Conflict>> {
        Ok(self.read()?.conflicts)
    }

    /// Conflicts still waiting on the user
    pub fn list_unresolved(&self) -> Result<Vec<Conflict>> {
        Ok(self
            .read()?
            .conflicts
            .into_iter()
            .filter(|c| c.status == ConflictStatus::Unresolved)
            .collect())
    }

    /// Record a conflict; an unresolved entry for the same file is replaced
    pub fn add(&self, conflict: Conflict) -> Result<()> {
        let mut file = self.read()?;
        file.conflicts
            .retain(|c| !(c.file == conflict.file && c.status == ConflictStatus::Unresolved));
        file.conflicts.push(conflict);
        self.write(&file)
    }

    /// Mark every unresolved entry for `path` as resolved.
    ///
    /// Succeeds quietly when nothing matches; the caller decides whether
    /// that is worth reporting.
    pub fn resolve(&self, path: &str, resolver: &str) -> Result<()> {
        let mut file = self.read()?;
        let now = Utc::now();
        for conflict in &mut file.conflicts {
            if conflict.file == path && conflict.status == ConflictStatus::Unresolved {
                conflict.status = ConflictStatus::Resolved;
                conflict.resolved = Some(now);
                conflict.resolver = Some(resolver.to_string());
            }
        }
        self.write(&file)
    }

    /// Whether no unresolved entries remain
    pub fn is_clean(&self) -> Result<bool> {
        Ok(self.list_unresolved()?.is_empty())
    }
}
