//! Branch and merge engine
//!
//! Branch refs are small files under `branches/`; switching rewrites HEAD
//! and the current-branch indicator, then restores the working tree to the
//! target snapshot. Merging fast-forwards when HEAD is an ancestor of the
//! target, otherwise walks back to the lowest common ancestor and runs a
//! three-way reconciliation per file, recording conflicts it cannot
//! auto-resolve.

use crate::conflicts::{Conflict, ConflictKind};
use crate::error::{CoreError, Result};
use crate::repo::{Repository, DEFAULT_BRANCH};
use bytes::Bytes;
use similar::{DiffTag, TextDiff};
use std::collections::{BTreeSet, HashSet};
use std::fs;

/// How a merge concluded when no conflicts were recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Target already equals HEAD
    AlreadyUpToDate,
    /// HEAD was an ancestor of the target; the pointer moved forward
    FastForward { head: String },
    /// Three-way merge completed cleanly
    Merged { head: String },
}

impl Repository {
    /// Create a branch pointing at the current HEAD
    pub fn create_branch(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("empty branch name".into()));
        }
        if self.branch_exists(name) {
            return Err(CoreError::already_exists("branch", name));
        }
        self.write_branch_ref(name, &self.head()?)
    }

    /// Switch to an existing branch and restore its snapshot.
    ///
    /// Only branches with a ref file can be switched to; the implicit
    /// default gets its own failure message when the ref is missing.
    pub async fn switch_branch(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("empty branch name".into()));
        }
        if !self.branch_exists(name) {
            if name == DEFAULT_BRANCH {
                return Err(CoreError::not_found("default branch", DEFAULT_BRANCH));
            }
            return Err(CoreError::not_found("branch", name));
        }
        let target = self.read_branch_ref(name)?;
        self.set_head(&target)?;
        self.set_current_branch(name)?;
        if !target.is_empty() {
            let commit = self.odb().load(&target)?;
            self.restore_snapshot(&commit).await?;
        }
        Ok(target)
    }

    /// Rename a branch ref, following the current-branch indicator along
    pub fn rename_branch(&self, old: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(CoreError::InvalidArgument("empty branch name".into()));
        }
        if !self.branch_exists(old) {
            return Err(CoreError::not_found("branch", old));
        }
        if self.branch_exists(new) {
            return Err(CoreError::already_exists("branch", new));
        }
        let new_path = self.branch_ref_path(new);
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(self.branch_ref_path(old), new_path)?;
        if self.current_branch()? == old {
            self.set_current_branch(new)?;
        }
        Ok(())
    }

    /// Delete a branch ref; the current branch is protected
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        if self.current_branch()? == name {
            return Err(CoreError::InvalidArgument(format!(
                "cannot delete the current branch '{name}'"
            )));
        }
        if !self.branch_exists(name) {
            return Err(CoreError::not_found("branch", name));
        }
        fs::remove_file(self.branch_ref_path(name))?;
        Ok(())
    }

    /// Whether `needle` appears in the ancestry of `tip` (inclusive).
    ///
    /// The walk carries a visited set instead of a step bound, so corrupt
    /// cyclic histories terminate cleanly.
    pub fn is_ancestor(&self, needle: &str, tip: &str) -> Result<bool> {
        let mut cursor = tip.to_string();
        let mut seen = HashSet::new();
        while !cursor.is_empty() && seen.insert(cursor.clone()) {
            if cursor == needle {
                return Ok(true);
            }
            match self.odb().load(&cursor) {
                Ok(commit) => cursor = commit.parent,
                Err(CoreError::NotFound { .. }) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(false)
    }

    /// Lowest common ancestor of two commits
    pub fn find_merge_base(&self, a: &str, b: &str) -> Result<String> {
        let mut visited = HashSet::new();
        let mut cursor = a.to_string();
        while !cursor.is_empty() && visited.insert(cursor.clone()) {
            match self.odb().load(&cursor) {
                Ok(commit) => cursor = commit.parent,
                Err(CoreError::NotFound { .. }) => break,
                Err(err) => return Err(err),
            }
        }

        let mut cursor = b.to_string();
        let mut seen = HashSet::new();
        while !cursor.is_empty() && seen.insert(cursor.clone()) {
            if visited.contains(&cursor) {
                return Ok(cursor);
            }
            match self.odb().load(&cursor) {
                Ok(commit) => cursor = commit.parent,
                Err(CoreError::NotFound { .. }) => break,
                Err(err) => return Err(err),
            }
        }
        Err(CoreError::NoCommonAncestor)
    }

    /// Merge a branch into the current one.
    ///
    /// Conflicted paths get marker files in the working tree and registry
    /// entries, and the call fails with `MergeConflicts`; HEAD moves only
    /// on a clean merge or fast-forward.
    pub async fn merge(&self, branch: &str, signer: &str) -> Result<MergeOutcome> {
        let target = self.read_branch_ref(branch)?;
        if target.is_empty() {
            return Err(CoreError::InvalidArgument(format!(
                "branch '{branch}' has no commits"
            )));
        }
        let head = self.head()?;
        if target == head {
            return Ok(MergeOutcome::AlreadyUpToDate);
        }

        if head.is_empty() || self.is_ancestor(&head, &target)? {
            let commit = self.odb().load(&target)?;
            self.publish_head(&target)?;
            self.restore_snapshot(&commit).await?;
            return Ok(MergeOutcome::FastForward { head: target });
        }

        let base_hash = self.find_merge_base(&head, &target)?;
        let base = self.odb().load(&base_hash)?;
        let current = self.odb().load(&head)?;
        let other = self.odb().load(&target)?;

        let mut paths: BTreeSet<&String> = BTreeSet::new();
        paths.extend(base.file_blobs.keys());
        paths.extend(current.file_blobs.keys());
        paths.extend(other.file_blobs.keys());

        let mut conflicted = Vec::new();
        for path in paths {
            let b = base.file_blobs.get(path);
            let c = current.file_blobs.get(path);
            let t = other.file_blobs.get(path);

            if c == t {
                // Same result on both sides; a double deletion still has to
                // leave the working tree.
                if b.is_some() && c.is_none() {
                    self.remove_working_file(path)?;
                }
                continue;
            }
            if b == c {
                // Unchanged here, changed there: adopt the target state.
                match t {
                    Some(blob_ref) => {
                        let data = self.codec().resolve(blob_ref).await?;
                        self.write_working_file(path, &data)?;
                    }
                    None => self.remove_working_file(path)?,
                }
                continue;
            }
            if b == t {
                // Changed here, untouched there: keep the current state.
                continue;
            }

            let (kind, ours, theirs, details) = match (c, t) {
                (Some(cr), Some(tr)) => (
                    ConflictKind::Line,
                    self.codec().resolve(cr).await?,
                    self.codec().resolve(tr).await?,
                    format!("both sides changed while merging '{branch}' (merge by {signer})"),
                ),
                (Some(cr), None) => (
                    ConflictKind::File,
                    self.codec().resolve(cr).await?,
                    Bytes::new(),
                    format!("modified here, deleted in '{branch}' (merge by {signer})"),
                ),
                (None, Some(tr)) => (
                    ConflictKind::File,
                    Bytes::new(),
                    self.codec().resolve(tr).await?,
                    format!("deleted here, modified in '{branch}' (merge by {signer})"),
                ),
                (None, None) => continue,
            };

            let lines = self.write_conflict_file(path, &ours, &theirs)?;
            let mut conflict = Conflict::new(path.clone(), kind).with_details(details);
            if kind == ConflictKind::Line {
                conflict = conflict.with_lines(lines);
            }
            self.conflicts().add(conflict)?;
            conflicted.push(path.clone());
        }

        if !conflicted.is_empty() {
            return Err(CoreError::MergeConflicts { files: conflicted });
        }
        self.publish_head(&target)?;
        Ok(MergeOutcome::Merged { head: target })
    }

    /// Line-by-line merge of the two sides, writing marker blocks around
    /// diverging runs. Returns the 1-based numbers of every line inside a
    /// conflict block, markers included.
    fn write_conflict_file(&self, path: &str, ours: &[u8], theirs: &[u8]) -> Result<Vec<usize>> {
        let diff = TextDiff::from_lines(ours, theirs);
        let our_lines = diff.old_slices();
        let their_lines = diff.new_slices();

        let mut out: Vec<u8> = Vec::new();
        let mut line_no = 0usize;
        let mut marked = Vec::new();

        for op in diff.ops() {
            if op.tag() == DiffTag::Equal {
                for line in &our_lines[op.old_range()] {
                    push_line(&mut out, line, &mut line_no);
                }
                continue;
            }
            push_line(&mut out, b"<<<<<<< mine\n", &mut line_no);
            marked.push(line_no);
            for line in &our_lines[op.old_range()] {
                push_line(&mut out, line, &mut line_no);
                marked.push(line_no);
            }
            push_line(&mut out, b"=======\n", &mut line_no);
            marked.push(line_no);
            for line in &their_lines[op.new_range()] {
                push_line(&mut out, line, &mut line_no);
                marked.push(line_no);
            }
            push_line(&mut out, b">>>>>>> theirs\n", &mut line_no);
            marked.push(line_no);
        }

        self.write_working_file(path, &out)?;
        Ok(marked)
    }
}

/// Append one line, normalizing the terminator so markers stay line-aligned
fn push_line(out: &mut Vec<u8>, line: &[u8], line_no: &mut usize) {
    out.extend_from_slice(line);
    if !line.ends_with(b"\n") {
        out.push(b'\n');
    }
    *line_no += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn repo_with_file(content: &[u8]) -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), content).unwrap();
        let repo = Repository::init(dir.path(), "proj", "kara").await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn branch_lifecycle() {
        let (_dir, repo) = repo_with_file(b"x\n").await;
        let head = repo.head().unwrap();

        repo.create_branch("feature").unwrap();
        assert_eq!(repo.read_branch_ref("feature").unwrap(), head);
        assert!(matches!(
            repo.create_branch("feature").unwrap_err(),
            CoreError::AlreadyExists { .. }
        ));

        repo.rename_branch("feature", "feature-2").unwrap();
        assert!(!repo.branch_exists("feature"));
        assert!(repo.branch_exists("feature-2"));

        repo.delete_branch("feature-2").unwrap();
        assert!(!repo.branch_exists("feature-2"));
        assert!(matches!(
            repo.delete_branch(DEFAULT_BRANCH).unwrap_err(),
            CoreError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn switch_to_missing_branch_fails() {
        let (_dir, repo) = repo_with_file(b"x\n").await;
        assert!(matches!(
            repo.switch_branch("ghost").await.unwrap_err(),
            CoreError::NotFound { kind: "branch", .. }
        ));
    }

    #[tokio::test]
    async fn ancestry_walk_sees_parents() {
        let (dir, repo) = repo_with_file(b"one\n").await;
        let first = repo.head().unwrap();
        fs::write(dir.path().join("a.txt"), b"two\n").unwrap();
        let second = repo.create_commit("second", "kara").await.unwrap();

        assert!(repo.is_ancestor(&first, &second.hash).unwrap());
        assert!(!repo.is_ancestor(&second.hash, &first).unwrap());
    }

    #[tokio::test]
    async fn merging_current_tip_is_up_to_date() {
        let (_dir, repo) = repo_with_file(b"x\n").await;
        repo.create_branch("feature").unwrap();
        let outcome = repo.merge("feature", "kara").await.unwrap();
        assert_eq!(outcome, MergeOutcome::AlreadyUpToDate);
    }

    #[test]
    fn conflict_markers_match_expected_shape() {
        let diff = TextDiff::from_lines(b"y\n".as_slice(), b"z\n".as_slice());
        assert_eq!(diff.ops().len(), 1);
        assert_eq!(diff.ops()[0].tag(), DiffTag::Replace);
    }
}
