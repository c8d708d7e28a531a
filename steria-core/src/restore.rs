//! Restore, cherry-pick and rebase
//!
//! Reconstruction of working-tree files from committed snapshots, plus the
//! two history-rewriting operations built on top of it: applying a single
//! commit's changes elsewhere, and replaying a keep/combine/skip plan.

use crate::error::{CoreError, Result};
use crate::object::Commit;
use crate::repo::Repository;

/// What to do with one commit in a rebase plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseAction {
    /// Replay the commit as-is
    Keep,
    /// Fold this commit's message into the next kept commit
    Combine,
    /// Drop the commit
    Skip,
}

/// One line of a rebase plan
#[derive(Debug, Clone)]
pub struct RebaseItem {
    pub action: RebaseAction,
    pub hash: String,
    pub message: String,
}

impl Repository {
    /// Restore one file from a commit (HEAD when `commit_hash` is `None`)
    pub async fn restore_file(&self, path: &str, commit_hash: Option<&str>) -> Result<()> {
        let target = match commit_hash {
            Some(hash) => hash.to_string(),
            None => {
                let head = self.head()?;
                if head.is_empty() {
                    return Err(CoreError::not_found("commit", "HEAD"));
                }
                head
            }
        };
        let commit = self.load_commit(&target)?;
        let blob_ref = commit
            .file_blobs
            .get(path)
            .ok_or_else(|| CoreError::not_found("path", path))?;
        let data = self.codec().resolve(blob_ref).await?;
        self.write_working_file(path, &data)
    }

    /// Restore every file recorded by a commit
    pub async fn restore_snapshot(&self, commit: &Commit) -> Result<()> {
        for path in &commit.files {
            if let Some(blob_ref) = commit.file_blobs.get(path) {
                let data = self.codec().resolve(blob_ref).await?;
                self.write_working_file(path, &data)?;
            }
        }
        Ok(())
    }

    /// Apply a single commit's changes onto the current branch.
    ///
    /// The diff against the commit's parent is applied to the working tree,
    /// then committed as `cherry-pick: <original message>` under the
    /// original author.
    pub async fn cherry_pick(&self, commit_hash: &str) -> Result<Commit> {
        let source = self.load_commit(commit_hash)?;
        let head = self.head()?;
        if !head.is_empty() && self.is_ancestor(&source.hash, &head)? {
            return Err(CoreError::InvalidArgument(format!(
                "commit {} is already in the current branch",
                source.short_hash()
            )));
        }

        let parent = if source.is_root() {
            None
        } else {
            Some(self.odb().load(&source.parent)?)
        };

        // Added and modified paths carry the source's reference; paths the
        // source dropped are deleted.
        for (path, blob_ref) in &source.file_blobs {
            let unchanged = parent
                .as_ref()
                .and_then(|p| p.file_blobs.get(path))
                .is_some_and(|prev| prev == blob_ref);
            if unchanged {
                continue;
            }
            let data = self.codec().resolve(blob_ref).await?;
            self.write_working_file(path, &data)?;
        }
        if let Some(parent) = &parent {
            for path in parent.file_blobs.keys() {
                if !source.file_blobs.contains_key(path) {
                    self.remove_working_file(path)?;
                }
            }
        }

        self.create_commit(&format!("cherry-pick: {}", source.message), &source.author)
            .await
    }

    /// Replay an ordered rebase plan.
    ///
    /// HEAD and the current branch ref reset to the first non-skipped
    /// item's parent, then every kept item restores its snapshot and
    /// commits, consuming any pending combined messages. Returns the final
    /// HEAD.
    pub async fn rebase(&self, plan: &[RebaseItem]) -> Result<String> {
        let first = plan
            .iter()
            .find(|item| item.action != RebaseAction::Skip)
            .ok_or_else(|| {
                CoreError::InvalidArgument("rebase plan skips every commit".into())
            })?;
        let first_commit = self.load_commit(&first.hash)?;
        self.publish_head(&first_commit.parent)?;

        let mut pending: Vec<String> = Vec::new();
        for item in plan {
            match item.action {
                RebaseAction::Skip => {}
                RebaseAction::Combine => pending.push(item.message.clone()),
                RebaseAction::Keep => {
                    let commit = self.load_commit(&item.hash)?;
                    self.restore_snapshot(&commit).await?;
                    let message = if pending.is_empty() {
                        item.message.clone()
                    } else {
                        pending.join("\n")
                    };
                    pending.clear();
                    self.create_commit(&message, &commit.author).await?;
                }
            }
        }
        self.head()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    async fn seeded_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"v1\n").unwrap();
        let repo = Repository::init(dir.path(), "proj", "kara").await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn restore_file_rewrites_bytes() {
        let (dir, repo) = seeded_repo().await;
        fs::write(dir.path().join("a.txt"), b"scratch\n").unwrap();

        repo.restore_file("a.txt", None).await.unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"v1\n");
    }

    #[tokio::test]
    async fn restore_deleted_file_from_old_commit() {
        let (dir, repo) = seeded_repo().await;
        let old_head = repo.head().unwrap();

        fs::remove_file(dir.path().join("a.txt")).unwrap();
        repo.create_commit("drop a", "kara").await.unwrap();

        repo.restore_file("a.txt", Some(&old_head)).await.unwrap();
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"v1\n");
    }

    #[tokio::test]
    async fn restore_unknown_path_fails() {
        let (_dir, repo) = seeded_repo().await;
        assert!(matches!(
            repo.restore_file("ghost.txt", None).await.unwrap_err(),
            CoreError::NotFound { kind: "path", .. }
        ));
    }

    #[tokio::test]
    async fn cherry_pick_rejects_own_ancestry() {
        let (_dir, repo) = seeded_repo().await;
        let head = repo.head().unwrap();
        assert!(matches!(
            repo.cherry_pick(&head).await.unwrap_err(),
            CoreError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn cherry_pick_applies_changes_from_other_branch() {
        let (dir, repo) = seeded_repo().await;
        repo.create_branch("feature").unwrap();
        repo.switch_branch("feature").await.unwrap();
        fs::write(dir.path().join("feature.txt"), b"from feature\n").unwrap();
        let feature_commit = repo.create_commit("feature work", "kara").await.unwrap();

        repo.switch_branch(crate::repo::DEFAULT_BRANCH).await.unwrap();
        fs::remove_file(dir.path().join("feature.txt")).unwrap();

        let picked = repo.cherry_pick(&feature_commit.hash).await.unwrap();
        assert_eq!(picked.message, "cherry-pick: feature work");
        assert_eq!(
            fs::read(dir.path().join("feature.txt")).unwrap(),
            b"from feature\n"
        );
        assert_eq!(repo.head().unwrap(), picked.hash);
    }

    #[tokio::test]
    async fn rebase_combines_messages() {
        let (dir, repo) = seeded_repo().await;
        fs::write(dir.path().join("a.txt"), b"v2\n").unwrap();
        let second = repo.create_commit("second", "kara").await.unwrap();
        fs::write(dir.path().join("a.txt"), b"v3\n").unwrap();
        let third = repo.create_commit("third", "kara").await.unwrap();

        let plan = vec![
            RebaseItem {
                action: RebaseAction::Combine,
                hash: second.hash.clone(),
                message: "second".into(),
            },
            RebaseItem {
                action: RebaseAction::Keep,
                hash: third.hash.clone(),
                message: "third".into(),
            },
        ];
        let new_head = repo.rebase(&plan).await.unwrap();

        let tip = repo.load_commit(&new_head).unwrap();
        assert_eq!(tip.message, "second");
        assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"v3\n");
    }

    #[tokio::test]
    async fn rebase_of_all_skips_fails() {
        let (_dir, repo) = seeded_repo().await;
        let head = repo.head().unwrap();
        let plan = vec![RebaseItem {
            action: RebaseAction::Skip,
            hash: head,
            message: String::new(),
        }];
        assert!(matches!(
            repo.rebase(&plan).await.unwrap_err(),
            CoreError::InvalidArgument(_)
        ));
    }
}
