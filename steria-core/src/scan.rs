//! Working-tree scanner
//!
//! Walks the repository root, skips the metadata directory and anything the
//! ignore rules match, and hashes every file. Hashing fans out over a fixed
//! worker pool sized to the available cores (minimum 2) fed by a bounded
//! work queue; the returned snapshot maps repo-relative paths to content
//! hashes.

use crate::error::{CoreError, Result};
use crate::hash;
use crate::ignore::IgnoreRules;
use crate::object::{ChangeKind, FileChange};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use walkdir::WalkDir;

/// Depth of the bounded work queue feeding the hash workers
const WORK_QUEUE_DEPTH: usize = 1024;

fn worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

/// Produce the working tree's path → content-hash snapshot
pub fn scan(root: &Path, rules: &IgnoreRules) -> Result<BTreeMap<String, String>> {
    let mut files = Vec::new();
    let mut walker = WalkDir::new(root).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|err| {
            CoreError::Io(std::io::Error::other(format!("walk failed: {err}")))
        })?;
        if entry.path() == root {
            continue;
        }
        let rel = rel_path(root, entry.path());
        if entry.file_type().is_dir() {
            if rules.is_ignored(&rel, true) {
                walker.skip_current_dir();
            }
            continue;
        }
        if !entry.file_type().is_file() || rules.is_ignored(&rel, false) {
            continue;
        }
        files.push((rel, entry.path().to_path_buf()));
    }
    hash_files(files)
}

/// Repo-relative path with forward slashes
fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn hash_files(files: Vec<(String, PathBuf)>) -> Result<BTreeMap<String, String>> {
    if files.len() <= 1 {
        let mut snapshot = BTreeMap::new();
        for (rel, path) in files {
            snapshot.insert(rel, hash::hash_file(&path)?);
        }
        return Ok(snapshot);
    }

    let (work_tx, work_rx) = mpsc::sync_channel::<(String, PathBuf)>(WORK_QUEUE_DEPTH);
    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, result_rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..worker_count() {
            let work_rx = Arc::clone(&work_rx);
            let result_tx = result_tx.clone();
            scope.spawn(move || loop {
                let job = work_rx.lock().recv();
                let (rel, path) = match job {
                    Ok(job) => job,
                    Err(_) => break,
                };
                let outcome = hash::hash_file(&path).map(|digest| (rel, digest));
                if result_tx.send(outcome).is_err() {
                    break;
                }
            });
        }
        for job in files {
            if work_tx.send(job).is_err() {
                break;
            }
        }
        drop(work_tx);
    });
    drop(result_tx);

    let mut snapshot = BTreeMap::new();
    for outcome in result_rx {
        let (rel, digest) = outcome?;
        snapshot.insert(rel, digest);
    }
    Ok(snapshot)
}

/// Compare two snapshots and report additions, modifications and deletions
pub fn changes(
    prev: &BTreeMap<String, String>,
    curr: &BTreeMap<String, String>,
) -> Vec<FileChange> {
    let mut out = Vec::new();
    for (path, digest) in curr {
        match prev.get(path) {
            None => out.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Added,
                hash: digest.clone(),
            }),
            Some(old) if old != digest => out.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Modified,
                hash: digest.clone(),
            }),
            Some(_) => {}
        }
    }
    for path in prev.keys() {
        if !curr.contains_key(path) {
            out.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Deleted,
                hash: String::new(),
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn scan_hashes_every_tracked_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.txt", b"hello\n");
        write(dir.path(), "sub/deep/b.txt", b"world\n");
        write(dir.path(), ".steria/HEAD", b"ignored");

        let snapshot = scan(dir.path(), &IgnoreRules::default()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot["a.txt"],
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert!(snapshot.contains_key("sub/deep/b.txt"));
    }

    #[test]
    fn scan_honors_ignore_rules() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "keep.txt", b"keep");
        write(dir.path(), "skip.log", b"skip");
        write(dir.path(), "target/out.bin", b"skip");

        let rules = IgnoreRules::parse("*.log\ntarget/\n");
        let snapshot = scan(dir.path(), &rules).unwrap();
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["keep.txt"]);
    }

    #[test]
    fn scan_preserves_unicode_and_spaces() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes été.txt", b"x");
        write(dir.path(), "dir with space/f.txt", b"y");

        let snapshot = scan(dir.path(), &IgnoreRules::default()).unwrap();
        assert!(snapshot.contains_key("notes été.txt"));
        assert!(snapshot.contains_key("dir with space/f.txt"));
    }

    #[test]
    fn scan_parallelizes_over_many_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..64 {
            write(dir.path(), &format!("f{i:02}.txt"), format!("{i}").as_bytes());
        }
        let snapshot = scan(dir.path(), &IgnoreRules::default()).unwrap();
        assert_eq!(snapshot.len(), 64);
        assert_eq!(snapshot["f07.txt"], hash::hash_bytes(b"7"));
    }

    #[test]
    fn changes_reports_all_three_kinds() {
        let mut prev = BTreeMap::new();
        prev.insert("same.txt".to_string(), "1".repeat(64));
        prev.insert("edited.txt".to_string(), "2".repeat(64));
        prev.insert("gone.txt".to_string(), "3".repeat(64));

        let mut curr = BTreeMap::new();
        curr.insert("same.txt".to_string(), "1".repeat(64));
        curr.insert("edited.txt".to_string(), "9".repeat(64));
        curr.insert("new.txt".to_string(), "4".repeat(64));

        let report = changes(&prev, &curr);
        let kinds: Vec<_> = report.iter().map(|c| (c.path.as_str(), c.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("edited.txt", ChangeKind::Modified),
                ("gone.txt", ChangeKind::Deleted),
                ("new.txt", ChangeKind::Added),
            ]
        );
        assert!(report.iter().all(|c| {
            (c.kind == ChangeKind::Deleted) == c.hash.is_empty()
        }));
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let mut state = BTreeMap::new();
        state.insert("a.txt".to_string(), "1".repeat(64));
        assert!(changes(&state, &state.clone()).is_empty());
    }
}
