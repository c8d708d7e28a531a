//! End-to-end workflows over real repository directories

use std::fs;
use steria_core::{
    codec, ChangeKind, ConflictStatus, CoreError, MergeOutcome, RebaseAction, RebaseItem,
    Repository, DEFAULT_BRANCH,
};
use tempfile::TempDir;

const HELLO_HASH: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

#[tokio::test]
async fn init_and_commit_records_blob() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();

    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();
    let head = repo.head().unwrap();
    assert!(!head.is_empty());
    assert_eq!(repo.read_branch_ref(DEFAULT_BRANCH).unwrap(), head);

    let tip = repo.load_commit(&head).unwrap();
    assert_eq!(tip.files, vec!["a.txt"]);
    assert_eq!(tip.file_blobs["a.txt"], HELLO_HASH);

    let blob_path = dir
        .path()
        .join(".steria/objects/blobs")
        .join(format!("{HELLO_HASH}.gz"));
    assert!(blob_path.is_file());
    let payload = fs::read(blob_path).unwrap();
    assert_eq!(codec::gunzip(&payload).unwrap(), b"hello\n");
}

#[tokio::test]
async fn modify_then_status_and_diff() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"hello\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    fs::write(dir.path().join("a.txt"), b"hello\nworld\n").unwrap();

    let status = repo.status().await.unwrap();
    assert_eq!(status.changes.len(), 1);
    assert_eq!(status.changes[0].path, "a.txt");
    assert_eq!(status.changes[0].kind, ChangeKind::Modified);

    let stats = steria_core::diff::stats(b"hello\n", b"hello\nworld\n");
    assert_eq!(stats.added, 1);
    assert_eq!(stats.removed, 0);
    assert_eq!(stats.changed, 0);
}

#[tokio::test]
async fn empty_file_has_empty_string_digest() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("empty.txt"), b"").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    let tip = repo.load_commit(&repo.head().unwrap()).unwrap();
    assert_eq!(
        tip.file_blobs["empty.txt"],
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    let restored = repo.commit_state(&tip).await.unwrap();
    assert_eq!(restored["empty.txt"], tip.file_blobs["empty.txt"]);
}

#[tokio::test]
async fn unicode_and_nested_paths_survive_commit() {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("docs/één map")).unwrap();
    fs::write(dir.path().join("docs/één map/ノート.txt"), b"x\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    let tip = repo.load_commit(&repo.head().unwrap()).unwrap();
    assert_eq!(tip.files, vec!["docs/één map/ノート.txt"]);
    assert!(tip.file_blobs.contains_key("docs/één map/ノート.txt"));
}

#[tokio::test]
async fn divergent_branches_share_their_fork_point() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"base\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();
    let c0 = repo.head().unwrap();

    repo.create_branch("feature").unwrap();
    repo.switch_branch("feature").await.unwrap();
    fs::write(dir.path().join("feature.txt"), b"f\n").unwrap();
    let cf = repo.create_commit("feature work", "K").await.unwrap();

    repo.switch_branch(DEFAULT_BRANCH).await.unwrap();
    fs::write(dir.path().join("stem.txt"), b"s\n").unwrap();
    let cs = repo.create_commit("stem work", "K").await.unwrap();

    assert_eq!(repo.find_merge_base(&cs.hash, &cf.hash).unwrap(), c0);
}

#[tokio::test]
async fn fast_forward_merge_moves_the_pointer() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"base\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    repo.create_branch("feature").unwrap();
    repo.switch_branch("feature").await.unwrap();
    fs::write(dir.path().join("a.txt"), b"base\nextended\n").unwrap();
    let cf = repo.create_commit("extend", "K").await.unwrap();

    repo.switch_branch(DEFAULT_BRANCH).await.unwrap();
    let outcome = repo.merge("feature", "K").await.unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::FastForward {
            head: cf.hash.clone()
        }
    );
    assert_eq!(repo.head().unwrap(), cf.hash);
    assert_eq!(repo.read_branch_ref(DEFAULT_BRANCH).unwrap(), cf.hash);
    assert!(repo.conflicts().is_clean().unwrap());
    assert_eq!(
        fs::read(dir.path().join("a.txt")).unwrap(),
        b"base\nextended\n"
    );

    // Merging again reports up to date.
    let again = repo.merge("feature", "K").await.unwrap();
    assert_eq!(again, MergeOutcome::AlreadyUpToDate);
}

#[tokio::test]
async fn conflicting_merge_writes_markers_and_registry() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"x\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();
    let head_before = {
        repo.create_branch("feature").unwrap();
        repo.switch_branch("feature").await.unwrap();
        fs::write(dir.path().join("a.txt"), b"z\n").unwrap();
        repo.create_commit("target change", "K").await.unwrap();

        repo.switch_branch(DEFAULT_BRANCH).await.unwrap();
        fs::write(dir.path().join("a.txt"), b"y\n").unwrap();
        repo.create_commit("current change", "K").await.unwrap().hash
    };

    let err = repo.merge("feature", "K").await.unwrap_err();
    match err {
        CoreError::MergeConflicts { files } => assert_eq!(files, vec!["a.txt"]),
        other => panic!("expected MergeConflicts, got {other:?}"),
    }

    // HEAD stays put; the working tree carries the marker block.
    assert_eq!(repo.head().unwrap(), head_before);
    let merged = fs::read_to_string(dir.path().join("a.txt")).unwrap();
    assert_eq!(merged, "<<<<<<< mine\ny\n=======\nz\n>>>>>>> theirs\n");

    let unresolved = repo.conflicts().list_unresolved().unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].file, "a.txt");
    assert_eq!(unresolved[0].status, ConflictStatus::Unresolved);
    assert_eq!(unresolved[0].lines, Some(vec![1, 2, 3, 4, 5]));
}

#[tokio::test]
async fn resolve_clears_registry_and_allows_commit() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"x\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    repo.create_branch("feature").unwrap();
    repo.switch_branch("feature").await.unwrap();
    fs::write(dir.path().join("a.txt"), b"z\n").unwrap();
    repo.create_commit("target change", "K").await.unwrap();

    repo.switch_branch(DEFAULT_BRANCH).await.unwrap();
    fs::write(dir.path().join("a.txt"), b"y\n").unwrap();
    repo.create_commit("current change", "K").await.unwrap();

    assert!(repo.merge("feature", "K").await.is_err());

    fs::write(dir.path().join("a.txt"), b"resolved\n").unwrap();
    repo.conflicts().resolve("a.txt", "K").unwrap();
    assert!(repo.conflicts().is_clean().unwrap());

    let status = repo.status().await.unwrap();
    assert!(status
        .changes
        .iter()
        .any(|c| c.path == "a.txt" && c.kind == ChangeKind::Modified));

    let commit = repo.create_commit("resolve conflict", "K").await.unwrap();
    let state = repo.commit_state(&commit).await.unwrap();
    assert_eq!(
        state["a.txt"],
        steria_core::hash::hash_bytes(b"resolved\n")
    );
}

#[tokio::test]
async fn delete_versus_modify_is_recorded_as_conflict() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"shared\n").unwrap();
    fs::write(dir.path().join("keep.txt"), b"keep\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    repo.create_branch("feature").unwrap();
    repo.switch_branch("feature").await.unwrap();
    fs::write(dir.path().join("a.txt"), b"modified on feature\n").unwrap();
    repo.create_commit("modify", "K").await.unwrap();

    repo.switch_branch(DEFAULT_BRANCH).await.unwrap();
    fs::remove_file(dir.path().join("a.txt")).unwrap();
    repo.create_commit("delete", "K").await.unwrap();

    let err = repo.merge("feature", "K").await.unwrap_err();
    assert!(matches!(err, CoreError::MergeConflicts { .. }));
    let unresolved = repo.conflicts().list_unresolved().unwrap();
    assert_eq!(unresolved[0].file, "a.txt");

    let merged = fs::read_to_string(dir.path().join("a.txt")).unwrap();
    assert!(merged.contains("<<<<<<< mine"));
    assert!(merged.contains("modified on feature"));
}

#[tokio::test]
async fn three_way_merge_combines_independent_edits() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"a\n").unwrap();
    fs::write(dir.path().join("b.txt"), b"b\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    repo.create_branch("feature").unwrap();
    repo.switch_branch("feature").await.unwrap();
    fs::write(dir.path().join("b.txt"), b"b changed\n").unwrap();
    fs::write(dir.path().join("new.txt"), b"added on feature\n").unwrap();
    let cf = repo.create_commit("feature edits", "K").await.unwrap();

    repo.switch_branch(DEFAULT_BRANCH).await.unwrap();
    fs::remove_file(dir.path().join("new.txt")).unwrap();
    fs::write(dir.path().join("a.txt"), b"a changed\n").unwrap();
    repo.create_commit("stem edits", "K").await.unwrap();

    let outcome = repo.merge("feature", "K").await.unwrap();
    assert_eq!(outcome, MergeOutcome::Merged { head: cf.hash });

    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"a changed\n");
    assert_eq!(fs::read(dir.path().join("b.txt")).unwrap(), b"b changed\n");
    assert_eq!(
        fs::read(dir.path().join("new.txt")).unwrap(),
        b"added on feature\n"
    );
}

#[tokio::test]
async fn rebase_skip_drops_a_commit_from_history() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"v1\n").unwrap();
    let repo = Repository::init(dir.path(), "proj", "K").await.unwrap();

    fs::write(dir.path().join("a.txt"), b"v2\n").unwrap();
    let second = repo.create_commit("second", "K").await.unwrap();
    fs::write(dir.path().join("a.txt"), b"v3\n").unwrap();
    let third = repo.create_commit("third", "K").await.unwrap();
    fs::write(dir.path().join("a.txt"), b"v4\n").unwrap();
    let fourth = repo.create_commit("fourth", "K").await.unwrap();

    let plan = vec![
        RebaseItem {
            action: RebaseAction::Keep,
            hash: second.hash.clone(),
            message: "second".into(),
        },
        RebaseItem {
            action: RebaseAction::Skip,
            hash: third.hash.clone(),
            message: "third".into(),
        },
        RebaseItem {
            action: RebaseAction::Keep,
            hash: fourth.hash.clone(),
            message: "fourth".into(),
        },
    ];
    repo.rebase(&plan).await.unwrap();

    let messages: Vec<_> = repo
        .log(10)
        .unwrap()
        .into_iter()
        .map(|c| c.message)
        .collect();
    assert_eq!(messages[0], "fourth");
    assert_eq!(messages[1], "second");
    assert!(!messages.contains(&"third".to_string()));
    assert_eq!(fs::read(dir.path().join("a.txt")).unwrap(), b"v4\n");
}
