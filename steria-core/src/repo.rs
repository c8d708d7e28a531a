//! Repository handle and commit engine
//!
//! A [`Repository`] owns everything scoped to one repository root: the
//! object database, the local blob store, the codec with its caches, and
//! the conflict registry. Every core operation goes through a handle;
//! there is no process-wide state.
//!
//! Metadata layout under `<root>/.steria/`:
//!
//! ```text
//! config.json            {name, author, created}
//! HEAD                   current commit hash (trimmed on read)
//! branch                 current branch name
//! branches/<name>        branch tip hashes
//! refs/tags/<name>       tag records
//! objects/<hh>/<rest>    commit records, two-char shard
//! objects/blobs/<hash>.gz gzip blob payloads
//! conflicts.json         conflict registry
//! remotes.json           configured remotes
//! cache/                 codec disk cache
//! ```

use crate::codec::{self, ObjectCodec};
use crate::conflicts::ConflictRegistry;
use crate::error::{CoreError, Result};
use crate::hash;
use crate::ignore::IgnoreRules;
use crate::object::{Commit, FileChange, Tag};
use crate::odb::{atomic_write, ObjectDb};
use crate::remote;
use crate::scan;
use crate::store::{LocalBlobStore, SharedStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

/// Name of the metadata directory at the repository root
pub const META_DIR: &str = ".steria";

/// Branch created on init
pub const DEFAULT_BRANCH: &str = "Stem";

/// Files above this size are candidates for delta encoding
pub const DELTA_MIN_SIZE: u64 = 1024 * 1024;

/// Soft deadline for the working-tree scan
const SCAN_DEADLINE: Duration = Duration::from_secs(60);

/// Soft deadline for hashing and writing a commit's blobs
const PROCESS_DEADLINE: Duration = Duration::from_secs(60);

/// Repository configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    pub author: String,
    pub created: DateTime<Utc>,
}

/// Snapshot of the repository for `status`
#[derive(Debug, Clone)]
pub struct Status {
    pub branch: String,
    pub head: String,
    pub remote: Option<String>,
    pub changes: Vec<FileChange>,
}

/// Handle to one repository on disk
pub struct Repository {
    root: PathBuf,
    meta: PathBuf,
    config: RepoConfig,
    odb: ObjectDb,
    store: Arc<LocalBlobStore>,
    codec: ObjectCodec,
    conflicts: ConflictRegistry,
    /// Serializes HEAD/branch-ref publication
    publish_lock: Mutex<()>,
}

impl Repository {
    /// Open an existing repository
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = root.join(META_DIR);
        let config_path = meta.join("config.json");
        if !config_path.is_file() {
            return Err(CoreError::NotARepository(root));
        }
        let config: RepoConfig = serde_json::from_slice(&fs::read(&config_path)?)
            .map_err(|err| CoreError::CorruptObject(format!("config.json: {err}")))?;

        let store = Arc::new(LocalBlobStore::new(meta.join("objects").join("blobs")));
        let shared: SharedStore = store.clone();
        Ok(Self {
            odb: ObjectDb::new(meta.join("objects")),
            codec: ObjectCodec::new(shared, meta.join("cache")),
            conflicts: ConflictRegistry::new(&meta),
            store,
            config,
            root,
            meta,
            publish_lock: Mutex::new(()),
        })
    }

    /// Initialize a new repository and create the init commit pair.
    ///
    /// The first commit snapshots the working tree; when the tree holds any
    /// non-metadata files a follow-up commit guarantees the tip records the
    /// full file set. The default branch ref ends up at the resulting HEAD.
    pub async fn init(root: impl Into<PathBuf>, name: &str, author: &str) -> Result<Self> {
        let root = root.into();
        let meta = root.join(META_DIR);
        fs::create_dir_all(meta.join("objects").join("blobs"))?;
        fs::create_dir_all(meta.join("branches"))?;
        fs::create_dir_all(meta.join("refs").join("tags"))?;
        fs::create_dir_all(meta.join("cache"))?;

        let config = RepoConfig {
            name: name.to_string(),
            author: author.to_string(),
            created: Utc::now(),
        };
        fs::write(meta.join("config.json"), serde_json::to_vec_pretty(&config)?)?;
        fs::write(meta.join("HEAD"), b"")?;
        fs::write(meta.join("branch"), DEFAULT_BRANCH.as_bytes())?;

        let repo = Self::open(root)?;
        let first = repo.create_commit("Initial commit", author).await?;
        if !first.files.is_empty() {
            repo.create_commit("Track all user files after init", author)
                .await?;
        }
        Ok(repo)
    }

    /// Open the repository at `root`, initializing one if none exists
    pub async fn load_or_init(root: impl Into<PathBuf>, author: &str) -> Result<Self> {
        let root: PathBuf = root.into();
        if root.join(META_DIR).join("config.json").is_file() {
            return Self::open(root);
        }
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string());
        Self::init(root, &name, author).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub(crate) fn meta_dir(&self) -> &Path {
        &self.meta
    }

    pub(crate) fn odb(&self) -> &ObjectDb {
        &self.odb
    }

    pub(crate) fn codec(&self) -> &ObjectCodec {
        &self.codec
    }

    pub(crate) fn local_store(&self) -> &LocalBlobStore {
        &self.store
    }

    pub fn conflicts(&self) -> &ConflictRegistry {
        &self.conflicts
    }

    pub(crate) fn blobs_dir(&self) -> PathBuf {
        self.meta.join("objects").join("blobs")
    }

    pub(crate) fn branches_dir(&self) -> PathBuf {
        self.meta.join("branches")
    }

    fn tags_dir(&self) -> PathBuf {
        self.meta.join("refs").join("tags")
    }

    // --- refs ---------------------------------------------------------

    /// Current HEAD hash, empty right after init
    pub fn head(&self) -> Result<String> {
        match fs::read_to_string(self.meta.join("HEAD")) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn set_head(&self, hash: &str) -> Result<()> {
        atomic_write(&self.meta.join("HEAD"), hash.as_bytes())
    }

    /// Name of the current branch
    pub fn current_branch(&self) -> Result<String> {
        match fs::read_to_string(self.meta.join("branch")) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(DEFAULT_BRANCH.to_string())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn set_current_branch(&self, name: &str) -> Result<()> {
        atomic_write(&self.meta.join("branch"), name.as_bytes())
    }

    pub(crate) fn branch_ref_path(&self, name: &str) -> PathBuf {
        self.branches_dir().join(name)
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.branch_ref_path(name).is_file()
    }

    /// Tip hash of a branch
    pub fn read_branch_ref(&self, name: &str) -> Result<String> {
        match fs::read_to_string(self.branch_ref_path(name)) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("branch", name))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) fn write_branch_ref(&self, name: &str, hash: &str) -> Result<()> {
        let path = self.branch_ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        atomic_write(&path, hash.as_bytes())
    }

    /// All branch names, including nested ones
    pub fn list_branches(&self) -> Result<Vec<String>> {
        let dir = self.branches_dir();
        let mut names = Vec::new();
        if !dir.is_dir() {
            return Ok(names);
        }
        for entry in WalkDir::new(&dir) {
            let entry =
                entry.map_err(|err| CoreError::Io(std::io::Error::other(err.to_string())))?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&dir)
                    .unwrap_or(entry.path())
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(rel);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Serialize a HEAD + current-branch-ref update
    pub(crate) fn publish_head(&self, hash: &str) -> Result<()> {
        let _guard = self.publish_lock.lock();
        self.set_head(hash)?;
        self.write_branch_ref(&self.current_branch()?, hash)
    }

    // --- commits ------------------------------------------------------

    /// Load a commit record, validating the hash format first
    pub fn load_commit(&self, hash: &str) -> Result<Commit> {
        if !crate::hash::is_full_hash(hash) {
            return Err(CoreError::InvalidArgument(format!(
                "malformed commit hash: '{hash}'"
            )));
        }
        self.odb.load(hash)
    }

    /// Scan the working tree under the scan deadline
    pub(crate) async fn scan_working_tree(&self) -> Result<BTreeMap<String, String>> {
        let root = self.root.clone();
        let rules = IgnoreRules::load(&root)?;
        let task = tokio::task::spawn_blocking(move || scan::scan(&root, &rules));
        match tokio::time::timeout(SCAN_DEADLINE, task).await {
            Err(_) => Err(CoreError::Timeout { stage: "scan" }),
            Ok(Err(join_err)) => Err(CoreError::Io(std::io::Error::other(format!(
                "scan worker: {join_err}"
            )))),
            Ok(Ok(snapshot)) => snapshot,
        }
    }

    /// Path → content-hash state recorded by a commit.
    ///
    /// Full references are their own content hash; delta references resolve
    /// through the codec (and its caches) and hash the result.
    pub async fn commit_state(&self, commit: &Commit) -> Result<BTreeMap<String, String>> {
        let mut state = BTreeMap::new();
        for (path, blob_ref) in &commit.file_blobs {
            let content_hash = if codec::is_delta(blob_ref) {
                hash::hash_bytes(&self.codec.resolve(blob_ref).await?)
            } else {
                blob_ref.clone()
            };
            state.insert(path.clone(), content_hash);
        }
        Ok(state)
    }

    /// Working-tree changes relative to HEAD
    pub async fn changes(&self) -> Result<Vec<FileChange>> {
        let head = self.head()?;
        let prev = if head.is_empty() {
            BTreeMap::new()
        } else {
            self.commit_state(&self.odb.load(&head)?).await?
        };
        let curr = self.scan_working_tree().await?;
        Ok(scan::changes(&prev, &curr))
    }

    /// Current branch, HEAD, default remote and pending changes
    pub async fn status(&self) -> Result<Status> {
        Ok(Status {
            branch: self.current_branch()?,
            head: self.head()?,
            remote: remote::load_remotes(&self.meta)?
                .first()
                .map(|r| r.url.clone()),
            changes: self.changes().await?,
        })
    }

    /// Materialize a commit from the working tree.
    ///
    /// Order on disk: blob payloads, then the commit record, then HEAD and
    /// the current branch ref. A crash before the final step leaves the
    /// previous HEAD intact; orphaned objects are harmless.
    pub async fn create_commit(&self, message: &str, author: &str) -> Result<Commit> {
        let head = self.head()?;
        let parent = if head.is_empty() {
            None
        } else {
            Some(self.odb.load(&head)?)
        };

        let snapshot = self.scan_working_tree().await?;
        let parent_state = match &parent {
            Some(commit) => self.commit_state(commit).await?,
            None => BTreeMap::new(),
        };

        let write_blobs = async {
            let mut file_blobs = BTreeMap::new();
            for (path, content_hash) in &snapshot {
                let prev_ref = parent.as_ref().and_then(|c| c.file_blobs.get(path));
                if let Some(prev) = prev_ref {
                    if parent_state.get(path) == Some(content_hash) {
                        // Unchanged: the parent's reference stays valid verbatim.
                        file_blobs.insert(path.clone(), prev.clone());
                        continue;
                    }
                }
                let data = fs::read(self.root.join(path))?;
                let blob_ref = self.write_file_blob(content_hash, &data, prev_ref).await?;
                file_blobs.insert(path.clone(), blob_ref);
            }
            Ok::<_, CoreError>(file_blobs)
        };
        let file_blobs = tokio::time::timeout(PROCESS_DEADLINE, write_blobs)
            .await
            .map_err(|_| CoreError::Timeout {
                stage: "process-files",
            })??;

        let commit = Commit::new(message, author, head, file_blobs)?;
        self.odb.save(&commit)?;
        self.publish_head(&commit.hash)?;
        self.spawn_remote_push();
        Ok(commit)
    }

    /// Write one file's content as a blob, delta-encoding against the
    /// previous reference when the file is large and the chain is shallow
    async fn write_file_blob(
        &self,
        content_hash: &str,
        data: &[u8],
        prev_ref: Option<&String>,
    ) -> Result<String> {
        if data.len() as u64 > DELTA_MIN_SIZE {
            if let Some(prev_ref) = prev_ref {
                if codec::delta_depth(prev_ref) < codec::MAX_DELTA_DEPTH {
                    let base = self.codec.resolve(prev_ref).await?;
                    let patch = codec::make_patch(&base, data);
                    let patch_hash = hash::hash_bytes(&patch);
                    self.codec.put_blob(&patch_hash, &patch).await?;
                    return Ok(format!("delta:{prev_ref}:{patch_hash}"));
                }
            }
        }
        self.codec.put_blob(content_hash, data).await?;
        Ok(content_hash.to_string())
    }

    /// Best-effort push of local blobs to every configured remote.
    ///
    /// Failures are logged and discarded; the commit is already durable.
    fn spawn_remote_push(&self) {
        let specs = match remote::load_remotes(&self.meta) {
            Ok(specs) if !specs.is_empty() => specs,
            _ => return,
        };
        let local = LocalBlobStore::new(self.blobs_dir());
        tokio::spawn(async move {
            for spec in specs {
                match remote::sync_to_remote(&local, &spec).await {
                    Ok(report) => tracing::debug!(
                        remote = %spec.name,
                        pushed = report.transferred,
                        "post-commit sync"
                    ),
                    Err(err) => tracing::debug!(
                        remote = %spec.name,
                        error = %err,
                        "post-commit sync skipped"
                    ),
                }
            }
        });
    }

    /// Resolve a blob reference recorded by a commit to its uncompressed
    /// bytes. The reference stays opaque to callers.
    pub async fn resolve_blob(&self, blob_ref: &str) -> Result<bytes::Bytes> {
        self.codec.resolve(blob_ref).await
    }

    /// Write a working-tree file, creating parent directories
    pub(crate) fn write_working_file(&self, rel: &str, data: &[u8]) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    /// Remove a working-tree file; already-absent files are fine
    pub(crate) fn remove_working_file(&self, rel: &str) -> Result<()> {
        match fs::remove_file(self.root.join(rel)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Walk the parent chain from HEAD, newest first
    pub fn log(&self, limit: usize) -> Result<Vec<Commit>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.head()?;
        while !cursor.is_empty() && out.len() < limit && seen.insert(cursor.clone()) {
            let commit = self.odb.load(&cursor)?;
            cursor = commit.parent.clone();
            out.push(commit);
        }
        Ok(out)
    }

    // --- tags ---------------------------------------------------------

    /// Create an immutable tag pointing at `commit` (HEAD when omitted)
    pub fn create_tag(
        &self,
        name: &str,
        commit: Option<&str>,
        message: &str,
        author: &str,
    ) -> Result<Tag> {
        if name.is_empty() {
            return Err(CoreError::InvalidArgument("empty tag name".into()));
        }
        let commit = match commit {
            Some(hash) => hash.to_string(),
            None => self.head()?,
        };
        if !self.odb.contains(&commit) {
            return Err(CoreError::not_found("commit", commit));
        }
        let path = self.tags_dir().join(name);
        if path.is_file() {
            return Err(CoreError::already_exists("tag", name));
        }
        let tag = Tag {
            name: name.to_string(),
            commit,
            message: message.to_string(),
            author: author.to_string(),
            timestamp: Utc::now(),
        };
        fs::create_dir_all(self.tags_dir())?;
        atomic_write(&path, &serde_json::to_vec_pretty(&tag)?)?;
        Ok(tag)
    }

    pub fn load_tag(&self, name: &str) -> Result<Tag> {
        let data = match fs::read(self.tags_dir().join(name)) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::not_found("tag", name));
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data)
            .map_err(|err| CoreError::CorruptObject(format!("tag {name}: {err}")))
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let dir = self.tags_dir();
        let mut tags = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(tags),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                tags.push(self.load_tag(&entry.file_name().to_string_lossy())?);
            }
        }
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    pub fn delete_tag(&self, name: &str) -> Result<()> {
        let path = self.tags_dir().join(name);
        if !path.is_file() {
            return Err(CoreError::not_found("tag", name));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Move HEAD to the tagged commit (detached; the branch ref is untouched)
    pub fn checkout_tag(&self, name: &str) -> Result<Tag> {
        let tag = self.load_tag(name)?;
        if !self.odb.contains(&tag.commit) {
            return Err(CoreError::not_found("commit", tag.commit));
        }
        self.set_head(&tag.commit)?;
        Ok(tag)
    }
}
