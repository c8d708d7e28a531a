//! Steria core
//!
//! Content-addressed version-control storage engine:
//! - Object model (commits, tags, blob references)
//! - Pluggable blob stores (local, HTTP, S3-compatible, peer)
//! - Codec with gzip compression, delta patches and caching
//! - Parallel working-tree scanner and commit engine
//! - Branch management with fast-forward and three-way merge
//! - Conflict registry and restore/cherry-pick/rebase
//! - Remote blob synchronization

pub mod branch;
pub mod codec;
pub mod conflicts;
pub mod diff;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod object;
pub mod odb;
pub mod remote;
pub mod repo;
pub mod restore;
pub mod scan;
pub mod stash;
pub mod store;

pub use branch::MergeOutcome;
pub use conflicts::{Conflict, ConflictKind, ConflictRegistry, ConflictStatus};
pub use error::{CoreError, Result};
pub use object::{ChangeKind, Commit, FileChange, RemoteKind, RemoteSpec, Tag};
pub use remote::SyncReport;
pub use repo::{RepoConfig, Repository, Status, DEFAULT_BRANCH, META_DIR};
pub use restore::{RebaseAction, RebaseItem};
pub use stash::StashEntry;
pub use store::{
    open_remote, BlobStore, HttpBlobStore, LocalBlobStore, PeerBlobStore, S3BlobStore,
};
