//! Remote blob synchronization
//!
//! `remotes.json` lists named stores; push copies every local blob the
//! remote lacks, pull is the symmetric operation. Both are idempotent and
//! only move blobs; commit exchange is a higher-layer protocol.

use crate::error::{CoreError, Result};
use crate::object::RemoteSpec;
use crate::odb::atomic_write;
use crate::repo::Repository;
use crate::store::{open_remote, BlobStore, LocalBlobStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RemotesFile {
    remotes: Vec<RemoteSpec>,
}

/// Read the configured remotes; a missing file is an empty list
pub fn load_remotes(meta_dir: &Path) -> Result<Vec<RemoteSpec>> {
    match fs::read(meta_dir.join("remotes.json")) {
        Ok(data) => serde_json::from_slice::<RemotesFile>(&data)
            .map(|f| f.remotes)
            .map_err(|err| CoreError::CorruptObject(format!("remotes.json: {err}"))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

fn save_remotes(meta_dir: &Path, remotes: Vec<RemoteSpec>) -> Result<()> {
    atomic_write(
        &meta_dir.join("remotes.json"),
        &serde_json::to_vec_pretty(&RemotesFile { remotes })?,
    )
}

/// Blobs moved and skipped by one sync run
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub transferred: usize,
    pub skipped: usize,
}

/// Copy every blob present in `src` but absent from `dst`
async fn sync_stores(src: &dyn BlobStore, dst: &dyn BlobStore) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    for hash in src.list().await? {
        if dst.has(&hash).await {
            report.skipped += 1;
            continue;
        }
        let data = src.get(&hash).await?;
        dst.put(&hash, data).await?;
        report.transferred += 1;
    }
    Ok(report)
}

/// Push the local store's blobs to a configured remote
pub async fn sync_to_remote(local: &LocalBlobStore, spec: &RemoteSpec) -> Result<SyncReport> {
    let remote = open_remote(spec)?;
    sync_stores(local, remote.as_ref()).await
}

impl Repository {
    /// Configured remotes
    pub fn remotes(&self) -> Result<Vec<RemoteSpec>> {
        load_remotes(self.meta_dir())
    }

    /// Register a remote; names are unique
    pub fn add_remote(&self, spec: RemoteSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(CoreError::InvalidArgument("empty remote name".into()));
        }
        let mut remotes = self.remotes()?;
        if remotes.iter().any(|r| r.name == spec.name) {
            return Err(CoreError::already_exists("remote", &spec.name));
        }
        remotes.push(spec);
        save_remotes(self.meta_dir(), remotes)
    }

    fn remote_spec(&self, name: &str) -> Result<RemoteSpec> {
        self.remotes()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| CoreError::not_found("remote", name))
    }

    /// Push local blobs to the named remote
    pub async fn push(&self, name: &str) -> Result<SyncReport> {
        let spec = self.remote_spec(name)?;
        self.push_to(&spec).await
    }

    /// Pull the named remote's blobs into the local store
    pub async fn pull(&self, name: &str) -> Result<SyncReport> {
        let spec = self.remote_spec(name)?;
        self.pull_from(&spec).await
    }

    /// Push to a remote described inline (not necessarily configured)
    pub async fn push_to(&self, spec: &RemoteSpec) -> Result<SyncReport> {
        let remote = open_remote(spec)?;
        sync_stores(self.local_store(), remote.as_ref()).await
    }

    /// Pull from a remote described inline
    pub async fn pull_from(&self, spec: &RemoteSpec) -> Result<SyncReport> {
        let remote = open_remote(spec)?;
        sync_stores(remote.as_ref(), self.local_store()).await
    }
}
