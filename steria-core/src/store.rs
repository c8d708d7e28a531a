//! Blob store backends
//!
//! Content-addressed byte-blob storage behind a single capability set:
//! `put`, `get`, `has`, `list`. Keys are SHA-256 hex; payloads are stored
//! gzip-compressed with a `.gz` suffix on every backend. Four variants:
//!
//! - Local: payloads at `<dir>/<hash>.gz`
//! - HTTP: `PUT/GET/HEAD /blobs/<hash>.gz`, `GET /blobs` for the listing
//! - S3-compatible: path-style object `<prefix><hash>.gz`, paginated listing
//! - Peer: comma-separated peer base URLs, best-effort fan-out

use crate::error::{CoreError, Result};
use crate::object::{RemoteKind, RemoteSpec};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Content-addressed blob storage.
///
/// A blob is "present" iff `has` reports membership under its hash. `get`
/// fails with `NotFound` when no backend yields the object; `put` reports
/// `Transport` for network failures. Content addressing makes overwrite
/// safe, so `put` on an existing key is not an error.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a compressed payload under `hash`
    async fn put(&self, hash: &str, data: Bytes) -> Result<()>;

    /// Fetch the compressed payload stored under `hash`
    async fn get(&self, hash: &str) -> Result<Bytes>;

    /// Check membership. Unreachable backends report `false`.
    async fn has(&self, hash: &str) -> bool;

    /// Enumerate stored hashes.
    ///
    /// Peer stores may return partial results; callers must not treat a
    /// peer listing as authoritative for absence.
    async fn list(&self) -> Result<Vec<String>>;
}

/// Resolve a configured remote into a concrete backend
pub fn open_remote(spec: &RemoteSpec) -> Result<Box<dyn BlobStore>> {
    Ok(match spec.kind {
        RemoteKind::Local => Box::new(LocalBlobStore::new(PathBuf::from(&spec.url))),
        RemoteKind::Http => Box::new(HttpBlobStore::new(&spec.url)?),
        RemoteKind::S3 => Box::new(S3BlobStore::new(&spec.url, "")?),
        RemoteKind::Peer => Box::new(PeerBlobStore::new(
            spec.url.split(',').map(str::trim).map(String::from).collect(),
        )?),
    })
}

/// Blob store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
}

impl LocalBlobStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.gz"))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, hash: &str, data: Bytes) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.blob_path(hash), &data)?;
        Ok(())
    }

    async fn get(&self, hash: &str) -> Result<Bytes> {
        match fs::read(self.blob_path(hash)) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::not_found("blob", hash))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn has(&self, hash: &str) -> bool {
        self.blob_path(hash).is_file()
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut blobs = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(blobs),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(hash) = name.to_string_lossy().strip_suffix(".gz") {
                blobs.push(hash.to_string());
            }
        }
        Ok(blobs)
    }
}

/// Blob store behind an HTTP remote.
///
/// Expects a REST surface with `PUT/GET/HEAD /blobs/<hash>.gz` and a JSON
/// hash list at `GET /blobs`.
pub struct HttpBlobStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client()?,
        })
    }

    fn blob_url(&self, hash: &str) -> String {
        format!("{}/blobs/{hash}.gz", self.base_url)
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|err| CoreError::Transport(err.to_string()))
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, hash: &str, data: Bytes) -> Result<()> {
        let resp = self.client.put(self.blob_url(hash)).body(data).send().await?;
        check_put_status(resp.status(), hash)
    }

    async fn get(&self, hash: &str) -> Result<Bytes> {
        let resp = self.client.get(self.blob_url(hash)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::not_found("blob", hash));
        }
        if !resp.status().is_success() {
            return Err(CoreError::Transport(format!(
                "GET {} failed: {}",
                self.blob_url(hash),
                resp.status()
            )));
        }
        Ok(resp.bytes().await?)
    }

    async fn has(&self, hash: &str) -> bool {
        match self.client.head(self.blob_url(hash)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let url = format!("{}/blobs", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(CoreError::Transport(format!(
                "GET {url} failed: {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

fn check_put_status(status: reqwest::StatusCode, hash: &str) -> Result<()> {
    if status == reqwest::StatusCode::CONFLICT {
        return Err(CoreError::already_exists("blob", hash));
    }
    if !status.is_success() {
        return Err(CoreError::Transport(format!("PUT failed: {status}")));
    }
    Ok(())
}

/// Blob store on an S3-compatible endpoint.
///
/// Objects live at `<bucket-url>/<prefix><hash>.gz` in path style; listing
/// pages through ListObjectsV2 and strips the prefix and suffix. Request
/// signing is left to whatever sits in front of the endpoint.
pub struct S3BlobStore {
    base_url: String,
    prefix: String,
    client: reqwest::Client,
}

impl S3BlobStore {
    pub fn new(bucket_url: &str, prefix: &str) -> Result<Self> {
        Ok(Self {
            base_url: bucket_url.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
            client: http_client()?,
        })
    }

    fn object_url(&self, hash: &str) -> String {
        format!("{}/{}{hash}.gz", self.base_url, self.prefix)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, hash: &str, data: Bytes) -> Result<()> {
        let resp = self
            .client
            .put(self.object_url(hash))
            .body(data)
            .send()
            .await?;
        check_put_status(resp.status(), hash)
    }

    async fn get(&self, hash: &str) -> Result<Bytes> {
        let resp = self.client.get(self.object_url(hash)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::not_found("blob", hash));
        }
        if !resp.status().is_success() {
            return Err(CoreError::Transport(format!(
                "GET object failed: {}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?)
    }

    async fn has(&self, hash: &str) -> bool {
        match self.client.head(self.object_url(hash)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut blobs = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut url = format!(
                "{}?list-type=2&prefix={}",
                self.base_url, self.prefix
            );
            if let Some(tok) = &token {
                url.push_str("&continuation-token=");
                url.push_str(tok);
            }
            let resp = self.client.get(&url).send().await?;
            if !resp.status().is_success() {
                return Err(CoreError::Transport(format!(
                    "list objects failed: {}",
                    resp.status()
                )));
            }
            let page = parse_list_page(&resp.text().await?)?;
            for key in page.keys {
                let name = key.strip_prefix(&self.prefix).unwrap_or(&key);
                if let Some(hash) = name.strip_suffix(".gz") {
                    blobs.push(hash.to_string());
                }
            }
            match page.next_token {
                Some(tok) if page.truncated => token = Some(tok),
                _ => break,
            }
        }
        Ok(blobs)
    }
}

struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

/// Pull `Key`, `IsTruncated` and `NextContinuationToken` out of a
/// ListObjectsV2 response
fn parse_list_page(xml: &str) -> Result<ListPage> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut page = ListPage {
        keys: Vec::new(),
        truncated: false,
        next_token: None,
    };
    let mut element: Vec<u8> = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => element = start.name().as_ref().to_vec(),
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|err| CoreError::Transport(format!("bad list response: {err}")))?
                    .trim()
                    .to_string();
                if value.is_empty() {
                    continue;
                }
                match element.as_slice() {
                    b"Key" => page.keys.push(value),
                    b"IsTruncated" => page.truncated = value == "true",
                    b"NextContinuationToken" => page.next_token = Some(value),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => element.clear(),
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(CoreError::Transport(format!("bad list response: {err}")))
            }
            Ok(_) => {}
        }
    }
    Ok(page)
}

/// Blob store fanned out across peer nodes.
///
/// `put` is best-effort to every peer, `get` and `has` take the first
/// success, `list` is the union of whatever peers answered.
pub struct PeerBlobStore {
    peers: Vec<String>,
    client: reqwest::Client,
}

impl PeerBlobStore {
    pub fn new(peers: Vec<String>) -> Result<Self> {
        Ok(Self {
            peers: peers
                .into_iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.trim_end_matches('/').to_string())
                .collect(),
            client: http_client()?,
        })
    }

    fn blob_url(peer: &str, hash: &str) -> String {
        format!("{peer}/blobs/{hash}.gz")
    }
}

#[async_trait]
impl BlobStore for PeerBlobStore {
    async fn put(&self, hash: &str, data: Bytes) -> Result<()> {
        let mut delivered = false;
        let mut last_err = None;
        for peer in &self.peers {
            let resp = self
                .client
                .put(Self::blob_url(peer, hash))
                .body(data.clone())
                .send()
                .await;
            match resp {
                Ok(resp) => match check_put_status(resp.status(), hash) {
                    Ok(()) => delivered = true,
                    Err(err) => last_err = Some(err),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }
        if delivered {
            return Ok(());
        }
        Err(last_err.unwrap_or_else(|| CoreError::Transport("no peers configured".into())))
    }

    async fn get(&self, hash: &str) -> Result<Bytes> {
        for peer in &self.peers {
            if let Ok(resp) = self.client.get(Self::blob_url(peer, hash)).send().await {
                if resp.status().is_success() {
                    if let Ok(data) = resp.bytes().await {
                        return Ok(data);
                    }
                }
            }
        }
        Err(CoreError::not_found("blob", hash))
    }

    async fn has(&self, hash: &str) -> bool {
        for peer in &self.peers {
            if let Ok(resp) = self.client.head(Self::blob_url(peer, hash)).send().await {
                if resp.status().is_success() {
                    return true;
                }
            }
        }
        false
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut union = std::collections::BTreeSet::new();
        for peer in &self.peers {
            let url = format!("{peer}/blobs");
            let Ok(resp) = self.client.get(&url).send().await else {
                continue;
            };
            if !resp.status().is_success() {
                continue;
            }
            if let Ok(blobs) = resp.json::<Vec<String>>().await {
                union.extend(blobs);
            }
        }
        Ok(union.into_iter().collect())
    }
}

/// Shared handle used by the codec and sync engine
pub type SharedStore = Arc<dyn BlobStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());
        let hash = "ab".repeat(32);

        assert!(!store.has(&hash).await);
        store.put(&hash, Bytes::from_static(b"payload")).await.unwrap();
        assert!(store.has(&hash).await);
        assert_eq!(store.get(&hash).await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(store.list().await.unwrap(), vec![hash]);
    }

    #[tokio::test]
    async fn local_store_missing_blob_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());
        let err = store.get(&"cd".repeat(32)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "blob", .. }));
    }

    #[tokio::test]
    async fn local_list_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf());
        store.put(&"ef".repeat(32), Bytes::from_static(b"p")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[test]
    fn list_page_parses_keys_and_token() {
        let xml = r#"<?xml version="1.0"?>
            <ListBucketResult>
              <IsTruncated>true</IsTruncated>
              <Contents><Key>blobs/aa.gz</Key></Contents>
              <Contents><Key>blobs/bb.gz</Key></Contents>
              <NextContinuationToken>tok-1</NextContinuationToken>
            </ListBucketResult>"#;
        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.keys, vec!["blobs/aa.gz", "blobs/bb.gz"]);
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok-1"));
    }
}
