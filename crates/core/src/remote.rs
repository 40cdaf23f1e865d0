//! The remote side of a backup: one named encrypted blob per account.
//!
//! Authentication happens outside this crate; an adapter only reports whether
//! its session is ready.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{Error, Result};

/// Name of the backup blob in the remote store.
pub const BACKUP_BLOB_NAME: &str = "seishin-backup.json";

/// Opaque remote identifier of the backup blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BlobHandle(pub String);

impl BlobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub handle: BlobHandle,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

pub trait BlobStore: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Whether the session is ready for remote calls.
    fn is_authenticated(&self) -> bool {
        true
    }

    fn find<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Option<BlobHandle>>> + Send + 'a>>;

    /// Overwrite `existing` if given, otherwise create the blob. The previous
    /// body stays readable until the new one is fully stored.
    fn upload<'a>(
        &'a self,
        existing: Option<&'a BlobHandle>,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt>> + Send + 'a>>;

    fn download<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

    fn info<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> Pin<Box<dyn Future<Output = Result<BlobInfo>> + Send + 'a>>;
}

/// A directory standing in for the remote store.
#[derive(Debug, Clone)]
pub struct LocalDirBlobStore {
    dir: PathBuf,
}

impl LocalDirBlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self) -> PathBuf {
        self.dir.join(BACKUP_BLOB_NAME)
    }

    fn transport(context: &str, e: std::io::Error) -> Error {
        Error::Transport {
            provider: "local.dir",
            message: format!("{context}: {e}"),
        }
    }

    fn check_handle(&self, handle: &BlobHandle) -> Result<PathBuf> {
        if handle.as_str() != BACKUP_BLOB_NAME {
            return Err(Error::RemoteBlobMissing);
        }
        Ok(self.blob_path())
    }
}

impl BlobStore for LocalDirBlobStore {
    fn provider(&self) -> &'static str {
        "local.dir"
    }

    fn is_authenticated(&self) -> bool {
        self.dir.is_dir()
    }

    fn find<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Option<BlobHandle>>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::fs::try_exists(self.blob_path()).await {
                Ok(true) => Ok(Some(BlobHandle(BACKUP_BLOB_NAME.to_string()))),
                Ok(false) => Ok(None),
                Err(e) => Err(Self::transport("stat blob", e)),
            }
        })
    }

    fn upload<'a>(
        &'a self,
        existing: Option<&'a BlobHandle>,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt>> + Send + 'a>> {
        Box::pin(async move {
            let path = match existing {
                Some(handle) => self.check_handle(handle)?,
                None => self.blob_path(),
            };
            let tmp = self
                .dir
                .join(format!(".{BACKUP_BLOB_NAME}.tmp-{}", uuid::Uuid::new_v4()));
            if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Self::transport("write blob", e));
            }
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(Self::transport("replace blob", e));
            }
            Ok(UploadReceipt {
                handle: BlobHandle(BACKUP_BLOB_NAME.to_string()),
                created_at: Utc::now(),
            })
        })
    }

    fn download<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.check_handle(handle)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::RemoteBlobMissing),
                Err(e) => Err(Self::transport("read blob", e)),
            }
        })
    }

    fn info<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> Pin<Box<dyn Future<Output = Result<BlobInfo>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.check_handle(handle)?;
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::RemoteBlobMissing);
                }
                Err(e) => return Err(Self::transport("stat blob", e)),
            };
            let modified = meta
                .modified()
                .map_err(|e| Self::transport("blob mtime", e))?;
            Ok(BlobInfo {
                modified_at: DateTime::<Utc>::from(modified),
                size: meta.len(),
            })
        })
    }
}

#[derive(Debug, Clone)]
struct MemBlob {
    handle: BlobHandle,
    bytes: Vec<u8>,
    modified_at: DateTime<Utc>,
}

/// In-process blob store with upload counters and failure injection.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    uploaded: AtomicUsize,
    authenticated: AtomicBool,
    fail_next_upload: AtomicBool,
    inner: Mutex<Option<MemBlob>>,
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self {
            uploaded: AtomicUsize::new(0),
            authenticated: AtomicBool::new(true),
            fail_next_upload: AtomicBool::new(false),
            inner: Mutex::new(None),
        }
    }

    pub fn set_authenticated(&self, ready: bool) {
        self.authenticated.store(ready, Ordering::Relaxed);
    }

    /// Make the next upload fail with a transport error before storing.
    pub fn fail_next_upload(&self) {
        self.fail_next_upload.store(true, Ordering::Relaxed);
    }

    pub fn upload_count(&self) -> usize {
        self.uploaded.load(Ordering::Relaxed)
    }

    /// Current blob body, bypassing the trait.
    pub async fn get(&self) -> Option<Vec<u8>> {
        self.inner.lock().await.as_ref().map(|b| b.bytes.clone())
    }

    /// Replace the blob body directly, e.g. to simulate a damaged upload.
    pub async fn put(&self, bytes: Vec<u8>) -> BlobHandle {
        let mut inner = self.inner.lock().await;
        let handle = inner
            .as_ref()
            .map(|b| b.handle.clone())
            .unwrap_or_else(|| BlobHandle(format!("mem:{}", uuid::Uuid::new_v4())));
        *inner = Some(MemBlob {
            handle: handle.clone(),
            bytes,
            modified_at: Utc::now(),
        });
        handle
    }
}

impl BlobStore for InMemoryBlobStore {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    fn find<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Option<BlobHandle>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.inner.lock().await.as_ref().map(|b| b.handle.clone())) })
    }

    fn upload<'a>(
        &'a self,
        existing: Option<&'a BlobHandle>,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadReceipt>> + Send + 'a>> {
        Box::pin(async move {
            if self.fail_next_upload.swap(false, Ordering::Relaxed) {
                return Err(Error::Transport {
                    provider: "test.mem",
                    message: "injected upload failure".to_string(),
                });
            }

            let mut inner = self.inner.lock().await;
            let handle = match existing {
                Some(handle) => {
                    if inner.as_ref().map(|b| &b.handle) != Some(handle) {
                        return Err(Error::RemoteBlobMissing);
                    }
                    handle.clone()
                }
                None => BlobHandle(format!("mem:{}", uuid::Uuid::new_v4())),
            };
            let created_at = Utc::now();
            *inner = Some(MemBlob {
                handle: handle.clone(),
                bytes,
                modified_at: created_at,
            });
            self.uploaded.fetch_add(1, Ordering::Relaxed);
            Ok(UploadReceipt { handle, created_at })
        })
    }

    fn download<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .as_ref()
                .filter(|b| &b.handle == handle)
                .map(|b| b.bytes.clone())
                .ok_or(Error::RemoteBlobMissing)
        })
    }

    fn info<'a>(
        &'a self,
        handle: &'a BlobHandle,
    ) -> Pin<Box<dyn Future<Output = Result<BlobInfo>> + Send + 'a>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .as_ref()
                .filter(|b| &b.handle == handle)
                .map(|b| BlobInfo {
                    modified_at: b.modified_at,
                    size: b.bytes.len() as u64,
                })
                .ok_or(Error::RemoteBlobMissing)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_dir_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let remote = LocalDirBlobStore::new(dir.path());
        assert!(remote.is_authenticated());
        assert_eq!(remote.find().await.unwrap(), None);

        let first = remote.upload(None, b"one".to_vec()).await.unwrap();
        let second = remote
            .upload(Some(&first.handle), b"two!".to_vec())
            .await
            .unwrap();
        assert_eq!(first.handle, second.handle);
        assert_eq!(remote.download(&second.handle).await.unwrap(), b"two!");
        assert_eq!(remote.info(&second.handle).await.unwrap().size, 4);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn local_dir_missing_directory_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let remote = LocalDirBlobStore::new(dir.path().join("absent"));
        assert!(!remote.is_authenticated());
    }

    #[tokio::test]
    async fn memory_failure_keeps_previous_body() {
        let remote = InMemoryBlobStore::new();
        let receipt = remote.upload(None, b"v1".to_vec()).await.unwrap();
        remote.fail_next_upload();
        let err = remote
            .upload(Some(&receipt.handle), b"v2".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(remote.get().await.unwrap(), b"v1");
        assert_eq!(remote.upload_count(), 1);
    }
}
