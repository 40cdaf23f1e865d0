use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backup::check_cancelled;
use crate::crypto::{self, EncryptedPayload, KdfParams};
use crate::progress::{ProgressSink, TaskProgress};
use crate::remote::{BlobInfo, BlobStore};
use crate::snapshot::{BackupSnapshot, TableCounts, decode_snapshot, validate_snapshot};
use crate::store::Store;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub passphrase: String,
    pub kdf: KdfParams,
}

impl RestoreConfig {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            kdf: KdfParams::default(),
        }
    }
}

/// A decrypted, validated backup that has not been applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePreview {
    #[serde(skip)]
    pub snapshot: BackupSnapshot,
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub counts: TableCounts,
    pub bytes_downloaded: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub exported_at: DateTime<Utc>,
    pub counts: TableCounts,
}

#[derive(Default)]
pub struct RestoreOptions<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a dyn ProgressSink>,
}

pub async fn fetch_restore<R: BlobStore + ?Sized>(
    remote: &R,
    config: RestoreConfig,
) -> Result<RestorePreview> {
    fetch_restore_with(remote, config, RestoreOptions::default()).await
}

/// Download, decrypt and validate the remote backup. Never touches the
/// local store; apply the result with [`confirm_restore`].
pub async fn fetch_restore_with<R: BlobStore + ?Sized>(
    remote: &R,
    config: RestoreConfig,
    options: RestoreOptions<'_>,
) -> Result<RestorePreview> {
    let provider = remote.provider();
    info!(event = "restore.start", provider, "restore.start");

    if config.passphrase.is_empty() {
        return Err(Error::MissingPassphrase);
    }
    if !remote.is_authenticated() {
        return Err(Error::Unauthenticated);
    }
    check_cancelled(options.cancel)?;

    let started = Instant::now();
    debug!(event = "phase.start", phase = "download", "phase.start");
    let handle = remote.find().await?.ok_or(Error::RemoteBlobMissing)?;
    let body = remote.download(&handle).await.inspect_err(|e| {
        error!(
            event = "io.remote.download_failed",
            provider,
            handle = %handle,
            error = %e,
            "io.remote.download_failed"
        );
    })?;
    let bytes_downloaded = body.len() as u64;
    debug!(
        event = "phase.finish",
        phase = "download",
        duration_ms = started.elapsed().as_millis() as u64,
        bytes_downloaded,
        "phase.finish"
    );
    if let Some(sink) = options.progress {
        sink.on_progress(TaskProgress {
            bytes_downloaded: Some(bytes_downloaded),
            ..TaskProgress::phase("download")
        });
    }
    check_cancelled(options.cancel)?;

    let started = Instant::now();
    debug!(event = "phase.start", phase = "decrypt", "phase.start");
    let envelope = EncryptedPayload::from_json_bytes(&body)?;
    let plaintext = crypto::decrypt(config.kdf, envelope, config.passphrase)
        .await
        .inspect_err(|e| {
            error!(event = "restore.decrypt_failed", error = %e, "restore.decrypt_failed");
        })?;
    debug!(
        event = "phase.finish",
        phase = "decrypt",
        duration_ms = started.elapsed().as_millis() as u64,
        "phase.finish"
    );
    check_cancelled(options.cancel)?;

    debug!(event = "phase.start", phase = "parse", "phase.start");
    let snapshot = decode_snapshot(&plaintext)?;
    let counts = snapshot.counts();
    debug!(
        event = "phase.finish",
        phase = "parse",
        records = counts.total(),
        "phase.finish"
    );
    if let Some(sink) = options.progress {
        sink.on_progress(TaskProgress {
            records: Some(counts.total() as u64),
            ..TaskProgress::phase("parse")
        });
    }

    info!(
        event = "restore.preview",
        version = %snapshot.version,
        exported_at = %snapshot.exported_at,
        records = counts.total(),
        "restore.preview"
    );
    Ok(RestorePreview {
        version: snapshot.version.clone(),
        exported_at: snapshot.exported_at,
        counts,
        bytes_downloaded,
        snapshot,
    })
}

/// Replace the local store with a previewed backup, all or nothing.
pub async fn confirm_restore(store: &Store, preview: RestorePreview) -> Result<RestoreResult> {
    apply_snapshot(store, &preview.snapshot).await
}

pub async fn apply_snapshot(store: &Store, snapshot: &BackupSnapshot) -> Result<RestoreResult> {
    validate_snapshot(snapshot)?;
    let counts = snapshot.counts();
    store
        .replace_all(&snapshot.tables)
        .await
        .inspect_err(|e| {
            error!(event = "restore.apply_failed", error = %e, "restore.apply_failed");
        })?;
    info!(
        event = "restore.apply",
        exported_at = %snapshot.exported_at,
        records = counts.total(),
        "restore.apply"
    );
    Ok(RestoreResult {
        exported_at: snapshot.exported_at,
        counts,
    })
}

/// When the remote backup was last written and how large it is.
pub async fn remote_backup_info<R: BlobStore + ?Sized>(remote: &R) -> Result<Option<BlobInfo>> {
    if !remote.is_authenticated() {
        return Err(Error::Unauthenticated);
    }
    match remote.find().await? {
        Some(handle) => Ok(Some(remote.info(&handle).await?)),
        None => Ok(None),
    }
}
