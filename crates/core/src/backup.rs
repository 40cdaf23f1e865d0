use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::crypto::{self, KdfParams};
use crate::progress::{ProgressSink, TaskProgress};
use crate::remote::{BlobHandle, BlobStore};
use crate::snapshot::{TableCounts, encode_snapshot, export_snapshot};
use crate::store::{Store, now_utc};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub passphrase: String,
    pub kdf: KdfParams,
}

impl BackupConfig {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
            kdf: KdfParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub handle: BlobHandle,
    pub created_at: DateTime<Utc>,
    pub exported_at: DateTime<Utc>,
    pub counts: TableCounts,
    pub bytes_uploaded: u64,
}

#[derive(Default)]
pub struct BackupOptions<'a> {
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a dyn ProgressSink>,
}

pub async fn run_backup<R: BlobStore + ?Sized>(
    store: &Store,
    remote: &R,
    config: BackupConfig,
) -> Result<BackupResult> {
    run_backup_with(store, remote, config, BackupOptions::default()).await
}

pub(crate) fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
    if let Some(cancel) = cancel
        && cancel.is_cancelled()
    {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Export, encrypt and upload the whole store.
///
/// The remote blob is only replaced by a complete upload; a failure at any
/// step leaves the previous backup as it was.
pub async fn run_backup_with<R: BlobStore + ?Sized>(
    store: &Store,
    remote: &R,
    config: BackupConfig,
    options: BackupOptions<'_>,
) -> Result<BackupResult> {
    let provider = remote.provider();
    info!(event = "backup.start", provider, "backup.start");

    if config.passphrase.is_empty() {
        return Err(Error::MissingPassphrase);
    }
    if !remote.is_authenticated() {
        return Err(Error::Unauthenticated);
    }
    check_cancelled(options.cancel)?;

    let started = Instant::now();
    debug!(event = "phase.start", phase = "export", "phase.start");
    let exported_at = now_utc();
    let snapshot = export_snapshot(store, exported_at).await?;
    let counts = snapshot.counts();
    let plaintext = encode_snapshot(&snapshot)?;
    drop(snapshot);
    debug!(
        event = "phase.finish",
        phase = "export",
        duration_ms = started.elapsed().as_millis() as u64,
        records = counts.total(),
        bytes = plaintext.len(),
        "phase.finish"
    );
    if let Some(sink) = options.progress {
        sink.on_progress(TaskProgress {
            records: Some(counts.total() as u64),
            ..TaskProgress::phase("export")
        });
    }
    check_cancelled(options.cancel)?;

    let started = Instant::now();
    debug!(event = "phase.start", phase = "encrypt", "phase.start");
    let envelope = crypto::encrypt(config.kdf, plaintext, config.passphrase).await?;
    let body = envelope.to_json_bytes()?;
    debug!(
        event = "phase.finish",
        phase = "encrypt",
        duration_ms = started.elapsed().as_millis() as u64,
        bytes = body.len(),
        "phase.finish"
    );
    if let Some(sink) = options.progress {
        sink.on_progress(TaskProgress::phase("encrypt"));
    }
    check_cancelled(options.cancel)?;

    let started = Instant::now();
    debug!(event = "phase.start", phase = "upload", "phase.start");
    let bytes_uploaded = body.len() as u64;
    let existing = remote.find().await?;
    let receipt = remote
        .upload(existing.as_ref(), body)
        .await
        .inspect_err(|e| {
            error!(
                event = "io.remote.upload_failed",
                provider,
                bytes = bytes_uploaded,
                error = %e,
                "io.remote.upload_failed"
            );
        })?;
    debug!(
        event = "phase.finish",
        phase = "upload",
        duration_ms = started.elapsed().as_millis() as u64,
        bytes_uploaded,
        overwrite = existing.is_some(),
        "phase.finish"
    );
    if let Some(sink) = options.progress {
        sink.on_progress(TaskProgress {
            bytes_uploaded: Some(bytes_uploaded),
            ..TaskProgress::phase("upload")
        });
    }

    info!(
        event = "backup.finish",
        provider,
        handle = %receipt.handle,
        records = counts.total(),
        bytes_uploaded,
        "backup.finish"
    );
    Ok(BackupResult {
        handle: receipt.handle,
        created_at: receipt.created_at,
        exported_at,
        counts,
        bytes_uploaded,
    })
}
