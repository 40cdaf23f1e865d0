//! Whole-store snapshot document.
//!
//! `{version, exportedAt, tables: {studios, cuts, retakeHistory, quickLinks,
//! settings}}` with camelCase record fields. The document is validated in full
//! before any table is touched on import.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{Cut, QuickLink, RecordId, RetakeHistory, Setting, Step, Studio};
use crate::store::Store;
use crate::{Error, Result};

/// Compatibility tag written into every snapshot.
pub const SNAPSHOT_FORMAT_VERSION: &str = "0.3.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub tables: SnapshotTables,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTables {
    pub studios: Vec<Studio>,
    pub cuts: Vec<Cut>,
    pub retake_history: Vec<RetakeHistory>,
    pub quick_links: Vec<QuickLink>,
    pub settings: Vec<Setting>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCounts {
    pub studios: usize,
    pub cuts: usize,
    pub retake_history: usize,
    pub quick_links: usize,
    pub settings: usize,
}

impl TableCounts {
    pub fn total(&self) -> usize {
        self.studios + self.cuts + self.retake_history + self.quick_links + self.settings
    }
}

impl BackupSnapshot {
    pub fn counts(&self) -> TableCounts {
        TableCounts {
            studios: self.tables.studios.len(),
            cuts: self.tables.cuts.len(),
            retake_history: self.tables.retake_history.len(),
            quick_links: self.tables.quick_links.len(),
            settings: self.tables.settings.len(),
        }
    }
}

/// Read every table into a snapshot stamped `exported_at`.
pub async fn export_snapshot(store: &Store, exported_at: DateTime<Utc>) -> Result<BackupSnapshot> {
    let tables = store.read_all_tables().await?;
    let snapshot = BackupSnapshot {
        version: SNAPSHOT_FORMAT_VERSION.to_string(),
        exported_at,
        tables,
    };
    let counts = snapshot.counts();
    debug!(
        event = "snapshot.export",
        studios = counts.studios,
        cuts = counts.cuts,
        retake_history = counts.retake_history,
        quick_links = counts.quick_links,
        settings = counts.settings,
        "snapshot.export"
    );
    Ok(snapshot)
}

pub fn encode_snapshot(snapshot: &BackupSnapshot) -> Result<Vec<u8>> {
    serde_json::to_vec(snapshot).map_err(|e| Error::validation(format!("encode snapshot: {e}")))
}

/// Parse and validate a snapshot document.
pub fn decode_snapshot(bytes: &[u8]) -> Result<BackupSnapshot> {
    let snapshot: BackupSnapshot = serde_json::from_slice(bytes)
        .map_err(|e| Error::validation(format!("snapshot json: {e}")))?;
    validate_snapshot(&snapshot)?;
    Ok(snapshot)
}

/// Check a snapshot is something this build can load as-is.
pub fn validate_snapshot(snapshot: &BackupSnapshot) -> Result<()> {
    let version = parse_version(&snapshot.version).ok_or_else(|| {
        Error::validation(format!("unrecognized snapshot version {:?}", snapshot.version))
    })?;
    let supported = parse_version(SNAPSHOT_FORMAT_VERSION).unwrap_or_default();
    if version > supported {
        return Err(Error::validation(format!(
            "snapshot version {} is newer than supported {SNAPSHOT_FORMAT_VERSION}",
            snapshot.version
        )));
    }

    let tables = &snapshot.tables;
    unique_ids("studios", tables.studios.iter().map(|s| s.id))?;
    unique_ids("cuts", tables.cuts.iter().map(|c| c.id))?;
    unique_ids("retakeHistory", tables.retake_history.iter().map(|r| r.id))?;
    unique_ids("quickLinks", tables.quick_links.iter().map(|l| l.id))?;

    let mut keys = HashSet::new();
    for setting in &tables.settings {
        if !keys.insert(setting.key.as_str()) {
            return Err(Error::validation(format!(
                "settings: duplicate key {:?}",
                setting.key
            )));
        }
    }

    for cut in &tables.cuts {
        if (cut.step == Step::Done) != cut.completed_at.is_some() {
            return Err(Error::validation(format!(
                "cuts: id {} has step {} but completedAt {}",
                cut.id,
                cut.step,
                if cut.completed_at.is_some() { "set" } else { "unset" }
            )));
        }
    }

    let cut_ids: HashSet<RecordId> = tables.cuts.iter().map(|c| c.id).collect();
    let mut open_retakes = HashSet::new();
    for entry in &tables.retake_history {
        if !cut_ids.contains(&entry.cut_id) {
            return Err(Error::validation(format!(
                "retakeHistory: id {} references missing cut {}",
                entry.id, entry.cut_id
            )));
        }
        if entry.is_open() && !open_retakes.insert(entry.cut_id) {
            return Err(Error::validation(format!(
                "retakeHistory: cut {} has more than one open retake",
                entry.cut_id
            )));
        }
    }
    Ok(())
}

fn unique_ids(table: &str, ids: impl Iterator<Item = RecordId>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::validation(format!("{table}: duplicate id {id}")));
        }
    }
    Ok(())
}

// "major.minor.patch", missing trailing parts read as zero.
fn parse_version(raw: &str) -> Option<(u32, u32, u32)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
