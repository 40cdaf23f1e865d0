//! Local record store: five typed tables in one SQLite file.

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::migrate::{self, MIGRATIONS, MigrationReport};
use crate::model::{Cut, QuickLink, RetakeHistory, Setting, Studio};
use crate::{Error, Result};

mod cuts;
mod quick_links;
mod settings;
mod snapshot_io;
mod studios;

pub use settings::{MONTHLY_TARGET_KEY, PASSPHRASE_KEY};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Studios,
    Cuts,
    RetakeHistory,
    QuickLinks,
    Settings,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Studios,
        Table::Cuts,
        Table::RetakeHistory,
        Table::QuickLinks,
        Table::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Studios => "studios",
            Table::Cuts => "cuts",
            Table::RetakeHistory => "retake_history",
            Table::QuickLinks => "quick_links",
            Table::Settings => "settings",
        }
    }
}

/// Published after a mutation touching `table` has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub table: Table,
}

/// Handle to an open store. Construct with [`Store::open`] and pass by
/// reference; there is no process-wide instance.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    changes: broadcast::Sender<StoreChange>,
    migration: MigrationReport,
}

impl Store {
    /// Open (creating if missing) the store at `path` and bring its schema to
    /// the current version. A failed upgrade aborts the open.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = connect(path, true).await?;
        let migration = migrate::run_migrations(&pool, &MIGRATIONS, now_utc())
            .await
            .inspect_err(|e| {
                error!(
                    event = "store.migrate_failed",
                    db_path = %path.display(),
                    error = %e,
                    "store.migrate_failed"
                );
            })?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            pool,
            changes,
            migration,
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Outcome of the schema upgrade performed while opening.
    pub fn migration(&self) -> &MigrationReport {
        &self.migration
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, tables: &[Table]) {
        for table in tables {
            // No subscribers is fine.
            let _ = self.changes.send(StoreChange { table: *table });
        }
    }
}

/// Open a connection pool without touching the schema.
pub async fn connect(path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
    debug!(
        event = "sqlite.open",
        db_path = %path.display(),
        create_if_missing,
        "sqlite.open"
    );
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create_if_missing)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    // A single connection is the single writer; every transaction below is
    // serialized through it.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| {
            error!(
                event = "io.sqlite.connect_failed",
                db_path = %path.display(),
                error = %e,
                "io.sqlite.connect_failed"
            );
            e
        })?;
    Ok(pool)
}

/// Current time at the precision stored on disk.
pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn ts_to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn ts_from_text(column: &str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::corrupt(format!("{column}: invalid timestamp {s:?}: {e}")))
}

fn opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| ts_from_text(column, &s)).transpose()
}

fn req_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    ts_from_text(column, &raw)
}

fn parse_enum<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = crate::model::UnknownVariant>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| Error::corrupt(format!("{column}: {e}")))
}

pub(crate) fn date_to_text(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn opt_date(row: &SqliteRow, column: &str) -> Result<Option<NaiveDate>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .map_err(|e| Error::corrupt(format!("{column}: invalid date {s:?}: {e}")))
    })
    .transpose()
}

pub(crate) const STUDIO_COLUMNS: &str =
    "id, name, short_name, default_price_per_cut, contact_info, notes";

pub(crate) const CUT_COLUMNS: &str = "id, studio_id, project_name, episode_number, scene_number, \
     cut_number, step, work_type, pricing_type, price_per_cut, sheet_count, deadline, \
     retake_count, notes, created_at, updated_at, completed_at";

pub(crate) const RETAKE_COLUMNS: &str = "id, cut_id, returned_at, reason, resolved_at";

pub(crate) const QUICK_LINK_COLUMNS: &str = "id, label, value, link_type, sort_order";

pub(crate) fn studio_from_row(row: &SqliteRow) -> Result<Studio> {
    Ok(Studio {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        short_name: row.try_get("short_name")?,
        default_price_per_cut: row.try_get("default_price_per_cut")?,
        contact_info: row.try_get("contact_info")?,
        notes: row.try_get("notes")?,
    })
}

pub(crate) fn cut_from_row(row: &SqliteRow) -> Result<Cut> {
    Ok(Cut {
        id: row.try_get("id")?,
        studio_id: row.try_get("studio_id")?,
        project_name: row.try_get("project_name")?,
        episode_number: row.try_get("episode_number")?,
        scene_number: row.try_get("scene_number")?,
        cut_number: row.try_get("cut_number")?,
        step: parse_enum(row, "step")?,
        work_type: parse_enum(row, "work_type")?,
        pricing_type: parse_enum(row, "pricing_type")?,
        price_per_cut: row.try_get("price_per_cut")?,
        sheet_count: row.try_get("sheet_count")?,
        deadline: opt_date(row, "deadline")?,
        retake_count: row.try_get("retake_count")?,
        notes: row.try_get("notes")?,
        created_at: req_ts(row, "created_at")?,
        updated_at: req_ts(row, "updated_at")?,
        completed_at: opt_ts(row, "completed_at")?,
    })
}

pub(crate) fn retake_from_row(row: &SqliteRow) -> Result<RetakeHistory> {
    Ok(RetakeHistory {
        id: row.try_get("id")?,
        cut_id: row.try_get("cut_id")?,
        returned_at: req_ts(row, "returned_at")?,
        reason: row.try_get("reason")?,
        resolved_at: opt_ts(row, "resolved_at")?,
    })
}

pub(crate) fn quick_link_from_row(row: &SqliteRow) -> Result<QuickLink> {
    Ok(QuickLink {
        id: row.try_get("id")?,
        label: row.try_get("label")?,
        value: row.try_get("value")?,
        link_type: parse_enum(row, "link_type")?,
        order: row.try_get("sort_order")?,
    })
}

pub(crate) fn setting_from_row(row: &SqliteRow) -> Result<Setting> {
    Ok(Setting {
        key: row.try_get("key")?,
        value: row.try_get("value")?,
    })
}
