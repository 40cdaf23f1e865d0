//! Forward-only schema migrator.
//!
//! Schema version lives in `PRAGMA user_version`. Each [`Migration`] runs in a
//! single transaction: its `before` DDL, its optional record transform, its
//! `after` DDL and the version bump either all commit or none do.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, error, info};

use crate::{Error, Result};

pub mod transforms;

use transforms::{
    CutPricingV4, CutStepV1, CutWorkTypeV2, StudioV1, cut_pricing_v4_to_v5, cut_v1_to_v2,
    cut_work_type_v2_to_v3, studio_v1_to_v2,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Rewrites rows from the previous version's shape. Returns rows touched.
pub type UpgradeFn = for<'c> fn(&'c mut SqliteConnection, DateTime<Utc>) -> BoxFuture<'c, Result<u64>>;

#[derive(Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub before: &'static str,
    pub transform: Option<UpgradeFn>,
    pub after: &'static str,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

pub const CURRENT_VERSION: u32 = 5;

pub static MIGRATIONS: [Migration; CURRENT_VERSION as usize] = [
    Migration {
        version: 1,
        description: "initial studios, cuts, cut phases and settings",
        before: r#"
        CREATE TABLE studios (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            short_name TEXT,
            contact_info TEXT,
            notes TEXT
        );
        CREATE INDEX idx_studios_name ON studios(name);

        CREATE TABLE cuts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            studio_id INTEGER,
            project_name TEXT,
            episode_number INTEGER,
            cut_number TEXT,
            current_phase TEXT,
            current_status TEXT,
            difficulty TEXT,
            is_priority INTEGER,
            deadline TEXT,
            final_deadline TEXT,
            notes TEXT,
            updated_at TEXT,
            synced_at TEXT
        );
        CREATE INDEX idx_cuts_project ON cuts(project_name);
        CREATE INDEX idx_cuts_studio ON cuts(studio_id);

        CREATE TABLE cut_phases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cut_id INTEGER REFERENCES cuts(id) ON DELETE CASCADE,
            phase TEXT,
            status TEXT
        );

        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        transform: None,
        after: "",
    },
    Migration {
        version: 2,
        description: "cut steps, pricing and retake history",
        before: r#"
        DROP TABLE IF EXISTS cut_phases;
        ALTER TABLE studios ADD COLUMN default_price_per_cut INTEGER NOT NULL DEFAULT 0;

        CREATE TABLE cuts_v2 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            studio_id INTEGER,
            project_name TEXT NOT NULL,
            episode_number INTEGER NOT NULL,
            cut_number TEXT NOT NULL,
            step TEXT NOT NULL,
            price_per_cut INTEGER NOT NULL,
            deadline TEXT,
            retake_count INTEGER NOT NULL,
            notes TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        );
        "#,
        transform: Some(upgrade_v2),
        after: r#"
        DROP TABLE cuts;
        ALTER TABLE cuts_v2 RENAME TO cuts;
        CREATE INDEX idx_cuts_project ON cuts(project_name);
        CREATE INDEX idx_cuts_studio ON cuts(studio_id);
        CREATE INDEX idx_cuts_step ON cuts(step);

        CREATE TABLE retake_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cut_id INTEGER NOT NULL REFERENCES cuts(id) ON DELETE CASCADE,
            returned_at TEXT NOT NULL,
            reason TEXT,
            resolved_at TEXT
        );
        CREATE INDEX idx_retake_history_cut ON retake_history(cut_id, returned_at);
        "#,
    },
    Migration {
        version: 3,
        description: "cut work type",
        before: "ALTER TABLE cuts ADD COLUMN work_type TEXT;",
        transform: Some(upgrade_v3),
        after: "CREATE INDEX idx_cuts_work_type ON cuts(work_type);",
    },
    Migration {
        version: 4,
        description: "quick links",
        before: r#"
        CREATE TABLE quick_links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL,
            value TEXT NOT NULL,
            link_type TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        );
        CREATE INDEX idx_quick_links_order ON quick_links(sort_order);
        "#,
        transform: None,
        after: "",
    },
    Migration {
        version: 5,
        description: "scene number and per-sheet pricing",
        before: r#"
        ALTER TABLE cuts ADD COLUMN scene_number TEXT;
        ALTER TABLE cuts ADD COLUMN pricing_type TEXT;
        ALTER TABLE cuts ADD COLUMN sheet_count INTEGER;
        "#,
        transform: Some(upgrade_v5),
        after: "",
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<u32>,
    pub rows_transformed: u64,
}

/// Bring the database up to the last version in `migrations`.
///
/// `migrations` must be numbered 1, 2, 3, ... without gaps. A database whose
/// version is already beyond the list is refused; there is no downgrade.
pub async fn run_migrations(
    pool: &SqlitePool,
    migrations: &[Migration],
    now: DateTime<Utc>,
) -> Result<MigrationReport> {
    check_sequence(migrations)?;
    let target = migrations.last().map_or(0, |m| m.version);

    let mut conn = pool.acquire().await?;
    let current = schema_version(&mut conn).await?;
    if current > target {
        return Err(Error::Migration {
            from: current,
            to: target,
            message: "database was written by a newer schema; downgrade is not supported"
                .to_string(),
        });
    }

    let mut report = MigrationReport {
        from_version: current,
        to_version: current,
        ..MigrationReport::default()
    };
    if current == target {
        debug!(event = "migrate.noop", version = current, "migrate.noop");
        return Ok(report);
    }

    for migration in migrations.iter().filter(|m| m.version > current) {
        let from = migration.version - 1;
        let rows = apply(&mut conn, migration, now).await.map_err(|e| {
            error!(
                event = "migrate.failed",
                from,
                to = migration.version,
                error = %e,
                "migrate.failed"
            );
            Error::Migration {
                from,
                to: migration.version,
                message: e.to_string(),
            }
        })?;
        info!(
            event = "migrate.apply",
            from,
            to = migration.version,
            description = migration.description,
            rows,
            "migrate.apply"
        );
        report.applied.push(migration.version);
        report.rows_transformed += rows;
        report.to_version = migration.version;
    }
    Ok(report)
}

pub async fn schema_version(conn: &mut SqliteConnection) -> Result<u32> {
    let raw: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *conn)
        .await?;
    u32::try_from(raw).map_err(|_| Error::corrupt(format!("invalid user_version: {raw}")))
}

fn check_sequence(migrations: &[Migration]) -> Result<()> {
    for (idx, migration) in migrations.iter().enumerate() {
        let expected = idx as u32 + 1;
        if migration.version != expected {
            return Err(Error::Migration {
                from: expected.saturating_sub(1),
                to: expected,
                message: format!(
                    "migration list out of order: expected v{expected}, found v{}",
                    migration.version
                ),
            });
        }
    }
    Ok(())
}

async fn apply(
    conn: &mut SqliteConnection,
    migration: &Migration,
    now: DateTime<Utc>,
) -> Result<u64> {
    let mut tx = conn.begin().await?;
    if !migration.before.trim().is_empty() {
        sqlx::raw_sql(migration.before).execute(&mut *tx).await?;
    }
    let rows = match migration.transform {
        Some(upgrade) => upgrade(&mut *tx, now).await?,
        None => 0,
    };
    if !migration.after.trim().is_empty() {
        sqlx::raw_sql(migration.after).execute(&mut *tx).await?;
    }
    let bump = format!("PRAGMA user_version = {}", migration.version);
    sqlx::query(&bump).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(rows)
}

/// A row as stored by an older schema. Reading must never fail on malformed
/// values; those fall back to defaults in the transform.
pub(crate) trait LegacyRecord: Sized {
    const SELECT: &'static str;

    fn from_row(row: &SqliteRow) -> Self;
}

/// A transformed row, written back in the new schema's shape.
pub(crate) trait UpgradedRecord {
    fn write(&self) -> Query<'static, Sqlite, SqliteArguments<'static>>;
}

async fn upgrade_rows<O, N, F>(conn: &mut SqliteConnection, transform: F) -> Result<u64>
where
    O: LegacyRecord,
    N: UpgradedRecord,
    F: Fn(O) -> N,
{
    let rows = sqlx::query(O::SELECT).fetch_all(&mut *conn).await?;
    let mut written = 0u64;
    for row in &rows {
        let upgraded = transform(O::from_row(row));
        upgraded.write().execute(&mut *conn).await?;
        written += 1;
    }
    Ok(written)
}

fn upgrade_v2(conn: &mut SqliteConnection, now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
    Box::pin(async move {
        let cuts = upgrade_rows(conn, |old: CutStepV1| cut_v1_to_v2(old, now)).await?;
        let studios = upgrade_rows::<StudioV1, _, _>(conn, studio_v1_to_v2).await?;
        Ok(cuts + studios)
    })
}

fn upgrade_v3(conn: &mut SqliteConnection, _now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
    Box::pin(upgrade_rows::<CutWorkTypeV2, _, _>(conn, cut_work_type_v2_to_v3))
}

fn upgrade_v5(conn: &mut SqliteConnection, _now: DateTime<Utc>) -> BoxFuture<'_, Result<u64>> {
    Box::pin(upgrade_rows::<CutPricingV4, _, _>(conn, cut_pricing_v4_to_v5))
}
