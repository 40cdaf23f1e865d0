//! Per-version record transforms.
//!
//! Each legacy shape is read leniently (a value of the wrong type reads as
//! absent) and mapped by a pure function, so every transform is total and can
//! be tested without a database.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use super::{LegacyRecord, UpgradedRecord};
use crate::model::{PricingType, RecordId, Step, WorkType};
use crate::store::{date_to_text, ts_from_text, ts_to_text};

fn lenient<'r, T>(row: &'r SqliteRow, column: &str) -> Option<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get::<Option<T>, _>(column).ok().flatten()
}

/// Cut row as stored by schema v1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CutStepV1 {
    pub id: RecordId,
    pub studio_id: Option<RecordId>,
    pub project_name: Option<String>,
    pub episode_number: Option<i64>,
    pub cut_number: Option<String>,
    pub current_status: Option<String>,
    pub deadline: Option<String>,
    pub notes: Option<String>,
    pub updated_at: Option<String>,
}

impl LegacyRecord for CutStepV1 {
    const SELECT: &'static str = "SELECT id, studio_id, project_name, episode_number, \
        cut_number, current_status, deadline, notes, updated_at FROM cuts ORDER BY id";

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: lenient(row, "id").unwrap_or_default(),
            studio_id: lenient(row, "studio_id"),
            project_name: lenient(row, "project_name"),
            episode_number: lenient(row, "episode_number"),
            cut_number: lenient(row, "cut_number"),
            current_status: lenient(row, "current_status"),
            deadline: lenient(row, "deadline"),
            notes: lenient(row, "notes"),
            updated_at: lenient(row, "updated_at"),
        }
    }
}

/// Cut row in the v2 layout, written into the replacement table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutStepV2 {
    pub id: RecordId,
    pub studio_id: Option<RecordId>,
    pub project_name: String,
    pub episode_number: i64,
    pub cut_number: String,
    pub step: Step,
    pub price_per_cut: i64,
    pub deadline: Option<NaiveDate>,
    pub retake_count: u32,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpgradedRecord for CutStepV2 {
    fn write(&self) -> Query<'static, Sqlite, SqliteArguments<'static>> {
        sqlx::query(
            "INSERT INTO cuts_v2 (id, studio_id, project_name, episode_number, cut_number, step, \
             price_per_cut, deadline, retake_count, notes, created_at, updated_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(self.id)
        .bind(self.studio_id)
        .bind(self.project_name.clone())
        .bind(self.episode_number)
        .bind(self.cut_number.clone())
        .bind(self.step.as_str())
        .bind(self.price_per_cut)
        .bind(self.deadline.as_ref().map(date_to_text))
        .bind(self.retake_count)
        .bind(self.notes.clone())
        .bind(ts_to_text(&self.created_at))
        .bind(ts_to_text(&self.updated_at))
        .bind(self.completed_at.as_ref().map(ts_to_text))
    }
}

/// Legacy five-valued status to production step.
pub fn step_from_legacy_status(status: Option<&str>) -> Step {
    match status.filter(|s| !s.is_empty()).unwrap_or("pending") {
        "completed" => Step::Done,
        "in_progress" | "delayed" => Step::Working,
        "pending" => Step::Received,
        "retake" => Step::Retake,
        _ => Step::Received,
    }
}

pub fn cut_v1_to_v2(old: CutStepV1, now: DateTime<Utc>) -> CutStepV2 {
    let updated_at = old
        .updated_at
        .as_deref()
        .and_then(|s| ts_from_text("updated_at", s).ok());
    let step = step_from_legacy_status(old.current_status.as_deref());
    let stamp = updated_at.unwrap_or(now);

    CutStepV2 {
        id: old.id,
        studio_id: old.studio_id,
        project_name: old.project_name.unwrap_or_default(),
        episode_number: old.episode_number.unwrap_or_default(),
        cut_number: old.cut_number.unwrap_or_default(),
        step,
        price_per_cut: 0,
        deadline: old.deadline.as_deref().and_then(legacy_date),
        retake_count: 0,
        notes: old.notes.unwrap_or_default(),
        created_at: stamp,
        updated_at: stamp,
        completed_at: (step == Step::Done).then_some(stamp),
    }
}

// Legacy deadlines were full ISO timestamps or bare dates; keep the date part.
fn legacy_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudioV1 {
    pub id: RecordId,
    pub short_name: Option<String>,
}

impl LegacyRecord for StudioV1 {
    const SELECT: &'static str = "SELECT id, short_name FROM studios ORDER BY id";

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: lenient(row, "id").unwrap_or_default(),
            short_name: lenient(row, "short_name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioV2 {
    pub id: RecordId,
    pub short_name: String,
    pub default_price_per_cut: i64,
}

impl UpgradedRecord for StudioV2 {
    fn write(&self) -> Query<'static, Sqlite, SqliteArguments<'static>> {
        sqlx::query("UPDATE studios SET short_name = ?, default_price_per_cut = ? WHERE id = ?")
            .bind(self.short_name.clone())
            .bind(self.default_price_per_cut)
            .bind(self.id)
    }
}

pub fn studio_v1_to_v2(old: StudioV1) -> StudioV2 {
    StudioV2 {
        id: old.id,
        short_name: old.short_name.unwrap_or_default(),
        default_price_per_cut: 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CutWorkTypeV2 {
    pub id: RecordId,
    pub work_type: Option<String>,
}

impl LegacyRecord for CutWorkTypeV2 {
    const SELECT: &'static str = "SELECT id, work_type FROM cuts ORDER BY id";

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: lenient(row, "id").unwrap_or_default(),
            work_type: lenient(row, "work_type"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutWorkTypeV3 {
    pub id: RecordId,
    pub work_type: WorkType,
}

impl UpgradedRecord for CutWorkTypeV3 {
    fn write(&self) -> Query<'static, Sqlite, SqliteArguments<'static>> {
        sqlx::query("UPDATE cuts SET work_type = ? WHERE id = ?")
            .bind(self.work_type.as_str())
            .bind(self.id)
    }
}

pub fn cut_work_type_v2_to_v3(old: CutWorkTypeV2) -> CutWorkTypeV3 {
    CutWorkTypeV3 {
        id: old.id,
        work_type: old
            .work_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CutPricingV4 {
    pub id: RecordId,
    pub pricing_type: Option<String>,
    pub sheet_count: Option<i64>,
}

impl LegacyRecord for CutPricingV4 {
    const SELECT: &'static str = "SELECT id, pricing_type, sheet_count FROM cuts ORDER BY id";

    fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: lenient(row, "id").unwrap_or_default(),
            pricing_type: lenient(row, "pricing_type"),
            sheet_count: lenient(row, "sheet_count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutPricingV5 {
    pub id: RecordId,
    pub pricing_type: PricingType,
    pub sheet_count: u32,
}

impl UpgradedRecord for CutPricingV5 {
    fn write(&self) -> Query<'static, Sqlite, SqliteArguments<'static>> {
        sqlx::query("UPDATE cuts SET pricing_type = ?, sheet_count = ? WHERE id = ?")
            .bind(self.pricing_type.as_str())
            .bind(self.sheet_count)
            .bind(self.id)
    }
}

pub fn cut_pricing_v4_to_v5(old: CutPricingV4) -> CutPricingV5 {
    CutPricingV5 {
        id: old.id,
        pricing_type: old
            .pricing_type
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
        sheet_count: old
            .sheet_count
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0),
    }
}
