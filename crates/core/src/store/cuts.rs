use tracing::{debug, info};

use super::{
    CUT_COLUMNS, RETAKE_COLUMNS, Store, Table, cut_from_row, date_to_text, now_utc,
    retake_from_row, ts_to_text,
};
use crate::model::{Cut, CutFilter, CutPatch, NewCut, RecordId, RetakeHistory, Step};
use crate::{Error, Result};

fn cut_not_found(id: RecordId) -> Error {
    Error::NotFound {
        entity: "cut",
        id: id.to_string(),
    }
}

impl Store {
    /// Insert a cut. Retake count starts at zero; `completed_at` is set only
    /// when the cut is created already done.
    pub async fn add_cut(&self, new: NewCut) -> Result<Cut> {
        let now = now_utc();
        let completed_at = (new.step == Step::Done).then_some(now);
        let res = sqlx::query(
            "INSERT INTO cuts (studio_id, project_name, episode_number, scene_number, cut_number, \
             step, work_type, pricing_type, price_per_cut, sheet_count, deadline, retake_count, \
             notes, created_at, updated_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
        )
        .bind(new.studio_id)
        .bind(&new.project_name)
        .bind(new.episode_number)
        .bind(&new.scene_number)
        .bind(&new.cut_number)
        .bind(new.step.as_str())
        .bind(new.work_type.as_str())
        .bind(new.pricing_type.as_str())
        .bind(new.price_per_cut)
        .bind(new.sheet_count)
        .bind(new.deadline.as_ref().map(date_to_text))
        .bind(&new.notes)
        .bind(ts_to_text(&now))
        .bind(ts_to_text(&now))
        .bind(completed_at.as_ref().map(ts_to_text))
        .execute(&self.pool)
        .await?;
        let id = res.last_insert_rowid();
        debug!(event = "store.cut_added", cut_id = id, "store.cut_added");
        self.notify(&[Table::Cuts]);

        Ok(Cut {
            id,
            studio_id: new.studio_id,
            project_name: new.project_name,
            episode_number: new.episode_number,
            scene_number: new.scene_number,
            cut_number: new.cut_number,
            step: new.step,
            work_type: new.work_type,
            pricing_type: new.pricing_type,
            price_per_cut: new.price_per_cut,
            sheet_count: new.sheet_count,
            deadline: new.deadline,
            retake_count: 0,
            notes: new.notes,
            created_at: now,
            updated_at: now,
            completed_at,
        })
    }

    pub async fn get_cut(&self, id: RecordId) -> Result<Option<Cut>> {
        let sql = format!("SELECT {CUT_COLUMNS} FROM cuts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(cut_from_row).transpose()
    }

    /// Cuts matching `filter`, what needs attention first: retake, working,
    /// received, submitted, done; then by cut number.
    pub async fn list_cuts(&self, filter: &CutFilter) -> Result<Vec<Cut>> {
        let sql = format!("SELECT {CUT_COLUMNS} FROM cuts ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut cuts = Vec::with_capacity(rows.len());
        for row in &rows {
            let cut = cut_from_row(row)?;
            if filter.matches(&cut) {
                cuts.push(cut);
            }
        }
        cuts.sort_by(|a, b| {
            a.step
                .list_priority()
                .cmp(&b.step.list_priority())
                .then_with(|| a.cut_number.cmp(&b.cut_number))
        });
        Ok(cuts)
    }

    /// Distinct project names, sorted.
    pub async fn list_projects(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT project_name FROM cuts ORDER BY project_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    /// Apply a patch and bump `updated_at`. Step, retake count and the
    /// creation/completion stamps are not reachable from here.
    pub async fn update_cut(&self, id: RecordId, patch: CutPatch) -> Result<Cut> {
        let mut cut = self.get_cut(id).await?.ok_or_else(|| cut_not_found(id))?;
        if let Some(studio_id) = patch.studio_id {
            cut.studio_id = studio_id;
        }
        if let Some(project_name) = patch.project_name {
            cut.project_name = project_name;
        }
        if let Some(episode_number) = patch.episode_number {
            cut.episode_number = episode_number;
        }
        if let Some(scene_number) = patch.scene_number {
            cut.scene_number = scene_number;
        }
        if let Some(cut_number) = patch.cut_number {
            cut.cut_number = cut_number;
        }
        if let Some(work_type) = patch.work_type {
            cut.work_type = work_type;
        }
        if let Some(pricing_type) = patch.pricing_type {
            cut.pricing_type = pricing_type;
        }
        if let Some(price) = patch.price_per_cut {
            cut.price_per_cut = price;
        }
        if let Some(sheet_count) = patch.sheet_count {
            cut.sheet_count = sheet_count;
        }
        if let Some(deadline) = patch.deadline {
            cut.deadline = deadline;
        }
        if let Some(notes) = patch.notes {
            cut.notes = notes;
        }
        cut.updated_at = now_utc();

        sqlx::query(
            "UPDATE cuts SET studio_id = ?, project_name = ?, episode_number = ?, \
             scene_number = ?, cut_number = ?, work_type = ?, pricing_type = ?, \
             price_per_cut = ?, sheet_count = ?, deadline = ?, notes = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(cut.studio_id)
        .bind(&cut.project_name)
        .bind(cut.episode_number)
        .bind(&cut.scene_number)
        .bind(&cut.cut_number)
        .bind(cut.work_type.as_str())
        .bind(cut.pricing_type.as_str())
        .bind(cut.price_per_cut)
        .bind(cut.sheet_count)
        .bind(cut.deadline.as_ref().map(date_to_text))
        .bind(&cut.notes)
        .bind(ts_to_text(&cut.updated_at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.notify(&[Table::Cuts]);
        Ok(cut)
    }

    /// Delete a cut together with its retake history.
    pub async fn delete_cut(&self, id: RecordId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM retake_history WHERE cut_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM cuts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let deleted = res.rows_affected() > 0;
        if deleted {
            self.notify(&[Table::Cuts, Table::RetakeHistory]);
        }
        Ok(deleted)
    }

    /// Move a cut through the production step machine.
    ///
    /// Entering `retake` bumps the retake count and opens a history entry
    /// carrying `reason`. Leaving `retake` for `working` resolves the most
    /// recent open entry. Entering `done` stamps `completed_at`. The cut row
    /// and its history change in one transaction.
    pub async fn advance_cut_step(
        &self,
        cut_id: RecordId,
        next: Step,
        reason: Option<&str>,
    ) -> Result<Cut> {
        let now = now_utc();
        let now_text = ts_to_text(&now);
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {CUT_COLUMNS} FROM cuts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(cut_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| cut_not_found(cut_id))?;
        let mut cut = cut_from_row(&row)?;
        let from = cut.step;
        if !from.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: from.to_string(),
                to: next.to_string(),
            });
        }

        let mut history_touched = false;
        if next == Step::Retake {
            cut.retake_count += 1;
            sqlx::query(
                "INSERT INTO retake_history (cut_id, returned_at, reason, resolved_at) \
                 VALUES (?, ?, ?, NULL)",
            )
            .bind(cut_id)
            .bind(&now_text)
            .bind(reason)
            .execute(&mut *tx)
            .await?;
            history_touched = true;
        }
        if from == Step::Retake && next == Step::Working {
            let res = sqlx::query(
                "UPDATE retake_history SET resolved_at = ? WHERE id = ( \
                 SELECT id FROM retake_history WHERE cut_id = ? AND resolved_at IS NULL \
                 ORDER BY returned_at DESC, id DESC LIMIT 1)",
            )
            .bind(&now_text)
            .bind(cut_id)
            .execute(&mut *tx)
            .await?;
            history_touched = res.rows_affected() > 0;
        }
        cut.completed_at = (next == Step::Done).then_some(now);
        cut.step = next;
        cut.updated_at = now;

        sqlx::query(
            "UPDATE cuts SET step = ?, retake_count = ?, updated_at = ?, completed_at = ? \
             WHERE id = ?",
        )
        .bind(cut.step.as_str())
        .bind(cut.retake_count)
        .bind(&now_text)
        .bind(cut.completed_at.as_ref().map(ts_to_text))
        .bind(cut_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(
            event = "store.cut_step",
            cut_id,
            from = %from,
            to = %next,
            retake_count = cut.retake_count,
            "store.cut_step"
        );
        if history_touched {
            self.notify(&[Table::Cuts, Table::RetakeHistory]);
        } else {
            self.notify(&[Table::Cuts]);
        }
        Ok(cut)
    }

    /// Retake history of one cut, newest first.
    pub async fn retake_history(&self, cut_id: RecordId) -> Result<Vec<RetakeHistory>> {
        let sql = format!(
            "SELECT {RETAKE_COLUMNS} FROM retake_history WHERE cut_id = ? \
             ORDER BY returned_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(cut_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(retake_from_row).collect()
    }

    pub async fn list_retake_history(&self) -> Result<Vec<RetakeHistory>> {
        let sql = format!("SELECT {RETAKE_COLUMNS} FROM retake_history ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(retake_from_row).collect()
    }
}
