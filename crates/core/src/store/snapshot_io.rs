use tracing::info;

use super::{
    CUT_COLUMNS, QUICK_LINK_COLUMNS, RETAKE_COLUMNS, STUDIO_COLUMNS, Store, Table, cut_from_row,
    date_to_text, quick_link_from_row, retake_from_row, setting_from_row, studio_from_row,
    ts_to_text,
};
use crate::Result;
use crate::snapshot::SnapshotTables;

impl Store {
    /// Read all five tables. Each is its own query; no cross-table lock.
    pub async fn read_all_tables(&self) -> Result<SnapshotTables> {
        let studios = sqlx::query(&format!("SELECT {STUDIO_COLUMNS} FROM studios ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(studio_from_row)
            .collect::<Result<Vec<_>>>()?;
        let cuts = sqlx::query(&format!("SELECT {CUT_COLUMNS} FROM cuts ORDER BY id"))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(cut_from_row)
            .collect::<Result<Vec<_>>>()?;
        let retake_history =
            sqlx::query(&format!("SELECT {RETAKE_COLUMNS} FROM retake_history ORDER BY id"))
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(retake_from_row)
                .collect::<Result<Vec<_>>>()?;
        let quick_links =
            sqlx::query(&format!("SELECT {QUICK_LINK_COLUMNS} FROM quick_links ORDER BY id"))
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(quick_link_from_row)
                .collect::<Result<Vec<_>>>()?;
        let settings = sqlx::query("SELECT key, value FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(setting_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(SnapshotTables {
            studios,
            cuts,
            retake_history,
            quick_links,
            settings,
        })
    }

    /// Replace the whole store with `tables`, keeping record ids.
    ///
    /// Clears and refills all five tables in one transaction, inserting in
    /// dependency order. Any failure leaves the previous contents in place.
    pub async fn replace_all(&self, tables: &SnapshotTables) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in Table::ALL.iter().rev() {
            let sql = format!("DELETE FROM {}", table.as_str());
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        for s in &tables.studios {
            sqlx::query(
                "INSERT INTO studios (id, name, short_name, default_price_per_cut, contact_info, \
                 notes) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(s.id)
            .bind(&s.name)
            .bind(&s.short_name)
            .bind(s.default_price_per_cut)
            .bind(&s.contact_info)
            .bind(&s.notes)
            .execute(&mut *tx)
            .await?;
        }
        for c in &tables.cuts {
            sqlx::query(
                "INSERT INTO cuts (id, studio_id, project_name, episode_number, scene_number, \
                 cut_number, step, work_type, pricing_type, price_per_cut, sheet_count, deadline, \
                 retake_count, notes, created_at, updated_at, completed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(c.id)
            .bind(c.studio_id)
            .bind(&c.project_name)
            .bind(c.episode_number)
            .bind(&c.scene_number)
            .bind(&c.cut_number)
            .bind(c.step.as_str())
            .bind(c.work_type.as_str())
            .bind(c.pricing_type.as_str())
            .bind(c.price_per_cut)
            .bind(c.sheet_count)
            .bind(c.deadline.as_ref().map(date_to_text))
            .bind(c.retake_count)
            .bind(&c.notes)
            .bind(ts_to_text(&c.created_at))
            .bind(ts_to_text(&c.updated_at))
            .bind(c.completed_at.as_ref().map(ts_to_text))
            .execute(&mut *tx)
            .await?;
        }
        for r in &tables.retake_history {
            sqlx::query(
                "INSERT INTO retake_history (id, cut_id, returned_at, reason, resolved_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(r.id)
            .bind(r.cut_id)
            .bind(ts_to_text(&r.returned_at))
            .bind(&r.reason)
            .bind(r.resolved_at.as_ref().map(ts_to_text))
            .execute(&mut *tx)
            .await?;
        }
        for l in &tables.quick_links {
            sqlx::query(
                "INSERT INTO quick_links (id, label, value, link_type, sort_order) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(l.id)
            .bind(&l.label)
            .bind(&l.value)
            .bind(l.link_type.as_str())
            .bind(l.order)
            .execute(&mut *tx)
            .await?;
        }
        for s in &tables.settings {
            sqlx::query("INSERT INTO settings (key, value) VALUES (?, ?)")
                .bind(&s.key)
                .bind(&s.value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(
            event = "store.replace_all",
            studios = tables.studios.len(),
            cuts = tables.cuts.len(),
            retake_history = tables.retake_history.len(),
            quick_links = tables.quick_links.len(),
            settings = tables.settings.len(),
            "store.replace_all"
        );
        self.notify(&Table::ALL);
        Ok(())
    }
}
