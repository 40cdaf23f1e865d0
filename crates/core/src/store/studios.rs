use sqlx::Row;
use tracing::debug;

use super::{STUDIO_COLUMNS, Store, Table, studio_from_row};
use crate::model::{NewStudio, RecordId, Studio, StudioPatch, StudioStats};
use crate::{Error, Result};

impl Store {
    pub async fn add_studio(&self, new: NewStudio) -> Result<Studio> {
        let res = sqlx::query(
            "INSERT INTO studios (name, short_name, default_price_per_cut, contact_info, notes) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(&new.short_name)
        .bind(new.default_price_per_cut)
        .bind(&new.contact_info)
        .bind(&new.notes)
        .execute(&self.pool)
        .await?;
        let id = res.last_insert_rowid();
        debug!(event = "store.studio_added", studio_id = id, "store.studio_added");
        self.notify(&[Table::Studios]);

        Ok(Studio {
            id,
            name: new.name,
            short_name: new.short_name,
            default_price_per_cut: new.default_price_per_cut,
            contact_info: new.contact_info,
            notes: new.notes,
        })
    }

    pub async fn get_studio(&self, id: RecordId) -> Result<Option<Studio>> {
        let sql = format!("SELECT {STUDIO_COLUMNS} FROM studios WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(studio_from_row).transpose()
    }

    /// All studios, by name.
    pub async fn list_studios(&self) -> Result<Vec<Studio>> {
        let sql = format!("SELECT {STUDIO_COLUMNS} FROM studios ORDER BY name, id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(studio_from_row).collect()
    }

    pub async fn update_studio(&self, id: RecordId, patch: StudioPatch) -> Result<Studio> {
        let mut studio = self.get_studio(id).await?.ok_or_else(|| Error::NotFound {
            entity: "studio",
            id: id.to_string(),
        })?;
        if let Some(name) = patch.name {
            studio.name = name;
        }
        if let Some(short_name) = patch.short_name {
            studio.short_name = short_name;
        }
        if let Some(price) = patch.default_price_per_cut {
            studio.default_price_per_cut = price;
        }
        if let Some(contact_info) = patch.contact_info {
            studio.contact_info = contact_info;
        }
        if let Some(notes) = patch.notes {
            studio.notes = notes;
        }

        sqlx::query(
            "UPDATE studios SET name = ?, short_name = ?, default_price_per_cut = ?, \
             contact_info = ?, notes = ? WHERE id = ?",
        )
        .bind(&studio.name)
        .bind(&studio.short_name)
        .bind(studio.default_price_per_cut)
        .bind(&studio.contact_info)
        .bind(&studio.notes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.notify(&[Table::Studios]);
        Ok(studio)
    }

    /// Cuts referencing the studio keep their (now dangling) `studio_id`.
    pub async fn delete_studio(&self, id: RecordId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM studios WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = res.rows_affected() > 0;
        if deleted {
            self.notify(&[Table::Studios]);
        }
        Ok(deleted)
    }

    /// Studios with cut and retake totals. The retake rate is retakes per cut.
    pub async fn studios_with_stats(&self) -> Result<Vec<StudioStats>> {
        let studios = self.list_studios().await?;
        let totals = sqlx::query(
            "SELECT studio_id, COUNT(*) AS total_cuts, COALESCE(SUM(retake_count), 0) AS total_retakes \
             FROM cuts WHERE studio_id IS NOT NULL GROUP BY studio_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = Vec::with_capacity(studios.len());
        for studio in studios {
            let mut total_cuts = 0u64;
            let mut total_retakes = 0u64;
            for row in &totals {
                let studio_id: RecordId = row.try_get("studio_id")?;
                if studio_id == studio.id {
                    total_cuts = u64::try_from(row.try_get::<i64, _>("total_cuts")?).unwrap_or(0);
                    total_retakes =
                        u64::try_from(row.try_get::<i64, _>("total_retakes")?).unwrap_or(0);
                }
            }
            let retake_rate = if total_cuts == 0 {
                0.0
            } else {
                total_retakes as f64 / total_cuts as f64
            };
            stats.push(StudioStats {
                studio,
                total_cuts,
                total_retakes,
                retake_rate,
            });
        }
        Ok(stats)
    }
}
