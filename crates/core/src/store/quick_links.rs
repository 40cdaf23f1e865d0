use super::{QUICK_LINK_COLUMNS, Store, Table, quick_link_from_row};
use crate::model::{NewQuickLink, QuickLink, QuickLinkPatch, RecordId};
use crate::{Error, Result};

fn link_not_found(id: RecordId) -> Error {
    Error::NotFound {
        entity: "quick link",
        id: id.to_string(),
    }
}

impl Store {
    /// Append a link; its order is the number of links already present.
    pub async fn add_quick_link(&self, new: NewQuickLink) -> Result<QuickLink> {
        let mut tx = self.pool.begin().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quick_links")
            .fetch_one(&mut *tx)
            .await?;
        let res = sqlx::query(
            "INSERT INTO quick_links (label, value, link_type, sort_order) VALUES (?, ?, ?, ?)",
        )
        .bind(&new.label)
        .bind(&new.value)
        .bind(new.link_type.as_str())
        .bind(count)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        self.notify(&[Table::QuickLinks]);

        Ok(QuickLink {
            id: res.last_insert_rowid(),
            label: new.label,
            value: new.value,
            link_type: new.link_type,
            order: count,
        })
    }

    pub async fn get_quick_link(&self, id: RecordId) -> Result<Option<QuickLink>> {
        let sql = format!("SELECT {QUICK_LINK_COLUMNS} FROM quick_links WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(quick_link_from_row).transpose()
    }

    pub async fn list_quick_links(&self) -> Result<Vec<QuickLink>> {
        let sql = format!("SELECT {QUICK_LINK_COLUMNS} FROM quick_links ORDER BY sort_order, id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(quick_link_from_row).collect()
    }

    pub async fn update_quick_link(&self, id: RecordId, patch: QuickLinkPatch) -> Result<QuickLink> {
        let mut link = self
            .get_quick_link(id)
            .await?
            .ok_or_else(|| link_not_found(id))?;
        if let Some(label) = patch.label {
            link.label = label;
        }
        if let Some(value) = patch.value {
            link.value = value;
        }
        if let Some(link_type) = patch.link_type {
            link.link_type = link_type;
        }

        sqlx::query("UPDATE quick_links SET label = ?, value = ?, link_type = ? WHERE id = ?")
            .bind(&link.label)
            .bind(&link.value)
            .bind(link.link_type.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.notify(&[Table::QuickLinks]);
        Ok(link)
    }

    /// Remaining links keep their order values; gaps are not compacted.
    pub async fn delete_quick_link(&self, id: RecordId) -> Result<bool> {
        let res = sqlx::query("DELETE FROM quick_links WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = res.rows_affected() > 0;
        if deleted {
            self.notify(&[Table::QuickLinks]);
        }
        Ok(deleted)
    }

    /// Exchange the order values of two links.
    pub async fn swap_quick_links(&self, a: RecordId, b: RecordId) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let order_a: Option<i64> =
            sqlx::query_scalar("SELECT sort_order FROM quick_links WHERE id = ?")
                .bind(a)
                .fetch_optional(&mut *tx)
                .await?;
        let order_a = order_a.ok_or_else(|| link_not_found(a))?;
        let order_b: Option<i64> =
            sqlx::query_scalar("SELECT sort_order FROM quick_links WHERE id = ?")
                .bind(b)
                .fetch_optional(&mut *tx)
                .await?;
        let order_b = order_b.ok_or_else(|| link_not_found(b))?;

        sqlx::query("UPDATE quick_links SET sort_order = ? WHERE id = ?")
            .bind(order_b)
            .bind(a)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE quick_links SET sort_order = ? WHERE id = ?")
            .bind(order_a)
            .bind(b)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.notify(&[Table::QuickLinks]);
        Ok(())
    }
}
