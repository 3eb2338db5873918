use crate::database::models::PreferenceRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub(super) struct SqlitePreferenceRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::PreferenceRepository for SqlitePreferenceRepository<'conn> {
    fn save(&self, record: &PreferenceRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO preferences (user_id, category, name, value) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, category, name) DO UPDATE SET value = excluded.value
            "#,
            params![record.user_id, record.category, record.name, record.value],
        )?;
        Ok(())
    }

    fn get(&self, user_id: &str, category: &str, name: &str) -> Result<Option<PreferenceRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT user_id, category, name, value FROM preferences \
                 WHERE user_id = ?1 AND category = ?2 AND name = ?3",
                params![user_id, category, name],
                |row| {
                    Ok(PreferenceRecord {
                        user_id: row.get(0)?,
                        category: row.get(1)?,
                        name: row.get(2)?,
                        value: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn list_category(&self, user_id: &str, category: &str) -> Result<Vec<PreferenceRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, category, name, value FROM preferences \
             WHERE user_id = ?1 AND category = ?2 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![user_id, category], |row| {
            Ok(PreferenceRecord {
                user_id: row.get(0)?,
                category: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        let mut prefs = Vec::new();
        for row in rows {
            prefs.push(row?);
        }
        Ok(prefs)
    }

    fn delete_category_and_name(&self, category: &str, name: &str) -> Result<usize> {
        Ok(self.conn.execute(
            "DELETE FROM preferences WHERE category = ?1 AND name = ?2",
            params![category, name],
        )?)
    }
}
