use crate::database::models::TeamRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub(super) struct SqliteTeamRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

impl<'conn> super::TeamRepository for SqliteTeamRepository<'conn> {
    fn save(&self, record: &TeamRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO teams (id, name, display_name) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                display_name = excluded.display_name
            "#,
            params![record.id, record.name, record.display_name],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<TeamRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, display_name FROM teams WHERE id = ?1",
                params![id],
                |row| {
                    Ok(TeamRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        display_name: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }
}
