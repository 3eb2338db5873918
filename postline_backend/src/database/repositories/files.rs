use crate::database::models::FileInfoRecord;
use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

const FILE_COLUMNS: &str = "id, creator_id, post_id, name, size_bytes, delete_at";

pub(super) struct SqliteFileRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileInfoRecord> {
    Ok(FileInfoRecord {
        id: row.get(0)?,
        creator_id: row.get(1)?,
        post_id: row.get(2)?,
        name: row.get(3)?,
        size_bytes: row.get(4)?,
        delete_at: row.get(5)?,
    })
}

impl<'conn> super::FileRepository for SqliteFileRepository<'conn> {
    fn save(&self, record: &FileInfoRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO file_infos (id, creator_id, post_id, name, size_bytes, delete_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                post_id = excluded.post_id,
                name = excluded.name,
                size_bytes = excluded.size_bytes,
                delete_at = excluded.delete_at
            "#,
            params![
                record.id,
                record.creator_id,
                record.post_id,
                record.name,
                record.size_bytes,
                record.delete_at
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<FileInfoRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM file_infos WHERE id = ?1"),
                params![id],
                file_from_row,
            )
            .optional()?)
    }

    fn attach_to_post(&self, file_id: &str, post_id: &str, creator_id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE file_infos SET post_id = ?2 \
             WHERE id = ?1 AND creator_id = ?3 AND post_id IS NULL AND delete_at = 0",
            params![file_id, post_id, creator_id],
        )?;
        if changed == 0 {
            bail!("file {file_id} cannot be attached to post {post_id}");
        }
        Ok(())
    }

    fn list_for_post(&self, post_id: &str) -> Result<Vec<FileInfoRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM file_infos WHERE post_id = ?1 AND delete_at = 0 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![post_id], file_from_row)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    fn delete_for_post(&self, post_id: &str, delete_at: i64) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE file_infos SET delete_at = ?2 WHERE post_id = ?1 AND delete_at = 0",
            params![post_id, delete_at],
        )?)
    }
}
