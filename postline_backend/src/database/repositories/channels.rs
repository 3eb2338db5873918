use crate::database::models::{ChannelMemberRecord, ChannelRecord, ChannelType};
use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const CHANNEL_COLUMNS: &str = "id, team_id, name, display_name, channel_type, create_at, delete_at";

pub(super) struct SqliteChannelRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRecord> {
    let code: String = row.get("channel_type")?;
    Ok(ChannelRecord {
        id: row.get("id")?,
        team_id: row.get("team_id")?,
        name: row.get("name")?,
        display_name: row.get("display_name")?,
        channel_type: ChannelType::from_code(&code),
        create_at: row.get("create_at")?,
        delete_at: row.get("delete_at")?,
    })
}

impl<'conn> SqliteChannelRepository<'conn> {
    fn collect(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<ChannelRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, channel_from_row)?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }
}

impl<'conn> super::ChannelRepository for SqliteChannelRepository<'conn> {
    fn save(&self, record: &ChannelRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO channels (id, team_id, name, display_name, channel_type, create_at, delete_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                display_name = excluded.display_name,
                channel_type = excluded.channel_type,
                delete_at = excluded.delete_at
            "#,
            params![
                record.id,
                record.team_id,
                record.name,
                record.display_name,
                record.channel_type.as_code(),
                record.create_at,
                record.delete_at
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ChannelRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                params![id],
                channel_from_row,
            )
            .optional()?)
    }

    fn get_by_name(&self, team_id: &str, name: &str, include_deleted: bool) -> Result<Option<ChannelRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels \
                     WHERE (team_id = ?1 OR team_id = '') AND name = ?2 AND (?3 OR delete_at = 0) \
                     ORDER BY team_id DESC LIMIT 1"
                ),
                params![team_id, name, include_deleted],
                channel_from_row,
            )
            .optional()?)
    }

    fn get_by_names(&self, team_id: &str, names: &[String]) -> Result<Vec<ChannelRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels \
             WHERE team_id = ? AND delete_at = 0 AND name IN ({placeholders})"
        );
        let values = std::iter::once(team_id.to_string()).chain(names.iter().cloned());
        self.collect(&sql, params_from_iter(values))
    }

    fn list_for_user(&self, team_id: &str, user_id: &str, include_deleted: bool) -> Result<Vec<ChannelRecord>> {
        self.collect(
            r#"
            SELECT c.id, c.team_id, c.name, c.display_name, c.channel_type, c.create_at, c.delete_at
            FROM channels c
            JOIN channel_members m ON m.channel_id = c.id
            WHERE m.user_id = ?2
              AND (c.team_id = ?1 OR c.team_id = '')
              AND (?3 OR c.delete_at = 0)
            ORDER BY c.name
            "#,
            params![team_id, user_id, include_deleted],
        )
    }

    fn save_member(&self, record: &ChannelMemberRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO channel_members (channel_id, user_id, last_viewed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(channel_id, user_id) DO UPDATE SET last_viewed_at = excluded.last_viewed_at
            "#,
            params![record.channel_id, record.user_id, record.last_viewed_at],
        )?;
        Ok(())
    }

    fn get_member(&self, channel_id: &str, user_id: &str) -> Result<Option<ChannelMemberRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT channel_id, user_id, last_viewed_at FROM channel_members \
                 WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id, user_id],
                |row| {
                    Ok(ChannelMemberRecord {
                        channel_id: row.get(0)?,
                        user_id: row.get(1)?,
                        last_viewed_at: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn member_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM channel_members WHERE channel_id = ?1 ORDER BY user_id")?;
        let rows = stmt.query_map(params![channel_id], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn mark_viewed(&self, channel_ids: &[String], user_id: &str, at: i64) -> Result<usize> {
        let mut updated = 0;
        for channel_id in channel_ids {
            updated += self.conn.execute(
                "UPDATE channel_members SET last_viewed_at = ?3 WHERE channel_id = ?1 AND user_id = ?2",
                params![channel_id, user_id, at],
            )?;
        }
        Ok(updated)
    }
}
