use crate::database::models::UserRecord;
use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const USER_COLUMNS: &str =
    "id, username, locale, roles, is_bot, auto_responder_active, auto_responder_message";

pub(super) struct SqliteUserRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        locale: row.get(2)?,
        roles: row.get(3)?,
        is_bot: row.get(4)?,
        auto_responder_active: row.get(5)?,
        auto_responder_message: row.get(6)?,
    })
}

impl<'conn> super::UserRepository for SqliteUserRepository<'conn> {
    fn save(&self, record: &UserRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO users (id, username, locale, roles, is_bot, auto_responder_active, auto_responder_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                locale = excluded.locale,
                roles = excluded.roles,
                is_bot = excluded.is_bot,
                auto_responder_active = excluded.auto_responder_active,
                auto_responder_message = excluded.auto_responder_message
            "#,
            params![
                record.id,
                record.username,
                record.locale,
                record.roles,
                record.is_bot,
                record.auto_responder_active,
                record.auto_responder_message
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?)
    }

    fn get_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username.trim_start_matches('@')],
                user_from_row,
            )
            .optional()?)
    }

    fn get_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserRecord>> {
        if usernames.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; usernames.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username IN ({placeholders})"
        ))?;
        let names = usernames.iter().map(|n| n.trim_start_matches('@').to_string());
        let rows = stmt.query_map(params_from_iter(names), user_from_row)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}
