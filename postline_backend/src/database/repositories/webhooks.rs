use crate::database::models::OutgoingWebhookRecord;
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{params, Connection};

pub(super) struct SqliteWebhookRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

fn decode_list(raw: String, column: usize) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

impl<'conn> super::WebhookRepository for SqliteWebhookRepository<'conn> {
    fn save(&self, record: &OutgoingWebhookRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO outgoing_webhooks (id, team_id, channel_id, trigger_words, trigger_on_prefix, callback_urls)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                channel_id = excluded.channel_id,
                trigger_words = excluded.trigger_words,
                trigger_on_prefix = excluded.trigger_on_prefix,
                callback_urls = excluded.callback_urls
            "#,
            params![
                record.id,
                record.team_id,
                record.channel_id,
                serde_json::to_string(&record.trigger_words)?,
                record.trigger_on_prefix,
                serde_json::to_string(&record.callback_urls)?
            ],
        )?;
        Ok(())
    }

    fn list_for_team(&self, team_id: &str) -> Result<Vec<OutgoingWebhookRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, team_id, channel_id, trigger_words, trigger_on_prefix, callback_urls \
             FROM outgoing_webhooks WHERE team_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![team_id], |row| {
            Ok(OutgoingWebhookRecord {
                id: row.get(0)?,
                team_id: row.get(1)?,
                channel_id: row.get(2)?,
                trigger_words: decode_list(row.get(3)?, 3)?,
                trigger_on_prefix: row.get(4)?,
                callback_urls: decode_list(row.get(5)?, 5)?,
            })
        })?;
        let mut hooks = Vec::new();
        for row in rows {
            hooks.push(row?);
        }
        Ok(hooks)
    }
}
