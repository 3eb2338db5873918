use crate::database::models::PREFERENCE_CATEGORY_FLAGGED_POST;
use crate::model::{Post, PostList, Props, PROP_DELETE_BY};
use crate::utils::new_id;
use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

pub(super) const POST_COLUMNS: &str = "id, create_at, update_at, edit_at, delete_at, is_pinned, \
     user_id, channel_id, root_id, parent_id, original_id, message, type, props, hashtags, \
     file_ids, pending_post_id, has_reactions";

pub(super) struct SqlitePostRepository<'conn> {
    pub(super) conn: &'conn Connection,
}

pub(super) fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let props: String = row.get("props")?;
    let file_ids: String = row.get("file_ids")?;
    Ok(Post {
        id: row.get("id")?,
        create_at: row.get("create_at")?,
        update_at: row.get("update_at")?,
        edit_at: row.get("edit_at")?,
        delete_at: row.get("delete_at")?,
        is_pinned: row.get("is_pinned")?,
        user_id: row.get("user_id")?,
        channel_id: row.get("channel_id")?,
        root_id: row.get("root_id")?,
        parent_id: row.get("parent_id")?,
        original_id: row.get("original_id")?,
        message: row.get("message")?,
        post_type: row.get("type")?,
        props: decode_json::<Props>(&props, 13)?,
        hashtags: row.get("hashtags")?,
        file_ids: decode_json::<Vec<String>>(&file_ids, 15)?,
        pending_post_id: row.get("pending_post_id")?,
        has_reactions: row.get("has_reactions")?,
    })
}

/// SQLite integers are signed; oversized counts saturate.
fn sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str, column: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err)))
}

fn insert_post(conn: &Connection, post: &Post) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO posts ({POST_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        ),
        params![
            post.id,
            post.create_at,
            post.update_at,
            post.edit_at,
            post.delete_at,
            post.is_pinned,
            post.user_id,
            post.channel_id,
            post.root(),
            post.parent(),
            post.original_id.as_deref().filter(|id| !id.is_empty()),
            post.message,
            post.post_type,
            serde_json::to_string(&post.props)?,
            post.hashtags,
            serde_json::to_string(&post.file_ids)?,
            post.pending_id(),
            post.has_reactions,
        ],
    )?;
    Ok(())
}

fn write_columns(conn: &Connection, post: &Post, expected_update_at: Option<i64>) -> Result<usize> {
    let changed = conn.execute(
        r#"
        UPDATE posts SET
            update_at = ?2, edit_at = ?3, delete_at = ?4, is_pinned = ?5, message = ?6,
            type = ?7, props = ?8, hashtags = ?9, file_ids = ?10, has_reactions = ?11
        WHERE id = ?1 AND (?12 IS NULL OR update_at = ?12)
        "#,
        params![
            post.id,
            post.update_at,
            post.edit_at,
            post.delete_at,
            post.is_pinned,
            post.message,
            post.post_type,
            serde_json::to_string(&post.props)?,
            post.hashtags,
            serde_json::to_string(&post.file_ids)?,
            post.has_reactions,
            expected_update_at,
        ],
    )?;
    Ok(changed)
}

fn index_text(conn: &Connection, post: &Post) -> Result<()> {
    conn.execute("DELETE FROM posts_fts WHERE id = ?1", params![post.id])?;
    if post.delete_at == 0 {
        conn.execute(
            "INSERT INTO posts_fts (id, message, hashtags) VALUES (?1, ?2, ?3)",
            params![post.id, post.message, post.hashtags],
        )?;
    }
    Ok(())
}

impl<'conn> SqlitePostRepository<'conn> {
    fn query_list(&self, sql: &str, params: impl rusqlite::Params) -> Result<PostList> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, post_from_row)?;
        let mut list = PostList::new();
        for row in rows {
            let post = row?;
            list.add_order(post.id.clone());
            list.add_post(post);
        }
        Ok(list)
    }

    fn create_at_of(&self, post_id: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT create_at FROM posts WHERE id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl<'conn> super::PostRepository for SqlitePostRepository<'conn> {
    fn save(&self, post: &Post) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        insert_post(&tx, post)?;
        index_text(&tx, post)?;
        tx.commit()?;
        Ok(())
    }

    fn overwrite(&self, post: &Post) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        write_columns(&tx, post, None)?;
        index_text(&tx, post)?;
        tx.commit()?;
        Ok(())
    }

    fn update(&self, new: &Post, old: &Post) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        if write_columns(&tx, new, Some(old.update_at))? == 0 {
            return Ok(false);
        }
        let history = Post {
            id: new_id(),
            original_id: Some(old.id.clone()),
            update_at: new.update_at,
            delete_at: new.update_at,
            ..old.clone()
        };
        insert_post(&tx, &history)?;
        index_text(&tx, new)?;
        tx.commit()?;
        Ok(true)
    }

    fn delete(&self, post_id: &str, delete_at: i64, deleted_by: &str) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE posts SET delete_at = ?2, update_at = ?2, props = json_set(props, ?3, ?4) \
             WHERE id = ?1 AND delete_at = 0",
            params![post_id, delete_at, format!("$.{PROP_DELETE_BY}"), deleted_by],
        )?;
        tx.execute(
            "UPDATE posts SET delete_at = ?2, update_at = ?2 WHERE root_id = ?1 AND delete_at = 0",
            params![post_id, delete_at],
        )?;
        tx.execute(
            "DELETE FROM posts_fts WHERE id IN (SELECT id FROM posts WHERE id = ?1 OR root_id = ?1)",
            params![post_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Post>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![id],
                post_from_row,
            )
            .optional()?)
    }

    fn get_thread(&self, id: &str) -> Result<PostList> {
        let root: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT root_id FROM posts WHERE id = ?1 AND delete_at = 0",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(root) = root else {
            return Ok(PostList::new());
        };
        let root_id = root.filter(|r| !r.is_empty()).unwrap_or_else(|| id.to_string());
        self.query_list(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE (id = ?1 OR root_id = ?1) AND delete_at = 0 AND original_id IS NULL \
                 ORDER BY create_at DESC, id ASC"
            ),
            params![root_id],
        )
    }

    fn get_many(&self, ids: &[String]) -> Result<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id IN ({placeholders}) ORDER BY create_at DESC"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), post_from_row)?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn list_for_channel(&self, channel_id: &str, offset: usize, limit: usize) -> Result<PostList> {
        self.query_list(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE channel_id = ?1 AND delete_at = 0 AND original_id IS NULL \
                 ORDER BY create_at DESC, id ASC LIMIT ?2 OFFSET ?3"
            ),
            params![channel_id, sql_count(limit), sql_count(offset)],
        )
    }

    fn list_since(&self, channel_id: &str, since: i64) -> Result<PostList> {
        self.query_list(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE channel_id = ?1 AND update_at > ?2 AND original_id IS NULL \
                 ORDER BY create_at DESC, id ASC"
            ),
            params![channel_id, since],
        )
    }

    fn list_before(&self, channel_id: &str, post_id: &str, offset: usize, limit: usize) -> Result<PostList> {
        let Some(pivot) = self.create_at_of(post_id)? else {
            return Ok(PostList::new());
        };
        self.query_list(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE channel_id = ?1 AND create_at < ?2 AND delete_at = 0 AND original_id IS NULL \
                 ORDER BY create_at DESC, id ASC LIMIT ?3 OFFSET ?4"
            ),
            params![channel_id, pivot, sql_count(limit), sql_count(offset)],
        )
    }

    fn list_after(&self, channel_id: &str, post_id: &str, offset: usize, limit: usize) -> Result<PostList> {
        let Some(pivot) = self.create_at_of(post_id)? else {
            return Ok(PostList::new());
        };
        let mut list = self.query_list(
            &format!(
                "SELECT {POST_COLUMNS} FROM posts \
                 WHERE channel_id = ?1 AND create_at > ?2 AND delete_at = 0 AND original_id IS NULL \
                 ORDER BY create_at ASC, id DESC LIMIT ?3 OFFSET ?4"
            ),
            params![channel_id, pivot, sql_count(limit), sql_count(offset)],
        )?;
        list.order.reverse();
        Ok(list)
    }

    fn id_after_time(&self, channel_id: &str, time: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM posts \
                 WHERE channel_id = ?1 AND create_at > ?2 AND delete_at = 0 AND original_id IS NULL \
                 ORDER BY create_at ASC LIMIT 1",
                params![channel_id, time],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn id_before_time(&self, channel_id: &str, time: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM posts \
                 WHERE channel_id = ?1 AND create_at < ?2 AND delete_at = 0 AND original_id IS NULL \
                 ORDER BY create_at DESC LIMIT 1",
                params![channel_id, time],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn last_update_at(&self, channel_id: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(update_at), 0) FROM posts WHERE channel_id = ?1 AND original_id IS NULL",
            params![channel_id],
            |row| row.get(0),
        )?)
    }

    fn list_indexable(&self, offset: usize, limit: usize) -> Result<Vec<(Post, String)>> {
        let columns = POST_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns}, c.team_id AS team_id FROM posts p \
             JOIN channels c ON c.id = p.channel_id \
             WHERE p.delete_at = 0 AND p.original_id IS NULL \
             ORDER BY p.create_at ASC, p.id ASC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![sql_count(limit), sql_count(offset)], |row| {
            Ok((post_from_row(row)?, row.get::<_, String>("team_id")?))
        })?;
        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    fn flagged(
        &self,
        user_id: &str,
        team_id: Option<&str>,
        channel_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<PostList> {
        let columns = POST_COLUMNS
            .split(", ")
            .map(|c| format!("p.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_list(
            &format!(
                r#"
                SELECT {columns} FROM posts p
                JOIN preferences pr ON pr.name = p.id
                JOIN channels c ON c.id = p.channel_id
                WHERE pr.user_id = ?1 AND pr.category = ?2 AND pr.value = 'true'
                  AND p.delete_at = 0
                  AND (?3 IS NULL OR c.team_id = ?3 OR c.team_id = '')
                  AND (?4 IS NULL OR p.channel_id = ?4)
                ORDER BY p.create_at DESC, p.id ASC
                LIMIT ?5 OFFSET ?6
                "#
            ),
            params![
                user_id,
                PREFERENCE_CATEGORY_FLAGGED_POST,
                team_id,
                channel_id,
                sql_count(limit),
                sql_count(offset)
            ],
        )
    }
}
