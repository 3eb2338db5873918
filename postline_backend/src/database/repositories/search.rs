use super::posts::{post_from_row, POST_COLUMNS};
use crate::database::Database;
use crate::model::{PostList, SearchParams};
use anyhow::Result;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

const SEARCH_LIMIT: i64 = 100;

/// Runs one query group against the post store.
pub trait PostSearcher: Send + Sync {
    fn search_posts(&self, team_id: &str, user_id: &str, params: &SearchParams) -> Result<PostList>;
}

impl PostSearcher for Database {
    fn search_posts(&self, team_id: &str, user_id: &str, params: &SearchParams) -> Result<PostList> {
        self.with_repositories(|repos| repos.search(team_id, user_id, params))
    }
}

/// Turns user words into FTS5 phrases bound to one column. Quotes inside a
/// word are dropped; a trailing `*` becomes a prefix query.
fn fts_phrases(words: &[String], column: &str, strip_hash: bool) -> Vec<String> {
    words
        .iter()
        .filter_map(|word| {
            let prefix = word.ends_with('*') && !word.starts_with('"');
            let mut text: String = word.chars().filter(|c| *c != '"' && *c != '*').collect();
            if strip_hash {
                text = text.trim_start_matches('#').to_string();
            }
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(format!(
                "{column} : \"{text}\"{}",
                if prefix { "*" } else { "" }
            ))
        })
        .collect()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub(super) fn search_posts(
    conn: &Connection,
    team_id: &str,
    user_id: &str,
    params: &SearchParams,
) -> Result<PostList> {
    let columns = POST_COLUMNS
        .split(", ")
        .map(|c| format!("p.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "SELECT {columns} FROM posts p \
         JOIN channels c ON c.id = p.channel_id \
         LEFT JOIN users u ON u.id = p.user_id \
         WHERE p.delete_at = 0 AND p.original_id IS NULL AND p.type NOT LIKE 'system_%' \
         AND (c.team_id = ? OR c.team_id = '')"
    );
    let mut values: Vec<Value> = vec![Value::Text(team_id.to_string())];

    if !params.search_without_user_id {
        sql.push_str(" AND p.channel_id IN (SELECT channel_id FROM channel_members WHERE user_id = ?)");
        values.push(Value::Text(user_id.to_string()));
    }
    if !params.include_deleted_channels {
        sql.push_str(" AND c.delete_at = 0");
    }

    let mut list_filter = |sql: &mut String, clause: &str, items: &[String]| {
        if items.is_empty() {
            return;
        }
        sql.push_str(&format!(" AND {clause} ({})", placeholders(items.len())));
        values.extend(items.iter().map(|item| Value::Text(item.clone())));
    };
    list_filter(&mut sql, "c.name IN", &params.in_channels);
    list_filter(&mut sql, "c.name NOT IN", &params.excluded_channels);
    list_filter(&mut sql, "u.username IN", &params.from_users);
    list_filter(&mut sql, "u.username NOT IN", &params.excluded_users);

    if let Some(after) = params.after_millis() {
        sql.push_str(" AND p.create_at >= ?");
        values.push(Value::Integer(after));
    }
    if let Some(before) = params.before_millis() {
        sql.push_str(" AND p.create_at < ?");
        values.push(Value::Integer(before));
    }
    if let Some((start, end)) = params.on_millis() {
        sql.push_str(" AND p.create_at >= ? AND p.create_at < ?");
        values.push(Value::Integer(start));
        values.push(Value::Integer(end));
    }

    let column = if params.is_hashtag { "hashtags" } else { "message" };
    let joiner = if params.or_terms { " OR " } else { " AND " };
    let terms = fts_phrases(&params.term_words(), column, params.is_hashtag);
    if !terms.is_empty() {
        sql.push_str(" AND p.id IN (SELECT id FROM posts_fts WHERE posts_fts MATCH ?)");
        values.push(Value::Text(terms.join(joiner)));
    }
    let excluded = fts_phrases(&params.excluded_words(), column, params.is_hashtag);
    if !excluded.is_empty() {
        sql.push_str(" AND p.id NOT IN (SELECT id FROM posts_fts WHERE posts_fts MATCH ?)");
        values.push(Value::Text(excluded.join(" OR ")));
    }

    sql.push_str(" ORDER BY p.create_at DESC, p.id ASC LIMIT ?");
    values.push(Value::Integer(SEARCH_LIMIT));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), post_from_row)?;
    let mut list = PostList::new();
    for row in rows {
        let post = row?;
        list.add_order(post.id.clone());
        list.add_post(post);
    }
    Ok(list)
}
