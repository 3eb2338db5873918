pub mod models;
pub mod repositories;

use crate::config::PostlinePaths;
use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub(crate) const MIGRATIONS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        locale TEXT NOT NULL DEFAULT 'en',
        roles TEXT NOT NULL DEFAULT 'system_user',
        is_bot INTEGER NOT NULL DEFAULT 0,
        auto_responder_active INTEGER NOT NULL DEFAULT 0,
        auto_responder_message TEXT
    );

    CREATE TABLE IF NOT EXISTS channels (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        display_name TEXT NOT NULL,
        channel_type TEXT NOT NULL DEFAULT 'O',
        create_at INTEGER NOT NULL,
        delete_at INTEGER NOT NULL DEFAULT 0,
        UNIQUE (team_id, name)
    );

    CREATE TABLE IF NOT EXISTS channel_members (
        channel_id TEXT NOT NULL,
        user_id TEXT NOT NULL,
        last_viewed_at INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (channel_id, user_id),
        FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
        FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        create_at INTEGER NOT NULL,
        update_at INTEGER NOT NULL,
        edit_at INTEGER NOT NULL DEFAULT 0,
        delete_at INTEGER NOT NULL DEFAULT 0,
        is_pinned INTEGER NOT NULL DEFAULT 0,
        user_id TEXT NOT NULL,
        channel_id TEXT NOT NULL,
        root_id TEXT,
        parent_id TEXT,
        message TEXT NOT NULL,
        type TEXT NOT NULL DEFAULT '',
        props TEXT NOT NULL DEFAULT '{}',
        hashtags TEXT NOT NULL DEFAULT '',
        file_ids TEXT NOT NULL DEFAULT '[]',
        pending_post_id TEXT,
        has_reactions INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_posts_channel_create ON posts(channel_id, create_at);
    CREATE INDEX IF NOT EXISTS idx_posts_root ON posts(root_id);

    CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
        id UNINDEXED,
        message,
        hashtags
    );

    CREATE TABLE IF NOT EXISTS file_infos (
        id TEXT PRIMARY KEY,
        creator_id TEXT NOT NULL,
        post_id TEXT,
        name TEXT NOT NULL,
        size_bytes INTEGER NOT NULL DEFAULT 0,
        delete_at INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_file_infos_post ON file_infos(post_id);

    CREATE TABLE IF NOT EXISTS preferences (
        user_id TEXT NOT NULL,
        category TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (user_id, category, name)
    );

    CREATE TABLE IF NOT EXISTS outgoing_webhooks (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        channel_id TEXT,
        trigger_words TEXT NOT NULL DEFAULT '[]',
        trigger_on_prefix INTEGER NOT NULL DEFAULT 0,
        callback_urls TEXT NOT NULL DEFAULT '[]'
    );
"#;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    newly_created: bool,
}

impl Database {
    pub fn connect(paths: &PostlinePaths) -> Result<Self> {
        let newly_created = !paths.db_path.exists();
        let conn = Connection::open(&paths.db_path)?;
        Ok(Self::from_connection(conn, newly_created))
    }

    pub fn from_connection(conn: Connection, newly_created: bool) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            newly_created,
        }
    }

    /// Fresh migrated in-memory database, handy for tests and the CLI demo.
    pub fn in_memory() -> Result<Self> {
        let db = Self::from_connection(Connection::open_in_memory()?, true);
        db.ensure_migrations()?;
        Ok(db)
    }

    pub fn ensure_migrations(&self) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute_batch(MIGRATIONS)?;
            self.ensure_post_history_column(conn)?;
            Ok(())
        })?;
        Ok(self.newly_created)
    }

    pub fn with_repositories<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(repositories::SqliteRepositories<'_>) -> Result<T>,
    {
        self.with_conn(|conn| {
            let repos = repositories::SqliteRepositories::new(conn);
            f(repos)
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&guard)
    }

    /// Databases created before edit history existed lack `original_id`.
    fn ensure_post_history_column(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare("PRAGMA table_info(posts)")?;
        let mut has_original_id = false;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(1)?;
            Ok(name)
        })?;
        for row in rows {
            if row?.eq_ignore_ascii_case("original_id") {
                has_original_id = true;
                break;
            }
        }
        if !has_original_id {
            conn.execute("ALTER TABLE posts ADD COLUMN original_id TEXT", [])?;
        }
        Ok(())
    }
}
