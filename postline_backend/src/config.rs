use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PostlineConfig {
    pub api_port: u16,
    pub paths: PostlinePaths,
    pub posts: PostSettings,
    pub search: SearchSettings,
    pub max_upload_bytes: Option<u64>,
}

impl PostlineConfig {
    pub fn from_env() -> Result<Self> {
        let paths = match env::var("POSTLINE_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PostlinePaths::from_base_dir(dir)?,
            _ => PostlinePaths::discover()?,
        };
        let api_port = env::var("POSTLINE_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8065);
        let max_upload_bytes = env::var("POSTLINE_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok());
        Ok(Self {
            api_port,
            paths,
            posts: PostSettings::from_env(),
            search: SearchSettings::from_env(),
            max_upload_bytes,
        })
    }

    pub fn new(api_port: u16, paths: PostlinePaths) -> Self {
        Self {
            api_port,
            paths,
            posts: PostSettings::default(),
            search: SearchSettings::default(),
            max_upload_bytes: None,
        }
    }
}

/// Business rules applied by the write pipeline.
#[derive(Debug, Clone)]
pub struct PostSettings {
    /// Seconds after creation during which the message text may change.
    /// `-1` disables the limit.
    pub edit_time_limit_secs: i64,
    /// Only system admins may post in the default channel when set.
    pub town_square_read_only: bool,
    pub enable_outgoing_webhooks: bool,
}

impl Default for PostSettings {
    fn default() -> Self {
        Self {
            edit_time_limit_secs: -1,
            town_square_read_only: false,
            enable_outgoing_webhooks: true,
        }
    }
}

impl PostSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let edit_time_limit_secs = env::var("POSTLINE_EDIT_TIME_LIMIT")
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(defaults.edit_time_limit_secs);
        Self {
            edit_time_limit_secs,
            town_square_read_only: env_flag("POSTLINE_TOWN_SQUARE_READ_ONLY")
                .unwrap_or(defaults.town_square_read_only),
            enable_outgoing_webhooks: env_flag("POSTLINE_ENABLE_OUTGOING_WEBHOOKS")
                .unwrap_or(defaults.enable_outgoing_webhooks),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub enable_post_search: bool,
    pub view_archived_channels: bool,
    pub enable_indexing: bool,
    pub enable_index_search: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            enable_post_search: true,
            view_archived_channels: false,
            enable_indexing: false,
            enable_index_search: false,
        }
    }
}

impl SearchSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enable_post_search: env_flag("POSTLINE_ENABLE_POST_SEARCH")
                .unwrap_or(defaults.enable_post_search),
            view_archived_channels: env_flag("POSTLINE_VIEW_ARCHIVED_CHANNELS")
                .unwrap_or(defaults.view_archived_channels),
            enable_indexing: env_flag("POSTLINE_ENABLE_INDEXING")
                .unwrap_or(defaults.enable_indexing),
            enable_index_search: env_flag("POSTLINE_ENABLE_INDEX_SEARCH")
                .unwrap_or(defaults.enable_index_search),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| {
        let v = v.trim();
        v == "1" || v.eq_ignore_ascii_case("true")
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostlinePaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl PostlinePaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("postline.db");
        let logs_dir = base.join("logs");

        Ok(Self {
            base,
            data_dir,
            db_path,
            logs_dir,
        })
    }
}
