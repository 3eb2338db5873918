use crate::config::PostlineConfig;
use crate::database::models::{
    ChannelMemberRecord, ChannelRecord, ChannelType, TeamRecord, UserRecord, DEFAULT_CHANNEL, ROLE_SYSTEM_ADMIN,
};
use crate::database::repositories::{ChannelRepository, TeamRepository, UserRepository};
use crate::database::Database;
use crate::utils::now_millis;
use anyhow::{Context, Result};
use std::fs;

pub const DEFAULT_TEAM_ID: &str = "default";
pub const DEFAULT_CHANNEL_ID: &str = "town-square";
pub const LOCAL_ADMIN_ID: &str = "admin";

pub struct BootstrapResources {
    pub directories_created: Vec<String>,
    pub database_initialized: bool,
    pub database: Database,
}

pub async fn initialize(config: &PostlineConfig) -> Result<BootstrapResources> {
    let mut directories_created = Vec::new();
    create_dir_if_missing(&config.paths.data_dir, &mut directories_created)?;
    create_dir_if_missing(&config.paths.logs_dir, &mut directories_created)?;

    let database = Database::connect(&config.paths)
        .with_context(|| format!("failed to open {}", config.paths.db_path.display()))?;
    let database_initialized = database.ensure_migrations()?;
    if database_initialized {
        seed_defaults(&database)?;
    }

    Ok(BootstrapResources {
        directories_created,
        database_initialized,
        database,
    })
}

/// A fresh store gets one team, its default channel and a local admin so
/// the CLI has somewhere to post.
pub fn seed_defaults(database: &Database) -> Result<()> {
    let now = now_millis();
    database.with_repositories(|repos| {
        repos.teams().save(&TeamRecord {
            id: DEFAULT_TEAM_ID.into(),
            name: DEFAULT_TEAM_ID.into(),
            display_name: "Default".into(),
        })?;
        repos.channels().save(&ChannelRecord {
            id: DEFAULT_CHANNEL_ID.into(),
            team_id: DEFAULT_TEAM_ID.into(),
            name: DEFAULT_CHANNEL.into(),
            display_name: "Town Square".into(),
            channel_type: ChannelType::Open,
            create_at: now,
            delete_at: 0,
        })?;
        repos.users().save(&UserRecord {
            id: LOCAL_ADMIN_ID.into(),
            username: LOCAL_ADMIN_ID.into(),
            locale: "en".into(),
            roles: format!("system_user {ROLE_SYSTEM_ADMIN}"),
            is_bot: false,
            auto_responder_active: false,
            auto_responder_message: None,
        })?;
        repos.channels().save_member(&ChannelMemberRecord {
            channel_id: DEFAULT_CHANNEL_ID.into(),
            user_id: LOCAL_ADMIN_ID.into(),
            last_viewed_at: 0,
        })?;
        Ok(())
    })?;
    tracing::info!(team_id = DEFAULT_TEAM_ID, channel_id = DEFAULT_CHANNEL_ID, "seeded default team");
    Ok(())
}

fn create_dir_if_missing(path: &std::path::Path, created: &mut Vec<String>) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        created.push(path.display().to_string());
    }
    Ok(())
}
