use serde::{Deserialize, Serialize};

pub const DEFAULT_CHANNEL: &str = "town-square";
pub const ROLE_SYSTEM_ADMIN: &str = "system_admin";
pub const PREFERENCE_CATEGORY_FLAGGED_POST: &str = "flagged_post";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Open,
    Private,
    Direct,
    Group,
}

impl ChannelType {
    pub fn as_code(self) -> &'static str {
        match self {
            ChannelType::Open => "O",
            ChannelType::Private => "P",
            ChannelType::Direct => "D",
            ChannelType::Group => "G",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "P" => ChannelType::Private,
            "D" => ChannelType::Direct,
            "G" => ChannelType::Group,
            _ => ChannelType::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    /// Empty for direct and group channels.
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    pub channel_type: ChannelType,
    pub create_at: i64,
    pub delete_at: i64,
}

impl ChannelRecord {
    pub fn is_deleted(&self) -> bool {
        self.delete_at != 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMemberRecord {
    pub channel_id: String,
    pub user_id: String,
    pub last_viewed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub locale: String,
    /// Space separated role names.
    pub roles: String,
    pub is_bot: bool,
    pub auto_responder_active: bool,
    pub auto_responder_message: Option<String>,
}

impl UserRecord {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.split_whitespace().any(|r| r == role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRecord {
    pub id: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfoRecord {
    pub id: String,
    pub creator_id: String,
    pub post_id: Option<String>,
    pub name: String,
    pub size_bytes: i64,
    pub delete_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub user_id: String,
    pub category: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingWebhookRecord {
    pub id: String,
    pub team_id: String,
    /// Restricts the hook to one channel when set.
    pub channel_id: Option<String>,
    pub trigger_words: Vec<String>,
    /// Matches when the message starts with a trigger word instead of
    /// equalling its first word.
    pub trigger_on_prefix: bool,
    pub callback_urls: Vec<String>,
}

/// Direct channels are named after both members, smaller id first.
pub fn direct_channel_name(user_a: &str, user_b: &str) -> String {
    if user_a <= user_b {
        format!("{user_a}__{user_b}")
    } else {
        format!("{user_b}__{user_a}")
    }
}

pub fn group_channel_name(user_ids: &[String]) -> String {
    let mut ids: Vec<&str> = user_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();
    format!("gm__{}", ids.join("__"))
}
