use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub type Props = Map<String, Value>;

pub const SYSTEM_MESSAGE_PREFIX: &str = "system_";
pub const POST_EPHEMERAL: &str = "system_ephemeral";
pub const POST_AUTO_RESPONDER: &str = "system_auto_responder";

pub const PROP_ADD_CHANNEL_MEMBER: &str = "add_channel_member";
pub const PROP_ATTACHMENTS: &str = "attachments";
pub const PROP_CHANNEL_MENTIONS: &str = "channel_mentions";
pub const PROP_DELETE_BY: &str = "deleteBy";
pub const PROP_FROM_BOT: &str = "from_bot";
pub const PROP_FROM_WEBHOOK: &str = "from_webhook";

/// Props a client may never set directly; the server assigns them.
const SERVER_ASSIGNED_PROPS: &[&str] = &[PROP_ADD_CHANNEL_MEMBER, PROP_FROM_BOT, PROP_CHANNEL_MENTIONS];

const MAX_HASHTAGS_LEN: usize = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub create_at: i64,
    #[serde(default)]
    pub update_at: i64,
    #[serde(default)]
    pub edit_at: i64,
    #[serde(default)]
    pub delete_at: i64,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub post_type: String,
    #[serde(default)]
    pub props: Props,
    #[serde(default)]
    pub hashtags: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_post_id: Option<String>,
    #[serde(default)]
    pub has_reactions: bool,
}

impl Post {
    pub fn is_system_message(&self) -> bool {
        self.post_type.starts_with(SYSTEM_MESSAGE_PREFIX)
    }

    pub fn root(&self) -> Option<&str> {
        self.root_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn pending_id(&self) -> Option<&str> {
        self.pending_post_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn add_prop(&mut self, key: &str, value: impl Into<Value>) {
        self.props.insert(key.to_string(), value.into());
    }

    pub fn sanitize_props(&mut self) {
        for key in SERVER_ASSIGNED_PROPS {
            self.props.remove(*key);
        }
    }

    /// Lowercased `~channel` names mentioned in the message, in order of
    /// first appearance.
    pub fn channel_mentions(&self) -> Vec<String> {
        static MENTION: OnceLock<Regex> = OnceLock::new();
        let re = MENTION.get_or_init(|| {
            Regex::new(r"\B~([a-zA-Z0-9\-_]+)").expect("channel mention pattern")
        });
        let mut names: Vec<String> = Vec::new();
        for caps in re.captures_iter(&self.message) {
            let name = caps[1].to_lowercase();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn attachments_equal(&self, other: &Post) -> bool {
        self.props.get(PROP_ATTACHMENTS) == other.props.get(PROP_ATTACHMENTS)
    }

    /// Shape handed to clients and real-time subscribers.
    pub fn prepare_for_client(&self) -> Post {
        let mut post = self.clone();
        if post.update_at < post.create_at {
            post.update_at = post.create_at;
        }
        post.props.retain(|_, value| !value.is_null());
        if post.post_type != POST_EPHEMERAL {
            post.props.remove(PROP_ADD_CHANNEL_MEMBER);
        }
        post
    }

    pub fn apply_patch(&mut self, patch: &PostPatch) {
        if let Some(is_pinned) = patch.is_pinned {
            self.is_pinned = is_pinned;
        }
        if let Some(message) = &patch.message {
            self.message = message.clone();
        }
        if let Some(props) = &patch.props {
            self.props = props.clone();
        }
        if let Some(file_ids) = &patch.file_ids {
            self.file_ids = file_ids.clone();
        }
        if let Some(has_reactions) = patch.has_reactions {
            self.has_reactions = has_reactions;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostPatch {
    #[serde(default)]
    pub is_pinned: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub props: Option<Props>,
    #[serde(default)]
    pub file_ids: Option<Vec<String>>,
    #[serde(default)]
    pub has_reactions: Option<bool>,
}

/// Splits a message into its space-separated hashtags, ignoring everything
/// that is not a well-formed tag.
pub fn parse_hashtags(text: &str) -> String {
    static PATTERNS: OnceLock<(Regex, Regex, Regex, Regex)> = OnceLock::new();
    let (punc_start, punc_end, repeated_hash, valid) = PATTERNS.get_or_init(|| {
        (
            Regex::new(r"^[^\pL\d\s#]+").expect("punctuation start pattern"),
            Regex::new(r"[^\pL\d\s]+$").expect("punctuation end pattern"),
            Regex::new(r"^#{2,}").expect("hash prefix pattern"),
            Regex::new(r"^#\pL[\pL\d\-_.]*[\pL\d]$").expect("hashtag pattern"),
        )
    });

    let mut tags: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let word = punc_start.replace(word, "");
        let word = punc_end.replace(&word, "");
        let word = repeated_hash.replace(&word, "#");
        if valid.is_match(&word) {
            tags.push(word.into_owned());
        }
    }

    let mut joined = tags.join(" ");
    if joined.len() > MAX_HASHTAGS_LEN {
        let mut cut = MAX_HASHTAGS_LEN;
        while !joined.is_char_boundary(cut) {
            cut -= 1;
        }
        cut = joined[..cut].rfind(' ').unwrap_or(0);
        joined.truncate(cut);
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hashtags_are_extracted_and_trimmed() {
        assert_eq!(parse_hashtags("hello #world and ##rust!"), "#world #rust");
        assert_eq!(parse_hashtags("(#wrapped) #a #1abc"), "#wrapped");
        assert_eq!(parse_hashtags("no tags here"), "");
    }

    #[test]
    fn hashtags_are_capped() {
        let message = (0..300).map(|i| format!("#tag{i}")).collect::<Vec<_>>().join(" ");
        let tags = parse_hashtags(&message);
        assert!(tags.len() <= MAX_HASHTAGS_LEN);
        assert!(!tags.ends_with(' '));
    }

    #[test]
    fn channel_mentions_are_unique_and_lowercased() {
        let post = Post {
            message: "see ~Town-Square and ~off_topic, also ~town-square".into(),
            ..Default::default()
        };
        assert_eq!(post.channel_mentions(), vec!["town-square", "off_topic"]);
    }

    #[test]
    fn sanitize_strips_server_assigned_props() {
        let mut post = Post::default();
        post.add_prop(PROP_FROM_BOT, "true");
        post.add_prop(PROP_ADD_CHANNEL_MEMBER, json!({"user_ids": ["u"]}));
        post.add_prop("custom", 1);
        post.sanitize_props();
        assert_eq!(post.props.len(), 1);
        assert!(post.props.contains_key("custom"));
    }

    #[test]
    fn client_shape_normalizes_timestamps() {
        let mut post = Post {
            create_at: 50,
            update_at: 0,
            ..Default::default()
        };
        post.add_prop("gone", Value::Null);
        post.add_prop(PROP_ADD_CHANNEL_MEMBER, "x");
        let shaped = post.prepare_for_client();
        assert_eq!(shaped.update_at, 50);
        assert!(shaped.props.is_empty());
    }

    #[test]
    fn empty_references_count_as_absent() {
        let post = Post {
            root_id: Some(String::new()),
            pending_post_id: Some("p1".into()),
            ..Default::default()
        };
        assert_eq!(post.root(), None);
        assert_eq!(post.pending_id(), Some("p1"));
    }
}
