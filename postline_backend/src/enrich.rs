//! Checks and derived fields applied to a post before it is written.

use crate::database::models::{ChannelRecord, ChannelType};
use crate::error::{PostError, PostResult};
use crate::model::{parse_hashtags, Post, PostList, PROP_ATTACHMENTS, PROP_CHANNEL_MENTIONS};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Longest message, in characters, the store accepts.
pub const MAX_POST_SIZE: usize = 16_383;

pub fn validate_post(post: &Post) -> PostResult<()> {
    if post.channel_id.trim().is_empty() {
        return Err(PostError::bad_request("model.post.is_valid.channel_id"));
    }
    if post.user_id.trim().is_empty() {
        return Err(PostError::bad_request("model.post.is_valid.user_id"));
    }
    let length = post.message.chars().count();
    if length > MAX_POST_SIZE {
        return Err(PostError::bad_request_with(
            "model.post.is_valid.msg",
            format!("{length} characters, limit is {MAX_POST_SIZE}"),
        ));
    }
    Ok(())
}

/// Checks the thread linkage of a reply against the live posts of the
/// thread named by its root. Fills in `parent_id` when only a root is given.
pub fn check_thread(post: &mut Post, thread: &PostList) -> PostResult<()> {
    let Some(root_id) = post.root().map(str::to_string) else {
        return Ok(());
    };
    let Some(root) = thread.posts.get(&root_id) else {
        return Err(PostError::bad_request_with("api.post.create_post.root_id", root_id));
    };
    if root.channel_id != post.channel_id {
        return Err(PostError::bad_request("api.post.create_post.channel_root_id"));
    }
    if root.root().is_some() {
        return Err(PostError::bad_request_with("api.post.create_post.root_id", root_id));
    }
    let parent_id = match post.parent() {
        Some(parent) => parent.to_string(),
        None => {
            post.parent_id = Some(root_id.clone());
            root_id.clone()
        }
    };
    if parent_id != root_id {
        let in_thread = thread
            .posts
            .get(&parent_id)
            .is_some_and(|parent| parent.channel_id == post.channel_id);
        if !in_thread {
            return Err(PostError::bad_request_with("api.post.create_post.parent_id", parent_id));
        }
    }
    Ok(())
}

pub fn fill_hashtags(post: &mut Post) {
    post.hashtags = parse_hashtags(&post.message);
}

/// Stores `{name: {"display_name": ..}}` for the open channels mentioned in
/// the message. Names that resolved to nothing are dropped silently.
/// Returns name → display name for the real-time payload.
pub fn apply_channel_mentions(post: &mut Post, candidates: &[ChannelRecord]) -> HashMap<String, String> {
    let wanted = post.channel_mentions();
    let mut resolved = HashMap::new();
    let mut prop = Map::new();
    for channel in candidates {
        if channel.channel_type != ChannelType::Open || !wanted.contains(&channel.name) {
            continue;
        }
        prop.insert(
            channel.name.clone(),
            json!({ "display_name": channel.display_name }),
        );
        resolved.insert(channel.name.clone(), channel.display_name.clone());
    }
    if prop.is_empty() {
        post.props.remove(PROP_CHANNEL_MENTIONS);
    } else {
        post.add_prop(PROP_CHANNEL_MENTIONS, Value::Object(prop));
    }
    resolved
}

/// Re-encodes legacy attachment props (a JSON string, or a list holding
/// encoded strings) into plain JSON objects. On failure the original value
/// stays in place.
pub fn migrate_attachments(post: &mut Post) {
    let Some(original) = post.props.get(PROP_ATTACHMENTS).cloned() else {
        return;
    };
    match reencode_attachments(&original) {
        Ok(Some(value)) => {
            post.props.insert(PROP_ATTACHMENTS.to_string(), value);
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(post_id = %post.id, error = %err, "could not migrate post attachments");
        }
    }
}

fn reencode_attachments(value: &Value) -> Result<Option<Value>, serde_json::Error> {
    match value {
        Value::String(raw) => {
            let decoded: Vec<Map<String, Value>> = serde_json::from_str(raw)?;
            Ok(Some(serde_json::to_value(decoded)?))
        }
        Value::Array(items) if items.iter().any(Value::is_string) => {
            let mut decoded = Vec::with_capacity(items.len());
            for item in items {
                let object: Map<String, Value> = match item {
                    Value::String(raw) => serde_json::from_str(raw)?,
                    other => serde_json::from_value(other.clone())?,
                };
                decoded.push(object);
            }
            Ok(Some(serde_json::to_value(decoded)?))
        }
        _ => Ok(None),
    }
}

/// Rejects message edits outside the window; `-1` disables the check.
pub fn check_edit_window(old: &Post, now: i64, limit_secs: i64) -> PostResult<()> {
    if limit_secs < 0 {
        return Ok(());
    }
    if old.create_at + limit_secs * 1000 < now {
        return Err(PostError::bad_request_with(
            "api.post.update_post.permissions_time_limit",
            format!("timeLimit={limit_secs}"),
        ));
    }
    Ok(())
}

/// Localized notice for posts refused in the read-only default channel.
pub fn read_only_notice(locale: &str) -> &'static str {
    match locale.split(['-', '_']).next().unwrap_or_default() {
        "de" => "Dieser Kanal ist schreibgeschützt. Nur Mitglieder mit Berechtigung können hier posten.",
        "es" => "Este canal es de solo lectura. Solo los miembros con permiso pueden publicar aquí.",
        "fr" => "Ce canal est en lecture seule. Seuls les membres autorisés peuvent y publier.",
        "ja" => "このチャンネルは読み取り専用です。権限のあるメンバーのみ投稿できます。",
        _ => "This channel is read-only. Only members with permission can post here.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, channel: &str, root: Option<&str>) -> Post {
        Post {
            id: id.into(),
            channel_id: channel.into(),
            user_id: "u1".into(),
            root_id: root.map(str::to_string),
            ..Default::default()
        }
    }

    fn thread(posts: Vec<Post>) -> PostList {
        posts.into_iter().collect()
    }

    #[test]
    fn reply_without_parent_gets_the_root() {
        let mut reply = post("r", "c1", Some("root"));
        check_thread(&mut reply, &thread(vec![post("root", "c1", None)])).unwrap();
        assert_eq!(reply.parent_id.as_deref(), Some("root"));
    }

    #[test]
    fn nested_roots_are_rejected() {
        let mut reply = post("r", "c1", Some("mid"));
        let list = thread(vec![post("mid", "c1", Some("top")), post("top", "c1", None)]);
        let err = check_thread(&mut reply, &list).unwrap_err();
        assert_eq!(err.id(), "api.post.create_post.root_id");
    }

    #[test]
    fn parent_must_live_in_the_thread() {
        let mut reply = post("r", "c1", Some("root"));
        reply.parent_id = Some("stranger".into());
        let err = check_thread(&mut reply, &thread(vec![post("root", "c1", None)])).unwrap_err();
        assert_eq!(err.id(), "api.post.create_post.parent_id");

        let mut cross = post("r", "c2", Some("root"));
        let err = check_thread(&mut cross, &thread(vec![post("root", "c1", None)])).unwrap_err();
        assert_eq!(err.id(), "api.post.create_post.channel_root_id");
    }

    #[test]
    fn mentions_keep_only_open_channels() {
        let mut p = post("p", "c1", None);
        p.message = "see ~ops and ~secret and ~ghost".into();
        let channels = vec![
            ChannelRecord {
                id: "c2".into(),
                team_id: "t1".into(),
                name: "ops".into(),
                display_name: "Operations".into(),
                channel_type: ChannelType::Open,
                create_at: 0,
                delete_at: 0,
            },
            ChannelRecord {
                id: "c3".into(),
                team_id: "t1".into(),
                name: "secret".into(),
                display_name: "Secret".into(),
                channel_type: ChannelType::Private,
                create_at: 0,
                delete_at: 0,
            },
        ];
        let resolved = apply_channel_mentions(&mut p, &channels);
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            p.props[PROP_CHANNEL_MENTIONS]["ops"]["display_name"],
            json!("Operations")
        );

        p.message = "nothing here".into();
        apply_channel_mentions(&mut p, &[]);
        assert!(!p.props.contains_key(PROP_CHANNEL_MENTIONS));
    }

    #[test]
    fn legacy_attachments_are_reencoded() {
        let mut p = post("p", "c1", None);
        p.add_prop(PROP_ATTACHMENTS, r#"[{"text":"hi"}]"#);
        migrate_attachments(&mut p);
        assert_eq!(p.props[PROP_ATTACHMENTS], json!([{ "text": "hi" }]));

        p.add_prop(PROP_ATTACHMENTS, "not json");
        migrate_attachments(&mut p);
        assert_eq!(p.props[PROP_ATTACHMENTS], json!("not json"));
    }

    #[test]
    fn edit_window_and_size_limits() {
        let old = Post {
            create_at: 1_000,
            ..Default::default()
        };
        assert!(check_edit_window(&old, 1_000 + 61_000, 60).is_err());
        assert!(check_edit_window(&old, 1_000 + 60_000, 60).is_ok());
        assert!(check_edit_window(&old, i64::MAX / 2, -1).is_ok());

        let mut p = post("p", "c1", None);
        p.message = "x".repeat(MAX_POST_SIZE + 1);
        assert_eq!(validate_post(&p).unwrap_err().id(), "model.post.is_valid.msg");
    }

    #[test]
    fn notices_fall_back_to_english() {
        assert!(read_only_notice("fr-CA").starts_with("Ce canal"));
        assert!(read_only_notice("xx").starts_with("This channel"));
    }
}
