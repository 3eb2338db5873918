use crate::database::models::{ChannelRecord, OutgoingWebhookRecord, UserRecord};
use crate::model::Post;
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

/// Body POSTed to an outgoing webhook callback.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub team_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub timestamp: i64,
    pub user_id: String,
    pub user_name: String,
    pub post_id: String,
    pub text: String,
    pub trigger_word: String,
    pub file_ids: String,
}

impl WebhookPayload {
    pub fn new(post: &Post, channel: &ChannelRecord, user: Option<&UserRecord>, trigger_word: &str) -> Self {
        Self {
            team_id: channel.team_id.clone(),
            channel_id: channel.id.clone(),
            channel_name: channel.name.clone(),
            timestamp: post.create_at,
            user_id: post.user_id.clone(),
            user_name: user.map(|u| u.username.clone()).unwrap_or_default(),
            post_id: post.id.clone(),
            text: post.message.clone(),
            trigger_word: trigger_word.to_string(),
            file_ids: post.file_ids.join(","),
        }
    }
}

/// Hooks that fire for `post`, each with the trigger word that matched.
/// A hook bound to a channel only sees that channel; the first word must
/// equal a trigger word, or start with one for prefix hooks.
pub fn matching_hooks<'a>(
    hooks: &'a [OutgoingWebhookRecord],
    post: &Post,
) -> Vec<(&'a OutgoingWebhookRecord, &'a str)> {
    let first_word = post.message.split_whitespace().next().unwrap_or_default();
    if first_word.is_empty() {
        return Vec::new();
    }
    hooks
        .iter()
        .filter(|hook| {
            hook.channel_id
                .as_deref()
                .map_or(true, |channel_id| channel_id == post.channel_id)
        })
        .filter_map(|hook| {
            hook.trigger_words
                .iter()
                .find(|word| {
                    if hook.trigger_on_prefix {
                        first_word.starts_with(word.as_str())
                    } else {
                        first_word == word.as_str()
                    }
                })
                .map(|word| (hook, word.as_str()))
        })
        .collect()
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("postline/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self { client })
    }

    pub async fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("failed to reach webhook {url}"))?;
        response
            .error_for_status()
            .with_context(|| format!("webhook {url} returned an error status"))?;
        tracing::debug!(url, post_id = %payload.post_id, "delivered outgoing webhook");
        Ok(())
    }
}
