use crate::model::Post;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;

const EVENT_VERSION: u8 = 1;
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Posted,
    PostEdited,
    PostDeleted,
    EphemeralMessage,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Posted => "posted",
            EventKind::PostEdited => "post_edited",
            EventKind::PostDeleted => "post_deleted",
            EventKind::EphemeralMessage => "ephemeral_message",
        }
    }
}

/// Who receives an event: everyone in a channel, or one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub version: u8,
    pub kind: EventKind,
    pub broadcast: Broadcast,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub post: Post,
    /// Display names keyed by the `~channel` mentions in a new post.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mentions: HashMap<String, String>,
}

impl EventEnvelope {
    pub fn for_channel(kind: EventKind, post: Post) -> Self {
        Self {
            version: EVENT_VERSION,
            kind,
            broadcast: Broadcast {
                channel_id: Some(post.channel_id.clone()),
                user_id: None,
            },
            payload: EventPayload {
                post,
                mentions: HashMap::new(),
            },
        }
    }

    pub fn for_user(kind: EventKind, user_id: &str, post: Post) -> Self {
        Self {
            version: EVENT_VERSION,
            kind,
            broadcast: Broadcast {
                channel_id: Some(post.channel_id.clone()),
                user_id: Some(user_id.to_string()),
            },
            payload: EventPayload {
                post,
                mentions: HashMap::new(),
            },
        }
    }

    pub fn with_mentions(mut self, mentions: HashMap<String, String>) -> Self {
        self.payload.mentions = mentions;
        self
    }
}

/// In-process fan-out of post events to subscribers.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Delivers to current subscribers; having none is not an error.
    pub fn publish(&self, event: EventEnvelope) {
        let kind = event.kind;
        match self.tx.send(event) {
            Ok(receivers) => tracing::trace!(?kind, receivers, "published event"),
            Err(_) => tracing::trace!(?kind, "no subscribers for event"),
        }
    }
}
