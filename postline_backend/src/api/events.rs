use super::{request_user, ApiError, AppState};
use crate::realtime::EventEnvelope;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;

/// Server-sent stream of the post events the requesting user may see:
/// their own user-scoped events plus events of channels they belong to.
pub(crate) async fn stream_events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = request_user(&headers)?;
    let receiver = state.hub.subscribe();
    tracing::debug!(user_id = %user_id, "event subscriber connected");

    let events = stream::unfold((receiver, state, user_id), |(mut receiver, state, user_id)| async move {
        loop {
            let envelope = match receiver.recv().await {
                Ok(envelope) => envelope,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %user_id, skipped, "event subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };
            if !visible_to(&state, &envelope, &user_id).await {
                continue;
            }
            match Event::default().event(envelope.kind.as_str()).json_data(&envelope) {
                Ok(event) => return Some((Ok(event), (receiver, state, user_id))),
                Err(err) => tracing::warn!(error = %err, "failed to encode event"),
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn visible_to(state: &AppState, envelope: &EventEnvelope, user_id: &str) -> bool {
    if let Some(target) = envelope.broadcast.user_id.as_deref() {
        return target == user_id;
    }
    let Some(channel_id) = envelope.broadcast.channel_id.as_deref() else {
        return false;
    };
    match state.posts.is_channel_member(channel_id, user_id).await {
        Ok(member) => member,
        Err(err) => {
            tracing::warn!(channel_id, user_id, error = %err, "membership check failed");
            false
        }
    }
}
