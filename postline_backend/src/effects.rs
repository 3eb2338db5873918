//! Best-effort work that follows a committed write.
//!
//! Everything spawned here runs detached from the request. Failures end up in
//! the log and never change the result the caller already has.

use crate::database::models::{ChannelRecord, PREFERENCE_CATEGORY_FLAGGED_POST};
use crate::database::repositories::{FileRepository, PreferenceRepository, UserRepository, WebhookRepository};
use crate::database::Database;
use crate::index::SearchIndex;
use crate::metrics::PostMetrics;
use crate::model::Post;
use crate::plugins::{HookContext, PluginRegistry};
use crate::realtime::{EventEnvelope, EventHub};
use crate::webhooks::{matching_hooks, WebhookDispatcher, WebhookPayload};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// Task submission without a return channel.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, effect: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tracker.spawn(async move {
            if let Err(err) = fut.await {
                tracing::error!(effect, error = ?err, "background effect failed");
            }
        });
    }

    pub fn spawn_blocking<F>(&self, effect: &'static str, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.tracker.spawn_blocking(move || {
            if let Err(err) = f() {
                tracing::error!(effect, error = ?err, "background effect failed");
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every effect spawned so far, and any they spawn, is done.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

/// The collaborators a committed write fans out to.
#[derive(Clone)]
pub struct PostEffects {
    database: Database,
    tasks: BackgroundTasks,
    hub: EventHub,
    plugins: Arc<PluginRegistry>,
    metrics: Arc<dyn PostMetrics>,
    index: Option<Arc<dyn SearchIndex>>,
    webhooks: Option<WebhookDispatcher>,
}

impl PostEffects {
    pub fn new(
        database: Database,
        tasks: BackgroundTasks,
        hub: EventHub,
        plugins: Arc<PluginRegistry>,
        metrics: Arc<dyn PostMetrics>,
    ) -> Self {
        Self {
            database,
            tasks,
            hub,
            plugins,
            metrics,
            index: None,
            webhooks: None,
        }
    }

    /// Index writes only happen when an index is attached.
    pub fn with_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_webhooks(mut self, dispatcher: WebhookDispatcher) -> Self {
        self.webhooks = Some(dispatcher);
        self
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn index(&self) -> Option<Arc<dyn SearchIndex>> {
        self.index.clone()
    }

    pub fn publish(&self, event: EventEnvelope) {
        self.hub.publish(event);
    }

    pub fn post_created(&self, ctx: HookContext, post: Post, team_id: String) {
        if !self.plugins.is_empty() {
            let plugins = Arc::clone(&self.plugins);
            let post = post.clone();
            self.tasks.spawn_blocking("plugins.message_has_been_posted", move || {
                plugins.run_has_been_posted(&ctx, &post);
                Ok(())
            });
        }
        self.index_post(post, team_id);
        self.metrics.increment_post_create();
    }

    pub fn post_updated(&self, ctx: HookContext, new: Post, old: Post, team_id: String) {
        if !self.plugins.is_empty() {
            let plugins = Arc::clone(&self.plugins);
            let post = new.clone();
            self.tasks.spawn_blocking("plugins.message_has_been_updated", move || {
                plugins.run_has_been_updated(&ctx, &post, &old);
                Ok(())
            });
        }
        self.index_post(new, team_id);
    }

    fn index_post(&self, post: Post, team_id: String) {
        let Some(index) = self.index.clone() else {
            return;
        };
        self.tasks.spawn_blocking("index.index_post", move || {
            index
                .index_post(&post, &team_id)
                .with_context(|| format!("failed to index post {}", post.id))
        });
    }

    /// Links the post's uploads and returns the ids that actually attached.
    /// Runs to completion before the create response is built.
    pub async fn attach_files(&self, post: &Post) -> Vec<String> {
        if post.file_ids.is_empty() {
            return Vec::new();
        }
        let database = self.database.clone();
        let post_id = post.id.clone();
        let user_id = post.user_id.clone();
        let file_ids = post.file_ids.clone();
        let attached = tokio::task::spawn_blocking(move || {
            let mut attached = Vec::with_capacity(file_ids.len());
            for file_id in file_ids {
                let result = database
                    .with_repositories(|repos| repos.files().attach_to_post(&file_id, &post_id, &user_id));
                match result {
                    Ok(()) => attached.push(file_id),
                    Err(err) => {
                        tracing::warn!(post_id = %post_id, file_id = %file_id, error = ?err, "failed to attach file to post");
                    }
                }
            }
            attached
        })
        .await;
        let attached = match attached {
            Ok(attached) => attached,
            Err(err) => {
                tracing::error!(post_id = %post.id, error = ?err, "file attachment task panicked");
                Vec::new()
            }
        };
        if !attached.is_empty() {
            self.metrics.increment_post_file_attachment(attached.len());
        }
        attached
    }

    /// Cleanups after a soft delete; each runs on its own.
    pub fn post_deleted(&self, post: &Post, delete_at: i64) {
        let database = self.database.clone();
        let post_id = post.id.clone();
        self.tasks.spawn_blocking("files.delete_for_post", move || {
            let removed = database
                .with_repositories(|repos| repos.files().delete_for_post(&post_id, delete_at))
                .with_context(|| format!("failed to delete files of post {post_id}"))?;
            tracing::debug!(post_id = %post_id, removed, "deleted post files");
            Ok(())
        });

        let database = self.database.clone();
        let post_id = post.id.clone();
        self.tasks.spawn_blocking("preferences.delete_flagged", move || {
            database
                .with_repositories(|repos| {
                    repos
                        .preferences()
                        .delete_category_and_name(PREFERENCE_CATEGORY_FLAGGED_POST, &post_id)
                })
                .with_context(|| format!("failed to drop flags for post {post_id}"))?;
            Ok(())
        });

        if let Some(index) = self.index.clone() {
            let post_id = post.id.clone();
            self.tasks.spawn_blocking("index.delete_post", move || {
                index
                    .delete_post(&post_id)
                    .with_context(|| format!("failed to remove post {post_id} from index"))
            });
        }
    }

    /// Outgoing webhooks for a new post, when asked for.
    pub fn post_published(&self, post: Post, channel: ChannelRecord, fire_webhooks: bool) {
        if let Some(dispatcher) = self.webhooks.clone().filter(|_| fire_webhooks) {
            if post.is_system_message() || channel.team_id.is_empty() {
                return;
            }
            let database = self.database.clone();
            self.tasks.spawn("webhooks.outgoing", async move {
                let team_id = channel.team_id.clone();
                let (hooks, user) = tokio::task::spawn_blocking({
                    let user_id = post.user_id.clone();
                    move || {
                        database.with_repositories(|repos| {
                            Ok((repos.webhooks().list_for_team(&team_id)?, repos.users().get(&user_id)?))
                        })
                    }
                })
                .await??;
                for (hook, trigger_word) in matching_hooks(&hooks, &post) {
                    let payload = WebhookPayload::new(&post, &channel, user.as_ref(), trigger_word);
                    for url in &hook.callback_urls {
                        if let Err(err) = dispatcher.deliver(url, &payload).await {
                            tracing::warn!(hook_id = %hook.id, url = %url, error = ?err, "outgoing webhook failed");
                        }
                    }
                }
                Ok(())
            });
        }
    }
}
