use crate::cache::{pending_post_cache, ExpiringCache, PendingClaim, PendingPostCache, PendingPostGuard};
use crate::config::PostSettings;
use crate::database::models::{
    direct_channel_name, ChannelRecord, ChannelType, UserRecord, DEFAULT_CHANNEL, ROLE_SYSTEM_ADMIN,
};
use crate::database::repositories::{ChannelRepository, PostRepository, SqliteRepositories, UserRepository};
use crate::database::Database;
use crate::effects::PostEffects;
use crate::enrich::{
    apply_channel_mentions, check_edit_window, check_thread, fill_hashtags, migrate_attachments,
    read_only_notice, validate_post,
};
use crate::error::{PostError, PostResult};
use crate::model::{
    Post, PostList, PostPatch, POST_AUTO_RESPONDER, POST_EPHEMERAL, PROP_DELETE_BY, PROP_FROM_BOT,
    PROP_FROM_WEBHOOK,
};
use crate::plugins::{ChainResult, HookContext, DISMISS_POST_ERROR};
use crate::realtime::{EventEnvelope, EventKind};
use crate::utils::{new_id, now_millis};
use anyhow::anyhow;
use std::collections::HashMap;
use std::time::Duration;

const CHANNEL_CACHE_SIZE: usize = 20_000;
const CHANNEL_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
const LAST_POST_TIME_CACHE_SIZE: usize = 25_000;
const LAST_POST_TIME_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

const TOWN_SQUARE_READ_ONLY: &str = "api.post.create_post.town_square_read_only";

/// Create, update and delete for posts, plus the reads in `reads.rs`.
#[derive(Clone)]
pub struct PostService {
    pub(crate) database: Database,
    pub(crate) settings: PostSettings,
    pending_posts: PendingPostCache,
    pub(crate) channels: ExpiringCache<ChannelRecord>,
    pub(crate) last_post_times: ExpiringCache<i64>,
    pub(crate) effects: PostEffects,
}

impl PostService {
    pub fn new(database: Database, settings: PostSettings, effects: PostEffects) -> Self {
        Self {
            database,
            settings,
            pending_posts: pending_post_cache(),
            channels: ExpiringCache::new(CHANNEL_CACHE_SIZE, CHANNEL_CACHE_TTL),
            last_post_times: ExpiringCache::new(LAST_POST_TIME_CACHE_SIZE, LAST_POST_TIME_CACHE_TTL),
            effects,
        }
    }

    pub fn effects(&self) -> &PostEffects {
        &self.effects
    }

    pub fn settings(&self) -> &PostSettings {
        &self.settings
    }

    /// Runs a store call on the blocking pool and wraps its failure.
    pub(crate) async fn store<T, F>(&self, operation: &'static str, id: &'static str, f: F) -> PostResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SqliteRepositories<'_>) -> anyhow::Result<T> + Send + 'static,
    {
        let database = self.database.clone();
        tokio::task::spawn_blocking(move || database.with_repositories(f))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|result| result)
            .map_err(PostError::internal(operation, id))
    }

    pub(crate) async fn get_channel(&self, channel_id: &str) -> PostResult<Option<ChannelRecord>> {
        if let Some(channel) = self.channels.get(channel_id) {
            return Ok(Some(channel));
        }
        let id = channel_id.to_string();
        let channel = self
            .store("getChannel", "app.channel.get.find.app_error", move |repos| {
                repos.channels().get(&id)
            })
            .await?;
        if let Some(channel) = &channel {
            self.channels.add_with_expiry(&channel.id, channel.clone());
        }
        Ok(channel)
    }

    fn invalidate_post_caches(&self, channel_id: &str) {
        self.last_post_times.remove(channel_id);
    }

    /// Creates a post in `channel`. A repeated pending post id either
    /// replays the stored post or reports that the first attempt is still
    /// running.
    pub async fn create_post(
        &self,
        post: Post,
        channel: ChannelRecord,
        trigger_webhooks: bool,
    ) -> PostResult<Post> {
        let guard = match self.pending_posts.claim(post.pending_id()) {
            PendingClaim::Unclaimed => None,
            PendingClaim::Owner(guard) => Some(guard),
            PendingClaim::InFlight => {
                tracing::debug!(pending_post_id = ?post.pending_id(), "create already in flight");
                return Err(PostError::Pending);
            }
            PendingClaim::Created(post_id) => return self.replay_created(&post_id).await,
        };

        let (post, user) = self.commit_post(post, &channel, guard).await?;
        let client_post = post.prepare_for_client();

        let fire_webhooks = trigger_webhooks && self.settings.enable_outgoing_webhooks;
        self.effects
            .post_published(post.clone(), channel.clone(), fire_webhooks);
        if channel.channel_type == ChannelType::Direct && !post.is_system_message() && !user.is_bot {
            let service = self.clone();
            self.effects.tasks().spawn("auto_responder", async move {
                service.send_auto_response(&post, channel).await
            });
        }

        Ok(client_post)
    }

    /// Validates, saves and announces one post. Everything a stored post
    /// needs happens here; webhooks and auto-replies are left to callers.
    async fn commit_post(
        &self,
        post: Post,
        channel: &ChannelRecord,
        guard: Option<PendingPostGuard>,
    ) -> PostResult<(Post, UserRecord)> {
        let mut post = post;
        post.sanitize_props();

        let root_id = post.root().map(str::to_string);
        let user_id = post.user_id.clone();
        let thread_fetch = async {
            match root_id {
                Some(root_id) => Some(
                    self.store("createPost", "api.post.create_post.root_id", move |repos| {
                        repos.posts().get_thread(&root_id)
                    })
                    .await,
                ),
                None => None,
            }
        };
        let user_fetch = self.store("createPost", "api.post.create_post.user.app_error", move |repos| {
            repos.users().get(&user_id)
        });
        let (thread, user) = tokio::join!(thread_fetch, user_fetch);

        let user = user?.ok_or_else(|| {
            PostError::not_found("api.post.create_post.user_not_found", post.user_id.clone())
        })?;
        if user.is_bot {
            post.add_prop(PROP_FROM_BOT, "true");
        }

        if self.settings.town_square_read_only
            && !post.is_system_message()
            && channel.name == DEFAULT_CHANNEL
            && !user.has_role(ROLE_SYSTEM_ADMIN)
        {
            return Err(PostError::Forbidden {
                id: TOWN_SQUARE_READ_ONLY,
            });
        }

        match thread {
            None => {}
            Some(Err(err)) => {
                tracing::debug!(error = %err, "root post lookup failed");
                return Err(PostError::bad_request_with(
                    "api.post.create_post.root_id",
                    post.root().unwrap_or_default().to_string(),
                ));
            }
            Some(Ok(thread)) => check_thread(&mut post, &thread)?,
        }

        let now = now_millis();
        if post.id.is_empty() {
            post.id = new_id();
        }
        if post.create_at == 0 {
            post.create_at = now;
        }
        post.update_at = post.create_at;
        fill_hashtags(&mut post);
        validate_post(&post)?;
        let mentions = self.fill_channel_mentions(&mut post, channel).await?;
        migrate_attachments(&mut post);

        let ctx = HookContext::new(Some(&post.user_id));
        let mut post = match self.effects.plugins().run_will_be_posted(&ctx, post) {
            ChainResult::Accepted(post) => post,
            ChainResult::Rejected(reason) if reason == DISMISS_POST_ERROR => {
                return Err(PostError::Dismissed)
            }
            ChainResult::Rejected(reason) => return Err(PostError::Rejected { reason }),
        };

        let to_save = post.clone();
        self.store("createPost", "api.post.create_post.save.app_error", move |repos| {
            repos.posts().save(&to_save)
        })
        .await?;
        if let Some(guard) = guard {
            guard.complete(&post.id);
        }
        tracing::debug!(post_id = %post.id, channel_id = %post.channel_id, "saved post");

        self.effects
            .post_created(ctx, post.clone(), channel.team_id.clone());

        if !post.file_ids.is_empty() {
            let attached = self.effects.attach_files(&post).await;
            if attached != post.file_ids {
                post.file_ids = attached;
                let to_save = post.clone();
                if let Err(err) = self
                    .store("createPost", "api.post.create_post.attach_files.app_error", move |repos| {
                        repos.posts().overwrite(&to_save)
                    })
                    .await
                {
                    tracing::warn!(post_id = %post.id, error = %err, "failed to trim unattached files");
                }
            }
        }

        self.invalidate_post_caches(&post.channel_id);
        self.effects.publish(
            EventEnvelope::for_channel(EventKind::Posted, post.prepare_for_client()).with_mentions(mentions),
        );
        Ok((post, user))
    }

    /// Replies on behalf of the other member of a direct channel when they
    /// have an auto-responder switched on.
    async fn send_auto_response(&self, post: &Post, channel: ChannelRecord) -> anyhow::Result<()> {
        let channel_id = channel.id.clone();
        let sender_id = post.user_id.clone();
        let receiver = self
            .store("sendAutoResponse", "app.user.send_auto_response.app_error", move |repos| {
                let members = repos.channels().member_ids(&channel_id)?;
                let Some(receiver_id) = members.into_iter().find(|id| *id != sender_id) else {
                    return Ok(None);
                };
                repos.users().get(&receiver_id)
            })
            .await?;
        let Some(receiver) = receiver else {
            return Ok(());
        };
        if channel.name != direct_channel_name(&post.user_id, &receiver.id) {
            return Ok(());
        }
        let message = match receiver.auto_responder_message.as_deref() {
            Some(message) if receiver.auto_responder_active && !message.trim().is_empty() => message,
            _ => return Ok(()),
        };

        let reply = Post {
            channel_id: channel.id.clone(),
            user_id: receiver.id.clone(),
            root_id: Some(post.root().unwrap_or(&post.id).to_string()),
            message: message.to_string(),
            post_type: POST_AUTO_RESPONDER.to_string(),
            ..Default::default()
        };
        let (reply, _) = self.commit_post(reply, &channel, None).await?;
        tracing::debug!(post_id = %reply.id, channel_id = %channel.id, "sent auto response");
        Ok(())
    }

    async fn replay_created(&self, post_id: &str) -> PostResult<Post> {
        let id = post_id.to_string();
        let post = self
            .store(
                "createPost",
                "api.post.deduplicate_create_post.failed_to_get",
                move |repos| repos.posts().get(&id),
            )
            .await?
            .ok_or_else(|| PostError::Internal {
                operation: "createPost",
                id: "api.post.deduplicate_create_post.failed_to_get",
                source: anyhow!("post {post_id} recorded for a pending id is missing"),
            })?;
        tracing::debug!(post_id, "replayed deduplicated create");
        Ok(post.prepare_for_client())
    }

    async fn fill_channel_mentions(
        &self,
        post: &mut Post,
        channel: &ChannelRecord,
    ) -> PostResult<HashMap<String, String>> {
        let names = post.channel_mentions();
        if names.is_empty() || channel.team_id.is_empty() {
            return Ok(apply_channel_mentions(post, &[]));
        }
        let team_id = channel.team_id.clone();
        let candidates = self
            .store("fillInPostProps", "api.post.fill_in_post_props.channel_mentions", move |repos| {
                repos.channels().get_by_names(&team_id, &names)
            })
            .await?;
        Ok(apply_channel_mentions(post, &candidates))
    }

    /// Entry point for posts authored through the API by a signed-in user.
    pub async fn create_post_as_user(&self, post: Post) -> PostResult<Post> {
        let channel = self.get_channel(&post.channel_id).await?.ok_or_else(|| {
            PostError::not_found("api.post.create_post.channel_not_found", post.channel_id.clone())
        })?;
        if post.is_system_message() {
            return Err(PostError::bad_request_with(
                "api.context.invalid_param.app_error",
                "post.type",
            ));
        }
        if channel.is_deleted() {
            return Err(PostError::bad_request(
                "api.post.create_post.can_not_post_to_deleted.error",
            ));
        }

        let user_id = post.user_id.clone();
        let from_webhook = post.props.contains_key(PROP_FROM_WEBHOOK);
        let template = Post {
            channel_id: post.channel_id.clone(),
            root_id: post.root_id.clone(),
            parent_id: post.parent_id.clone(),
            ..Default::default()
        };

        let created = match self.create_post(post, channel.clone(), true).await {
            Ok(created) => created,
            Err(PostError::Forbidden { id }) if id == TOWN_SQUARE_READ_ONLY => {
                self.send_read_only_notice(&user_id, template).await;
                return Err(PostError::Forbidden { id });
            }
            Err(err) => return Err(err),
        };

        if !from_webhook {
            let channel_id = channel.id.clone();
            let viewer = user_id.clone();
            let now = now_millis();
            if let Err(err) = self
                .store("createPostAsUser", "api.post.create_post_as_user.mark_viewed", move |repos| {
                    repos.channels().mark_viewed(&[channel_id], &viewer, now)
                })
                .await
            {
                tracing::warn!(channel_id = %channel.id, user_id = %user_id, error = %err, "failed to mark channel viewed");
            }
        }
        Ok(created)
    }

    async fn send_read_only_notice(&self, user_id: &str, template: Post) {
        let id = user_id.to_string();
        let locale = match self
            .store("createPostAsUser", "api.post.create_post_as_user.locale", move |repos| {
                repos.users().get(&id)
            })
            .await
        {
            Ok(Some(UserRecord { locale, .. })) => locale,
            _ => String::new(),
        };
        let notice = Post {
            user_id: user_id.to_string(),
            message: read_only_notice(&locale).to_string(),
            create_at: now_millis() + 1,
            ..template
        };
        self.send_ephemeral_post(user_id, notice);
    }

    pub async fn create_post_missing_channel(&self, post: Post, trigger_webhooks: bool) -> PostResult<Post> {
        let channel = self.get_channel(&post.channel_id).await?.ok_or_else(|| {
            PostError::not_found("api.post.create_post.channel_not_found", post.channel_id.clone())
        })?;
        self.create_post(post, channel, trigger_webhooks).await
    }

    /// Shows a post to one user without storing it.
    pub fn send_ephemeral_post(&self, user_id: &str, mut post: Post) -> Post {
        post.post_type = POST_EPHEMERAL.to_string();
        if post.id.is_empty() {
            post.id = new_id();
        }
        if post.create_at == 0 {
            post.create_at = now_millis();
        }
        post.update_at = post.create_at;
        let client_post = post.prepare_for_client();
        self.effects.publish(EventEnvelope::for_user(
            EventKind::EphemeralMessage,
            user_id,
            client_post.clone(),
        ));
        client_post
    }

    pub fn update_ephemeral_post(&self, user_id: &str, mut post: Post) -> Post {
        post.post_type = POST_EPHEMERAL.to_string();
        post.update_at = now_millis();
        let client_post = post.prepare_for_client();
        self.effects.publish(EventEnvelope::for_user(
            EventKind::PostEdited,
            user_id,
            client_post.clone(),
        ));
        client_post
    }

    pub fn delete_ephemeral_post(&self, user_id: &str, mut post: Post) -> Post {
        let now = now_millis();
        post.post_type = POST_EPHEMERAL.to_string();
        post.delete_at = now;
        post.update_at = now;
        let client_post = post.prepare_for_client();
        self.effects.publish(EventEnvelope::for_user(
            EventKind::PostDeleted,
            user_id,
            client_post.clone(),
        ));
        client_post
    }

    /// Applies `post` onto the stored version. With `safe_update` only the
    /// message may change; pin, reaction, file and prop fields stay as stored.
    pub async fn update_post(&self, post: Post, safe_update: bool) -> PostResult<Post> {
        let mut post = post;
        post.sanitize_props();

        let id = post.id.clone();
        let old = self
            .store("updatePost", "api.post.update_post.find.app_error", move |repos| {
                repos.posts().get(&id)
            })
            .await?
            .ok_or_else(|| PostError::not_found("api.post.update_post.find.app_error", post.id.clone()))?;

        if old.delete_at != 0 {
            return Err(PostError::bad_request_with(
                "api.post.update_post.permissions_details.app_error",
                format!("already deleted id={}", old.id),
            ));
        }
        if old.is_system_message() {
            return Err(PostError::bad_request("api.post.update_post.system_message.app_error"));
        }
        let channel = self.get_channel(&old.channel_id).await?.ok_or_else(|| {
            PostError::not_found("api.post.update_post.channel_not_found", old.channel_id.clone())
        })?;
        if channel.is_deleted() {
            return Err(PostError::bad_request(
                "api.post.update_post.can_not_update_post_in_deleted.error",
            ));
        }

        let now = now_millis();
        let mut new = old.clone();
        if new.message != post.message {
            check_edit_window(&old, now, self.settings.edit_time_limit_secs)?;
            new.message = post.message.clone();
            new.edit_at = now;
            fill_hashtags(&mut new);
        }
        if !safe_update {
            new.is_pinned = post.is_pinned;
            new.has_reactions = post.has_reactions;
            new.file_ids = post.file_ids.clone();
            new.props = post.props.clone();
        }
        if new.edit_at == old.edit_at && (new.file_ids != old.file_ids || !new.attachments_equal(&old)) {
            new.edit_at = now;
        }

        validate_post(&new)?;
        self.fill_channel_mentions(&mut new, &channel).await?;
        migrate_attachments(&mut new);

        let ctx = HookContext::new(Some(&old.user_id));
        let mut new = match self.effects.plugins().run_will_be_updated(&ctx, new, &old) {
            ChainResult::Accepted(new) => new,
            ChainResult::Rejected(reason) => return Err(PostError::Rejected { reason }),
        };
        new.update_at = now.max(old.update_at + 1);

        let (to_write, previous) = (new.clone(), old.clone());
        let swapped = self
            .store("updatePost", "api.post.update_post.app_error", move |repos| {
                repos.posts().update(&to_write, &previous)
            })
            .await?;
        if !swapped {
            return Err(PostError::Internal {
                operation: "updatePost",
                id: "api.post.update_post.app_error",
                source: anyhow!("post {} changed while it was being updated", old.id),
            });
        }
        tracing::debug!(post_id = %new.id, "updated post");

        self.effects
            .post_updated(ctx, new.clone(), old, channel.team_id.clone());

        let client_post = new.prepare_for_client();
        self.effects
            .publish(EventEnvelope::for_channel(EventKind::PostEdited, client_post.clone()));
        self.invalidate_post_caches(&new.channel_id);
        Ok(client_post)
    }

    pub async fn patch_post(&self, post_id: &str, patch: PostPatch) -> PostResult<Post> {
        let id = post_id.to_string();
        let stored = self
            .store("patchPost", "api.post.patch_post.find.app_error", move |repos| {
                repos.posts().get(&id)
            })
            .await?
            .filter(|post| post.delete_at == 0)
            .ok_or_else(|| PostError::not_found("app.post.get.app_error", post_id))?;

        let channel = self.get_channel(&stored.channel_id).await?.ok_or_else(|| {
            PostError::not_found("api.post.patch_post.channel_not_found", stored.channel_id.clone())
        })?;
        if channel.is_deleted() {
            return Err(PostError::bad_request(
                "api.post.patch_post.can_not_update_post_in_deleted.error",
            ));
        }

        let mut post = stored;
        post.apply_patch(&patch);
        self.update_post(post, false).await
    }

    /// Soft-deletes a post and its replies. Cleanup of files, flags and the
    /// index follows in the background and cannot fail the delete.
    pub async fn delete_post(&self, post_id: &str, deleted_by: &str) -> PostResult<Post> {
        let id = post_id.to_string();
        let mut post = self
            .store("deletePost", "app.post.get.app_error", move |repos| repos.posts().get(&id))
            .await?
            .filter(|post| post.delete_at == 0)
            .ok_or_else(|| PostError::not_found("app.post.get.app_error", post_id))?;

        let channel = self.get_channel(&post.channel_id).await?.ok_or_else(|| {
            PostError::not_found("api.post.delete_post.channel_not_found", post.channel_id.clone())
        })?;
        if channel.is_deleted() {
            return Err(PostError::bad_request(
                "api.post.delete_post.can_not_delete_post_in_deleted.error",
            ));
        }

        let now = now_millis();
        let (id, by) = (post.id.clone(), deleted_by.to_string());
        self.store("deletePost", "api.post.delete_post.app_error", move |repos| {
            repos.posts().delete(&id, now, &by)
        })
        .await?;
        post.delete_at = now;
        post.update_at = now;
        post.add_prop(PROP_DELETE_BY, deleted_by);
        tracing::debug!(post_id = %post.id, deleted_by, "deleted post");

        let client_post = post.prepare_for_client();
        self.effects
            .publish(EventEnvelope::for_channel(EventKind::PostDeleted, client_post.clone()));
        self.effects.post_deleted(&post, now);
        self.invalidate_post_caches(&post.channel_id);
        Ok(client_post)
    }

    /// Live posts of the thread `post_id` belongs to.
    pub async fn get_post_thread(&self, post_id: &str) -> PostResult<PostList> {
        let id = post_id.to_string();
        let list = self
            .store("getPostThread", "app.post.get.app_error", move |repos| {
                repos.posts().get_thread(&id)
            })
            .await?;
        if list.is_empty() {
            return Err(PostError::not_found("app.post.get.app_error", post_id));
        }
        Ok(list)
    }
}
