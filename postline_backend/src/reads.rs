use crate::database::models::{ChannelMemberRecord, ChannelType};
use crate::database::repositories::{ChannelRepository, PostRepository};
use crate::enrich::MAX_POST_SIZE;
use crate::error::{PostError, PostResult};
use crate::model::{Post, PostList};
use crate::posting::PostService;
use crate::utils::now_millis;

/// Paging cursor for channel listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostsOptions {
    pub channel_id: String,
    pub post_id: String,
    pub page: usize,
    pub per_page: usize,
}

impl PostsOptions {
    pub fn new(channel_id: &str, post_id: &str, page: usize, per_page: usize) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            post_id: post_id.to_string(),
            page,
            per_page,
        }
    }

    fn offset(&self) -> usize {
        self.page.saturating_mul(self.per_page)
    }
}

impl PostService {
    pub async fn get_single_post(&self, post_id: &str) -> PostResult<Post> {
        let id = post_id.to_string();
        self.store("getSinglePost", "app.post.get.app_error", move |repos| {
            repos.posts().get(&id)
        })
        .await?
        .filter(|post| post.delete_at == 0)
        .map(|post| post.prepare_for_client())
        .ok_or_else(|| PostError::not_found("app.post.get.app_error", post_id))
    }

    pub async fn get_posts_page(&self, channel_id: &str, page: usize, per_page: usize) -> PostResult<PostList> {
        self.get_posts(channel_id, page.saturating_mul(per_page), per_page).await
    }

    pub async fn get_posts(&self, channel_id: &str, offset: usize, limit: usize) -> PostResult<PostList> {
        let channel_id = channel_id.to_string();
        self.store("getPosts", "app.post.get_posts.app_error", move |repos| {
            repos.posts().list_for_channel(&channel_id, offset, limit)
        })
        .await
    }

    /// Everything touched after `since`, deleted posts included, so clients
    /// can reconcile.
    pub async fn get_posts_since(&self, channel_id: &str, since: i64) -> PostResult<PostList> {
        let channel_id = channel_id.to_string();
        self.store("getPostsSince", "app.post.get_posts_since.app_error", move |repos| {
            repos.posts().list_since(&channel_id, since)
        })
        .await
    }

    pub async fn get_posts_etag(&self, channel_id: &str) -> PostResult<String> {
        let last_update_at = match self.last_post_times.get(channel_id) {
            Some(at) => at,
            None => {
                let id = channel_id.to_string();
                let at = self
                    .store("getPostsEtag", "app.post.get_etag.app_error", move |repos| {
                        repos.posts().last_update_at(&id)
                    })
                    .await?;
                self.last_post_times.add_with_expiry(channel_id, at);
                at
            }
        };
        Ok(format!("{}.{}", env!("CARGO_PKG_VERSION"), last_update_at))
    }

    pub async fn get_posts_before_post(&self, options: &PostsOptions) -> PostResult<PostList> {
        let (channel_id, post_id) = (options.channel_id.clone(), options.post_id.clone());
        let (offset, limit) = (options.offset(), options.per_page);
        self.store("getPostsBeforePost", "app.post.get_posts_around.get.app_error", move |repos| {
            repos.posts().list_before(&channel_id, &post_id, offset, limit)
        })
        .await
    }

    pub async fn get_posts_after_post(&self, options: &PostsOptions) -> PostResult<PostList> {
        let (channel_id, post_id) = (options.channel_id.clone(), options.post_id.clone());
        let (offset, limit) = (options.offset(), options.per_page);
        self.store("getPostsAfterPost", "app.post.get_posts_around.get.app_error", move |repos| {
            repos.posts().list_after(&channel_id, &post_id, offset, limit)
        })
        .await
    }

    pub async fn get_posts_around_post(&self, before: bool, options: &PostsOptions) -> PostResult<PostList> {
        if before {
            self.get_posts_before_post(options).await
        } else {
            self.get_posts_after_post(options).await
        }
    }

    /// Oldest post created after `time`, if any.
    pub async fn get_post_id_after_time(&self, channel_id: &str, time: i64) -> PostResult<Option<String>> {
        let channel_id = channel_id.to_string();
        self.store("getPostIdAfterTime", "app.post.get_post_id_around.app_error", move |repos| {
            repos.posts().id_after_time(&channel_id, time)
        })
        .await
    }

    /// Newest post created before `time`, if any.
    pub async fn get_post_id_before_time(&self, channel_id: &str, time: i64) -> PostResult<Option<String>> {
        let channel_id = channel_id.to_string();
        self.store("getPostIdBeforeTime", "app.post.get_post_id_around.app_error", move |repos| {
            repos.posts().id_before_time(&channel_id, time)
        })
        .await
    }

    pub async fn get_next_post_id_from_post_list(&self, list: &PostList) -> Option<String> {
        let first = list.first()?;
        match self.get_post_id_after_time(&first.channel_id, first.create_at).await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(post_id = %first.id, error = %err, "unable to find the next post id");
                None
            }
        }
    }

    pub async fn get_prev_post_id_from_post_list(&self, list: &PostList) -> Option<String> {
        let last = list.last()?;
        match self.get_post_id_before_time(&last.channel_id, last.create_at).await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(post_id = %last.id, error = %err, "unable to find the previous post id");
                None
            }
        }
    }

    /// Fills the next/previous cursors of a page. A `since` query never has
    /// cursors; the first page around a post points back at that post; a
    /// short page ends the walk in its direction.
    pub async fn add_cursor_ids_for_post_list(
        &self,
        list: &mut PostList,
        after_post: &str,
        before_post: &str,
        since: i64,
        page: usize,
        per_page: usize,
    ) {
        let mut next: Option<Option<String>> = None;
        let mut prev: Option<Option<String>> = None;

        if since > 0 {
            next = Some(None);
            prev = Some(None);
        } else if !after_post.is_empty() {
            if page == 0 {
                prev = Some(Some(after_post.to_string()));
            }
            if list.len() < per_page {
                next = Some(None);
            }
        } else if !before_post.is_empty() {
            if page == 0 {
                next = Some(Some(before_post.to_string()));
            }
            if list.len() < per_page {
                prev = Some(None);
            }
        }

        let next = match next {
            Some(next) => next,
            None => self.get_next_post_id_from_post_list(list).await,
        };
        let prev = match prev {
            Some(prev) => prev,
            None => self.get_prev_post_id_from_post_list(list).await,
        };
        list.next_post_id = next;
        list.prev_post_id = prev;
    }

    /// The first unread post, its thread, and up to `limit_before` older and
    /// `limit_after - 1` newer posts around it.
    pub async fn get_posts_for_channel_around_last_unread(
        &self,
        channel_id: &str,
        user_id: &str,
        limit_before: usize,
        limit_after: usize,
    ) -> PostResult<PostList> {
        let (cid, uid) = (channel_id.to_string(), user_id.to_string());
        let member = self
            .store("getPostsForChannelAroundLastUnread", "app.channel.get_member.app_error", move |repos| {
                repos.channels().get_member(&cid, &uid)
            })
            .await?
            .ok_or_else(|| {
                PostError::not_found("app.channel.get_member.missing.app_error", format!("{channel_id}/{user_id}"))
            })?;
        if member.last_viewed_at == 0 {
            return Ok(PostList::new());
        }

        let Some(unread_id) = self.get_post_id_after_time(channel_id, member.last_viewed_at).await? else {
            return self.get_posts_page(channel_id, 0, limit_before).await;
        };

        let mut list = self.get_post_thread(&unread_id).await?;
        list.order = vec![unread_id.clone()];

        let before = self
            .get_posts_before_post(&PostsOptions::new(channel_id, &unread_id, 0, limit_before))
            .await?;
        let after = self
            .get_posts_after_post(&PostsOptions::new(
                channel_id,
                &unread_id,
                0,
                limit_after.saturating_sub(1),
            ))
            .await?;
        for post in before.ordered().chain(after.ordered()) {
            if !list.order.contains(&post.id) {
                list.add_order(post.id.clone());
            }
            list.add_post(post.clone());
        }
        list.sort_by_create_at();
        Ok(list)
    }

    pub async fn get_flagged_posts(&self, user_id: &str, offset: usize, limit: usize) -> PostResult<PostList> {
        self.flagged(user_id, None, None, offset, limit).await
    }

    pub async fn get_flagged_posts_in_team(
        &self,
        user_id: &str,
        team_id: &str,
        offset: usize,
        limit: usize,
    ) -> PostResult<PostList> {
        self.flagged(user_id, Some(team_id), None, offset, limit).await
    }

    pub async fn get_flagged_posts_in_channel(
        &self,
        user_id: &str,
        channel_id: &str,
        offset: usize,
        limit: usize,
    ) -> PostResult<PostList> {
        self.flagged(user_id, None, Some(channel_id), offset, limit).await
    }

    async fn flagged(
        &self,
        user_id: &str,
        team_id: Option<&str>,
        channel_id: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> PostResult<PostList> {
        let user_id = user_id.to_string();
        let team_id = team_id.map(str::to_string);
        let channel_id = channel_id.map(str::to_string);
        self.store("getFlaggedPosts", "app.post.get_flagged_posts.app_error", move |repos| {
            repos
                .posts()
                .flagged(&user_id, team_id.as_deref(), channel_id.as_deref(), offset, limit)
        })
        .await
    }

    /// Resolves a permalink to its thread, joining `user_id` to the channel
    /// when it is open. Private channels require an existing membership.
    pub async fn get_permalink_post(&self, post_id: &str, user_id: &str) -> PostResult<PostList> {
        let mut list = self
            .get_post_thread(post_id)
            .await
            .map_err(|_| PostError::not_found("api.post_get_post_by_id.get.app_error", post_id))?;
        list.order = vec![post_id.to_string()];
        let Some(post) = list.posts.get(post_id) else {
            return Err(PostError::not_found("api.post_get_post_by_id.get.app_error", post_id));
        };

        let channel = self.get_channel(&post.channel_id).await?.ok_or_else(|| {
            PostError::not_found("app.channel.get.existing.app_error", post.channel_id.clone())
        })?;
        let (cid, uid) = (channel.id.clone(), user_id.to_string());
        let member = self
            .store("getPermalinkPost", "app.channel.get_member.app_error", move |repos| {
                repos.channels().get_member(&cid, &uid)
            })
            .await?;
        if member.is_none() {
            if channel.channel_type != ChannelType::Open || channel.is_deleted() {
                return Err(PostError::Forbidden {
                    id: "api.post.get_permalink_post.not_member",
                });
            }
            let record = ChannelMemberRecord {
                channel_id: channel.id.clone(),
                user_id: user_id.to_string(),
                last_viewed_at: now_millis(),
            };
            self.store("getPermalinkPost", "api.channel.join_channel.post_and_forget", move |repos| {
                repos.channels().save_member(&record)
            })
            .await?;
            tracing::info!(channel_id = %channel.id, user_id, "joined channel through permalink");
        }
        Ok(list)
    }

    pub async fn is_channel_member(&self, channel_id: &str, user_id: &str) -> PostResult<bool> {
        let (cid, uid) = (channel_id.to_string(), user_id.to_string());
        let member = self
            .store("isChannelMember", "app.channel.get_member.app_error", move |repos| {
                repos.channels().get_member(&cid, &uid)
            })
            .await?;
        Ok(member.is_some())
    }

    pub fn max_post_size(&self) -> usize {
        MAX_POST_SIZE
    }
}
