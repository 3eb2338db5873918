use super::{request_user, ApiError, ApiResult, AppState};
use crate::model::{Post, PostList, PostPatch};
use crate::reads::PostsOptions;
use axum::extract::{Path, Query, State};
use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

const DEFAULT_PER_PAGE: usize = 60;
const MAX_PER_PAGE: usize = 200;

fn clamp_per_page(per_page: Option<usize>) -> usize {
    per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
}

pub(crate) async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut post): Json<Post>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    post.user_id = request_user(&headers)?;
    let created = state.posts.create_post_as_user(post).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub(crate) struct EphemeralRequest {
    user_id: String,
    post: Post,
}

pub(crate) async fn create_ephemeral_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EphemeralRequest>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    let sender = request_user(&headers)?;
    if request.user_id.trim().is_empty() || request.post.channel_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id and post.channel_id are required".into()));
    }
    let post = Post {
        user_id: sender,
        ..request.post
    };
    let sent = state.posts.send_ephemeral_post(&request.user_id, post);
    Ok((StatusCode::CREATED, Json(sent)))
}

pub(crate) async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Post> {
    Ok(Json(state.posts.get_single_post(&id).await?))
}

pub(crate) async fn update_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(mut post): Json<Post>,
) -> ApiResult<Post> {
    request_user(&headers)?;
    if !post.id.is_empty() && post.id != id {
        return Err(ApiError::BadRequest("post id does not match the path".into()));
    }
    post.id = id;
    Ok(Json(state.posts.update_post(post, false).await?))
}

pub(crate) async fn patch_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<PostPatch>,
) -> ApiResult<Post> {
    request_user(&headers)?;
    Ok(Json(state.posts.patch_post(&id, patch).await?))
}

pub(crate) async fn delete_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Post> {
    let user_id = request_user(&headers)?;
    Ok(Json(state.posts.delete_post(&id, &user_id).await?))
}

pub(crate) async fn get_post_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PostList> {
    Ok(Json(state.posts.get_post_thread(&id).await?))
}

pub(crate) async fn get_permalink_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<PostList> {
    let user_id = request_user(&headers)?;
    Ok(Json(state.posts.get_permalink_post(&id, &user_id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelPostsParams {
    #[serde(default)]
    since: i64,
    #[serde(default)]
    before: String,
    #[serde(default)]
    after: String,
    #[serde(default)]
    page: usize,
    #[serde(default)]
    per_page: Option<usize>,
}

/// Channel history. `since` wins over `after`, which wins over `before`;
/// a plain page carries an etag.
pub(crate) async fn get_posts_for_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Query(params): Query<ChannelPostsParams>,
) -> Result<Response, ApiError> {
    let (page, per_page) = (params.page, clamp_per_page(params.per_page));
    let mut etag = None;

    let mut list = if params.since > 0 {
        state.posts.get_posts_since(&channel_id, params.since).await?
    } else if !params.after.is_empty() {
        let options = PostsOptions::new(&channel_id, &params.after, page, per_page);
        state.posts.get_posts_after_post(&options).await?
    } else if !params.before.is_empty() {
        let options = PostsOptions::new(&channel_id, &params.before, page, per_page);
        state.posts.get_posts_before_post(&options).await?
    } else {
        let tag = state.posts.get_posts_etag(&channel_id).await?;
        let matches = headers
            .get(IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == tag);
        if matches {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
        etag = Some(tag);
        state.posts.get_posts_page(&channel_id, page, per_page).await?
    };

    state
        .posts
        .add_cursor_ids_for_post_list(&mut list, &params.after, &params.before, params.since, page, per_page)
        .await;

    let mut response = Json(list).into_response();
    if let Some(value) = etag.and_then(|tag| HeaderValue::from_str(&tag).ok()) {
        response.headers_mut().insert(ETAG, value);
    }
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnreadParams {
    #[serde(default = "default_unread_limit")]
    limit_before: usize,
    #[serde(default = "default_unread_limit")]
    limit_after: usize,
}

fn default_unread_limit() -> usize {
    DEFAULT_PER_PAGE
}

pub(crate) async fn get_posts_around_last_unread(
    State(state): State<AppState>,
    Path((user_id, channel_id)): Path<(String, String)>,
    Query(params): Query<UnreadParams>,
) -> ApiResult<PostList> {
    let limit_before = params.limit_before.min(MAX_PER_PAGE);
    let limit_after = params.limit_after.clamp(1, MAX_PER_PAGE);
    let mut list = state
        .posts
        .get_posts_for_channel_around_last_unread(&channel_id, &user_id, limit_before, limit_after)
        .await?;
    list.next_post_id = state.posts.get_next_post_id_from_post_list(&list).await;
    list.prev_post_id = state.posts.get_prev_post_id_from_post_list(&list).await;
    Ok(Json(list))
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlaggedParams {
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    page: usize,
    #[serde(default)]
    per_page: Option<usize>,
}

pub(crate) async fn get_flagged_posts(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<FlaggedParams>,
) -> ApiResult<PostList> {
    let per_page = clamp_per_page(params.per_page);
    let offset = params.page.saturating_mul(per_page);
    let list = match (params.channel_id.as_deref(), params.team_id.as_deref()) {
        (Some(channel_id), _) => {
            state
                .posts
                .get_flagged_posts_in_channel(&user_id, channel_id, offset, per_page)
                .await?
        }
        (None, Some(team_id)) => {
            state
                .posts
                .get_flagged_posts_in_team(&user_id, team_id, offset, per_page)
                .await?
        }
        (None, None) => state.posts.get_flagged_posts(&user_id, offset, per_page).await?,
    };
    Ok(Json(list))
}
