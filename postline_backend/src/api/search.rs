use super::{request_user, ApiError, ApiResult, AppState};
use crate::model::PostSearchResults;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct SearchRequest {
    terms: String,
    #[serde(default)]
    is_or_search: bool,
    #[serde(default)]
    include_deleted_channels: bool,
    /// Seconds east of UTC.
    #[serde(default)]
    time_zone_offset: i64,
    #[serde(default)]
    page: usize,
    #[serde(default = "default_per_page")]
    per_page: usize,
}

pub(crate) fn default_per_page() -> usize {
    60
}

pub(crate) async fn search_posts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(team_id): Path<String>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<PostSearchResults> {
    let user_id = request_user(&headers)?;
    let terms = request.terms.trim();
    if terms.is_empty() {
        return Err(ApiError::BadRequest("terms must not be empty".into()));
    }
    let results = state
        .search
        .search_posts_in_team_for_user(
            terms,
            &user_id,
            &team_id,
            request.is_or_search,
            request.include_deleted_channels,
            request.time_zone_offset,
            request.page,
            request.per_page.clamp(1, 200),
        )
        .await?;
    Ok(Json(results))
}
