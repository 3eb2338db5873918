mod events;
mod posts;
mod search;

use crate::config::PostlineConfig;
use crate::error::{ErrorKind, PostError};
use crate::posting::PostService;
use crate::realtime::EventHub;
use crate::search::SearchService;
use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Header naming the acting user. Authentication happens in front of this
/// service.
pub const USER_ID_HEADER: &str = "x-user-id";

const DEFAULT_MAX_BODY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: PostlineConfig,
    pub posts: PostService,
    pub search: SearchService,
    pub hub: EventHub,
}

pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Post(PostError),
}

impl ApiError {
    fn into_response_parts(self) -> (StatusCode, ErrorResponse) {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    id: "api.context.invalid_param.app_error".into(),
                    message,
                    retryable: false,
                },
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    id: "api.context.session_expired.app_error".into(),
                    message: format!("missing {USER_ID_HEADER} header"),
                    retryable: false,
                },
            ),
            ApiError::Post(err) => {
                let status = status_for(err.kind());
                if let PostError::Internal { operation, .. } = &err {
                    tracing::error!(operation, error = ?err, "internal server error");
                }
                (
                    status,
                    ErrorResponse {
                        id: err.id().to_string(),
                        message: err.client_message(),
                        retryable: err.is_retryable(),
                    },
                )
            }
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Retryable => StatusCode::CONFLICT,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_response_parts();
        (status, Json(body)).into_response()
    }
}

impl From<PostError> for ApiError {
    fn from(err: PostError) -> Self {
        ApiError::Post(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    id: String,
    message: String,
    retryable: bool,
}

pub(crate) fn request_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    api_port: u16,
    max_post_size: usize,
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        api_port: state.config.api_port,
        max_post_size: state.posts.max_post_size(),
    })
}

pub fn router(state: AppState) -> Router {
    let max_body_bytes = state
        .config
        .max_upload_bytes
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);
    Router::new()
        .route("/health", get(health_handler))
        .route("/events", get(events::stream_events))
        .route("/posts", post(posts::create_post))
        .route("/posts/ephemeral", post(posts::create_ephemeral_post))
        .route(
            "/posts/:id",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/posts/:id/patch", put(posts::patch_post))
        .route("/posts/:id/thread", get(posts::get_post_thread))
        .route("/posts/:id/permalink", get(posts::get_permalink_post))
        .route("/channels/:id/posts", get(posts::get_posts_for_channel))
        .route(
            "/users/:user_id/channels/:channel_id/posts/unread",
            get(posts::get_posts_around_last_unread),
        )
        .route("/users/:user_id/posts/flagged", get(posts::get_flagged_posts))
        .route("/teams/:team_id/posts/search", post(search::search_posts))
        .layer(DefaultBodyLimit::max(max_body_bytes as usize))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Tries to bind to the given port, or finds the next available port
async fn find_available_port(start_port: u16) -> Result<(TcpListener, u16)> {
    const MAX_PORT_ATTEMPTS: u16 = 100;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port.saturating_add(offset);
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok((listener, port)),
            Err(err) => {
                if offset == 0 {
                    tracing::debug!(port, error = %err, "port in use, trying next port");
                }
            }
        }
    }

    anyhow::bail!(
        "could not find an available port in range {}-{}",
        start_port,
        start_port.saturating_add(MAX_PORT_ATTEMPTS - 1)
    )
}

pub async fn serve_http(state: AppState) -> Result<()> {
    let requested_port = state.config.api_port;
    let router = router(state);

    let (listener, actual_port) = find_available_port(requested_port).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], actual_port));
    if actual_port != requested_port {
        tracing::warn!(
            requested_port,
            actual_port,
            "configured port was in use, bound to next available port"
        );
    }

    tracing::info!(?addr, "HTTP server listening");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_statuses() {
        let (status, body) = ApiError::Post(PostError::Pending).into_response_parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.retryable);

        let (status, body) =
            ApiError::Post(PostError::internal("createPost", "x.y")(anyhow::anyhow!("disk"))).into_response_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "internal server error");

        let (status, _) = ApiError::Post(PostError::NotImplemented { id: "a.b" }).into_response_parts();
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn user_header_is_required() {
        let mut headers = HeaderMap::new();
        assert!(matches!(request_user(&headers), Err(ApiError::Unauthorized)));
        headers.insert(USER_ID_HEADER, " u1 ".parse().unwrap());
        assert_eq!(request_user(&headers).unwrap(), "u1");
    }
}
