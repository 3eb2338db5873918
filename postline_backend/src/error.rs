//! Error taxonomy shared by the write pipeline and the search aggregator.
//!
//! Every variant carries a stable dotted id so clients can branch on it
//! without parsing messages. Store failures arrive as `anyhow::Error` and are
//! wrapped into [`PostError::Internal`] together with the operation name.

use thiserror::Error;

pub type PostResult<T> = Result<T, PostError>;

#[derive(Debug, Error)]
pub enum PostError {
    #[error("{id}{}", detail_suffix(.detail))]
    BadRequest {
        id: &'static str,
        detail: Option<String>,
    },
    #[error("{id}")]
    Forbidden { id: &'static str },
    #[error("{id}{}", detail_suffix(.detail))]
    NotFound {
        id: &'static str,
        detail: Option<String>,
    },
    /// Another request holding the same pending post id is still saving.
    /// Resending the identical request is safe.
    #[error("api.post.deduplicate_create_post.pending")]
    Pending,
    #[error("Post rejected by plugin. {reason}")]
    Rejected { reason: String },
    /// A plugin asked for the post to be dropped without explanation.
    #[error("plugin.message_will_be_posted.dismiss_post")]
    Dismissed,
    #[error("{id}")]
    NotImplemented { id: &'static str },
    #[error("{operation}: {id}: {source:#}")]
    Internal {
        operation: &'static str,
        id: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl PostError {
    pub fn bad_request(id: &'static str) -> Self {
        PostError::BadRequest { id, detail: None }
    }

    pub fn bad_request_with(id: &'static str, detail: impl Into<String>) -> Self {
        PostError::BadRequest {
            id,
            detail: Some(detail.into()),
        }
    }

    pub fn not_found(id: &'static str, detail: impl Into<String>) -> Self {
        PostError::NotFound {
            id,
            detail: Some(detail.into()),
        }
    }

    /// Builds a mapper that wraps store failures for `map_err`.
    pub fn internal(
        operation: &'static str,
        id: &'static str,
    ) -> impl FnOnce(anyhow::Error) -> PostError {
        move |source| PostError::Internal {
            operation,
            id,
            source,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            PostError::BadRequest { id, .. }
            | PostError::Forbidden { id }
            | PostError::NotFound { id, .. }
            | PostError::NotImplemented { id }
            | PostError::Internal { id, .. } => id,
            PostError::Pending => "api.post.deduplicate_create_post.pending",
            PostError::Rejected { .. } => "plugin.message_will_be_posted.rejected",
            PostError::Dismissed => "plugin.message_will_be_posted.dismiss_post",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PostError::BadRequest { .. } | PostError::Rejected { .. } | PostError::Dismissed => {
                ErrorKind::BadRequest
            }
            PostError::Forbidden { .. } => ErrorKind::Forbidden,
            PostError::NotFound { .. } => ErrorKind::NotFound,
            PostError::Pending => ErrorKind::Retryable,
            PostError::NotImplemented { .. } => ErrorKind::NotImplemented,
            PostError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PostError::Pending)
    }

    /// Text that is safe to hand back to a client.
    pub fn client_message(&self) -> String {
        match self {
            PostError::Internal { .. } => "internal server error".to_string(),
            PostError::Dismissed => "post rejected".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    NotFound,
    Retryable,
    NotImplemented,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_retryable() {
        assert!(PostError::Pending.is_retryable());
        assert!(!PostError::bad_request("x").is_retryable());
        assert_eq!(PostError::Pending.kind(), ErrorKind::Retryable);
    }

    #[test]
    fn internal_errors_hide_their_source_from_clients() {
        let err = PostError::internal("createPost", "api.post.save.app_error")(anyhow::anyhow!(
            "disk full"
        ));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("disk full"));
        assert_eq!(err.client_message(), "internal server error");
    }

    #[test]
    fn rejection_carries_the_plugin_reason() {
        let err = PostError::Rejected {
            reason: "no swearing".into(),
        };
        assert_eq!(err.to_string(), "Post rejected by plugin. no swearing");
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(PostError::Dismissed.client_message(), "post rejected");
    }
}
