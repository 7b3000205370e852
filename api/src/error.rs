/// Error taxonomy for backend calls.
///
/// One-shot actions surface these synchronously to the operator; the poll
/// scheduler treats everything here as non-fatal for future ticks.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// Invalid identity or capability key, or a stale group secret.
    #[error("unauthorized: {0}")]
    Auth(String),

    /// The backend rejected a group/shard configuration. The body is
    /// surfaced verbatim to the operator.
    #[error("rejected by the backend: {0}")]
    Validation(String),

    /// Any other non-success response.
    #[error("backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Whether a poll failure with this error is worth retrying within the
    /// same tick. Auth and validation failures will not heal on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Auth(_) | ApiError::Validation(_) => false,
            ApiError::Backend { status, .. } => *status >= 500,
            ApiError::Transport(_) => true,
        }
    }

    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        match status {
            401 => ApiError::Auth(body),
            422 => ApiError::Validation(body),
            _ => ApiError::Backend { status, body },
        }
    }
}
