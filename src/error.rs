use thiserror::Error;
use warp::http::StatusCode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("storage did not respond in time")]
    StorageTimeout,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ChatError::StorageTimeout => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl warp::reject::Reject for ChatError {}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_server_statuses() {
        assert_eq!(
            ChatError::Storage("disk".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ChatError::StorageTimeout.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ChatError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }
}
