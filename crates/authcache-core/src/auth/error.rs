use thiserror::Error;

use super::storage::StorageError;
use crate::api::ApiError;

/// Shown when the server rejects a submission without saying why.
pub const GENERIC_REJECTION: &str = "Request rejected by server";

/// Errors surfaced by login and registration. Each one is recoverable; the
/// `Display` text is what ends up in the observable error state.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Unable to connect to server. Check your internet connection.")]
    Unreachable,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response from server")]
    MalformedResponse,

    #[error("Stored session is corrupt: {0}")]
    StorageCorrupt(String),

    #[error("Another sign-in is already in progress")]
    InProgress,

    #[error("Failed to save session: {0}")]
    Storage(#[from] StorageError),
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NetworkError(_) => AuthError::Unreachable,
            ApiError::Unauthorized => AuthError::InvalidCredentials,
            ApiError::BadRequest(message) => {
                AuthError::Rejected(message.unwrap_or_else(|| GENERIC_REJECTION.to_string()))
            }
            ApiError::InvalidResponse(_) => AuthError::MalformedResponse,
            other @ (ApiError::AccessDenied(_)
            | ApiError::NotFound(_)
            | ApiError::RateLimited
            | ApiError::ServerError(_)
            | ApiError::UnexpectedStatus(_)) => AuthError::Rejected(other.to_string()),
        }
    }
}
