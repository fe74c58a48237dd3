use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tinylink_core::Error as RepositoryError;
use tracing::error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidUrl(_) | AppError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            AppError::Repository(err) => match err {
                RepositoryError::InvalidCode { .. } => StatusCode::BAD_REQUEST,
                RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
                RepositoryError::Deleted(_) => StatusCode::GONE,
                RepositoryError::NoLinksForUser(_) => StatusCode::NO_CONTENT,
                RepositoryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
            return status.into_response();
        }
        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }
        (status, self.to_string()).into_response()
    }
}
