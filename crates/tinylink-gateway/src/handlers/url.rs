use super::validate_url;
use crate::auth::UserId;
use crate::error::Result;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tinylink_core::{Error, StorageError};

/// `POST /` with the URL as the plain-text body.
pub async fn shorten_text_handler(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    body: String,
) -> Result<Response> {
    let original_url = body.trim();
    validate_url(original_url)?;

    let outcome = state.repository().save(original_url, &user.0).await?;
    let status = if outcome.already_existed() {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    };
    Ok((status, state.short_url(&outcome.code)).into_response())
}

/// `GET /{code}` redirects to the original URL.
pub async fn redirect_handler(
    Path(code): Path<String>,
    State(state): State<AppState>,
) -> Result<Response> {
    let original_url = state.repository().resolve(&code).await?;
    let location = HeaderValue::from_str(&original_url).map_err(|_| {
        Error::from(StorageError::InvalidData(format!(
            "stored url of '{code}' is not a valid header"
        )))
    })?;
    Ok((StatusCode::TEMPORARY_REDIRECT, [(LOCATION, location)]).into_response())
}
