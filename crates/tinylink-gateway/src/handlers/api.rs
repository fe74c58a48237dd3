use super::validate_url;
use crate::auth::UserId;
use crate::error::{AppError, Result};
use crate::model::{BatchResponseItem, ShortenRequest, ShortenResponse, UserUrl};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use tinylink_core::BatchItem;
use tracing::debug;

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidBody(rejection.body_text()))
}

/// `POST /api/shorten`
pub async fn shorten_json_handler(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    payload: std::result::Result<Json<ShortenRequest>, JsonRejection>,
) -> Result<Response> {
    let request = body(payload)?;
    validate_url(&request.url)?;

    let outcome = state.repository().save(&request.url, &user.0).await?;
    let status = if outcome.already_existed() {
        StatusCode::CONFLICT
    } else {
        StatusCode::CREATED
    };
    let response = ShortenResponse {
        result: state.short_url(&outcome.code),
    };
    Ok((status, Json(response)).into_response())
}

/// `POST /api/shorten/batch`
pub async fn shorten_batch_handler(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    payload: std::result::Result<Json<Vec<BatchItem>>, JsonRejection>,
) -> Result<Response> {
    let items = body(payload)?;
    if items.is_empty() {
        return Err(AppError::InvalidBody("batch is empty".to_string()));
    }
    for item in &items {
        validate_url(&item.original_url)?;
    }

    let results = state.repository().save_batch(items, &user.0).await?;
    let response: Vec<BatchResponseItem> = results
        .into_iter()
        .map(|result| BatchResponseItem {
            short_url: state.short_url(&result.code),
            correlation_id: result.correlation_id,
        })
        .collect();
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// `GET /api/user/urls`
pub async fn list_user_urls_handler(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
) -> Result<Json<Vec<UserUrl>>> {
    let links = state.repository().list_by_user(&user.0).await?;
    Ok(Json(
        links
            .into_iter()
            .map(|link| UserUrl {
                short_url: state.short_url(&link.code),
                original_url: link.original_url,
            })
            .collect(),
    ))
}

/// `DELETE /api/user/urls` with a JSON array of codes. Answers before the
/// deletion happens.
pub async fn delete_user_urls_handler(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    payload: std::result::Result<Json<Vec<String>>, JsonRejection>,
) -> Result<StatusCode> {
    let codes = body(payload)?;
    debug!(user_id = %user.0, count = codes.len(), "Deletion requested");
    let _ticket = state.repository().request_deletion(&user.0, codes);
    Ok(StatusCode::ACCEPTED)
}
