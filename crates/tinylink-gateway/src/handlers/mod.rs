mod api;
mod health;
mod url;

pub use api::*;
pub use health::*;
pub use self::url::*;

use crate::error::AppError;

/// Accepts absolute `http`/`https` URLs only.
pub(crate) fn validate_url(raw: &str) -> Result<(), AppError> {
    if raw.is_empty() {
        return Err(AppError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let parsed = ::url::Url::parse(raw).map_err(|e| AppError::InvalidUrl(format!("{raw}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(()),
        "http" | "https" => Err(AppError::InvalidUrl(format!("URL has no host: {raw}"))),
        scheme => Err(AppError::InvalidUrl(format!(
            "URL scheme must be http or https: {scheme}"
        ))),
    }
}
