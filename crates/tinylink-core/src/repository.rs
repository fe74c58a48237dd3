use crate::deletion::DeletionTicket;
use crate::error::Result;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether a save created a new link or found the URL already shortened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    Created,
    Existing,
}

/// Result of [`Repository::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// The code of the new or existing link.
    pub code: ShortCode,
    pub status: SaveStatus,
}

impl SaveOutcome {
    pub fn created(code: ShortCode) -> Self {
        Self {
            code,
            status: SaveStatus::Created,
        }
    }

    pub fn existing(code: ShortCode) -> Self {
        Self {
            code,
            status: SaveStatus::Existing,
        }
    }

    /// Returns `true` if the URL had been saved before.
    pub fn already_existed(&self) -> bool {
        self.status == SaveStatus::Existing
    }
}

/// One entry of a batch save request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

/// One entry of a batch save response, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub correlation_id: String,
    pub code: ShortCode,
}

/// A link owned by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLink {
    pub code: ShortCode,
    pub original_url: String,
}

/// The operations every storage backend provides.
///
/// This is the only surface adapters see: they pass URLs, user ids and short
/// codes, and never touch backend-specific types.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    /// Returns the original URL behind a short code.
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) for unknown ids
    /// and [`Error::Deleted`](crate::Error::Deleted) for soft-deleted links.
    async fn resolve(&self, code: &str) -> Result<String>;

    /// Shortens a URL on behalf of `user_id` and records the ownership.
    ///
    /// Saving a URL that is already stored returns its existing code with
    /// [`SaveStatus::Existing`].
    async fn save(&self, original_url: &str, user_id: &str) -> Result<SaveOutcome>;

    /// Saves every item in order, pairing each code with its correlation id.
    ///
    /// The first failing item aborts the batch; items saved before it stay saved.
    async fn save_batch(&self, items: Vec<BatchItem>, user_id: &str) -> Result<Vec<BatchResult>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self.save(&item.original_url, user_id).await?;
            results.push(BatchResult {
                correlation_id: item.correlation_id,
                code: outcome.code,
            });
        }
        Ok(results)
    }

    /// Lists the links owned by `user_id`.
    ///
    /// Fails with [`Error::NoLinksForUser`](crate::Error::NoLinksForUser) when
    /// the user owns nothing.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<UserLink>>;

    /// Asks for the given codes to be soft-deleted on behalf of `user_id`.
    ///
    /// Returns at once. Ownership and existence are checked in the background
    /// and only verified links are deleted; the returned ticket reports how the
    /// request ended but does not need to be awaited.
    fn request_deletion(&self, user_id: &str, codes: Vec<String>) -> DeletionTicket;

    /// Probes the storage medium.
    async fn health_check(&self) -> Result<()>;

    /// Releases the backend's resources. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}
