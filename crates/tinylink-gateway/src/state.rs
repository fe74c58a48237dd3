use std::sync::Arc;

use tinylink_core::{Repository, ShortCode};

use crate::auth::TokenSigner;

#[derive(Clone)]
pub struct AppState {
    repository: Arc<dyn Repository>,
    base_url: String,
    signer: TokenSigner,
}

impl AppState {
    pub fn new(
        repository: Arc<dyn Repository>,
        public_base_url: impl Into<String>,
        signer: TokenSigner,
    ) -> Self {
        Self {
            repository,
            base_url: public_base_url.into(),
            signer,
        }
    }

    pub fn repository(&self) -> &dyn Repository {
        self.repository.as_ref()
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Builds the public URL of a short code.
    pub fn short_url(&self, code: &ShortCode) -> String {
        code.to_url(&self.base_url)
    }
}
