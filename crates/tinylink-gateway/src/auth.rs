//! Anonymous user identity carried in a signed cookie.
//!
//! The cookie value is `hex(uuid || HMAC-SHA256(sha256(secret), uuid))`. A
//! request without a valid cookie gets a fresh user id and a new cookie.

use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const COOKIE_NAME: &str = "token";

const ID_LEN: usize = 16;
const SIGNATURE_LEN: usize = 32;

/// The caller's user id, inserted into request extensions by [`authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

/// Issues and checks user tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        Self { key }
    }

    /// Mints a new user id and its token.
    pub fn issue(&self) -> (UserId, String) {
        let id = Uuid::new_v4();
        let mut token = id.as_bytes().to_vec();
        token.extend_from_slice(&self.mac(id.as_bytes()).finalize().into_bytes());
        (UserId(id.to_string()), hex::encode(token))
    }

    /// Returns the user id of a well-formed, correctly signed token.
    pub fn verify(&self, token: &str) -> Option<UserId> {
        let bytes = hex::decode(token).ok()?;
        if bytes.len() != ID_LEN + SIGNATURE_LEN {
            return None;
        }
        let (id, signature) = bytes.split_at(ID_LEN);
        self.mac(id).verify_slice(signature).ok()?;
        let id = Uuid::from_slice(id).ok()?;
        Some(UserId(id.to_string()))
    }

    #[allow(clippy::expect_used)] // HMAC-SHA256 accepts any key size, cannot fail
    fn mac(&self, message: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC-SHA256 accepts any key size");
        mac.update(message);
        mac
    }
}

fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(name, value)| (name == COOKIE_NAME && !value.is_empty()).then_some(value))
}

/// Resolves the caller's [`UserId`], issuing a new cookie when needed.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let signer = state.signer();
    let known = token_from_headers(request.headers()).and_then(|token| signer.verify(token));

    let (user_id, new_token) = match known {
        Some(user_id) => (user_id, None),
        None => {
            let (user_id, token) = signer.issue();
            debug!(user_id = %user_id.0, "Issued new user token");
            (user_id, Some(token))
        }
    };

    request.extensions_mut().insert(user_id);
    let mut response = next.run(request).await;

    if let Some(token) = new_token {
        let cookie = format!("{COOKIE_NAME}={token}; Path=/; HttpOnly");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}
