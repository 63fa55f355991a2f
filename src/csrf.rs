//! Anti-forgery tokens bound to the session's user id.
//!
//! Tokens are stateless: `base64url(nonce) . base64url(mac)` where the MAC
//! covers the user id and the nonce. A token only verifies for the user in
//! the caller's *current* session, so logging out or switching accounts
//! invalidates every token issued before.
//!
//! The token is read from the `x-csrf-token` header, or from the `csrf_token`
//! field of an `application/x-www-form-urlencoded` body. JSON bodies are never
//! inspected; JSON clients must send the header.

use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{HeaderMap, Method, header::CONTENT_TYPE},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use secrecy::SecretString;
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use tracing::debug;
use utoipa::ToSchema;

use crate::error::GuardError;
use crate::session::{Session, TokenError, token::derive_key};

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";
pub const MAX_FORM_BYTES: usize = 64 * 1024;

const CSRF_KEY_CONTEXT: &[u8] = b"comanda:csrf:v1";
const NONCE_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CsrfToken {
    pub token: String,
}

impl CsrfToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }
}

#[derive(Clone)]
pub struct CsrfGuard {
    key: [u8; 32],
}

impl fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CsrfGuard {
    /// # Errors
    ///
    /// Returns an error if the secret is too short.
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        Ok(Self {
            key: derive_key(secret, CSRF_KEY_CONTEXT)?,
        })
    }

    fn mac(&self, user_id: &str, nonce: &[u8]) -> Result<HmacSha256, GuardError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|err| GuardError::Internal(format!("csrf key: {err}")))?;
        let len = u32::try_from(user_id.len())
            .map_err(|_| GuardError::Internal("user id too long".to_string()))?;
        mac.update(&len.to_be_bytes());
        mac.update(user_id.as_bytes());
        mac.update(nonce);
        Ok(mac)
    }

    /// Issue a token for the session's user.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Unauthenticated`] without a session, or
    /// [`GuardError::Internal`] if the system RNG fails.
    pub fn issue(&self, session: Option<&Session>) -> Result<CsrfToken, GuardError> {
        let session = session.ok_or(GuardError::Unauthenticated)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|err| GuardError::Internal(format!("failed to generate csrf nonce: {err}")))?;
        let mac = self.mac(&session.user_id, &nonce)?;
        let token = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(&nonce),
            Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes())
        );
        Ok(CsrfToken { token })
    }

    /// Constant-time check of `token` against the current session's user.
    pub fn verify(&self, session: Option<&Session>, token: &str) -> bool {
        let Some(session) = session else {
            return false;
        };
        let Some((nonce_b64, mac_b64)) = token.trim().split_once('.') else {
            return false;
        };
        let (Ok(nonce), Ok(expected)) = (
            Base64UrlUnpadded::decode_vec(nonce_b64),
            Base64UrlUnpadded::decode_vec(mac_b64),
        ) else {
            return false;
        };
        if nonce.len() != NONCE_LEN {
            return false;
        }
        self.mac(&session.user_id, &nonce)
            .is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
    }

    /// # Errors
    ///
    /// Returns [`GuardError::CsrfMissing`] or [`GuardError::CsrfInvalid`].
    pub fn check(&self, session: Option<&Session>, token: Option<&str>) -> Result<(), GuardError> {
        let token = token.ok_or(GuardError::CsrfMissing)?;
        if self.verify(session, token) {
            Ok(())
        } else {
            Err(GuardError::CsrfInvalid)
        }
    }
}

/// Methods that never change state skip the check.
#[must_use]
pub fn requires_check(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

#[must_use]
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CSRF_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[must_use]
pub fn token_from_form(body: &[u8]) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(key, _)| key == CSRF_FORM_FIELD)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
}

/// Find the token in the header or the form body.
///
/// The body is buffered and handed back so the handler can still read it.
pub async fn extract_from_request(request: Request) -> (Request, Option<String>) {
    if let Some(token) = token_from_headers(request.headers()) {
        return (request, Some(token));
    }
    if !is_form(request.headers()) {
        return (request, None);
    }

    let (parts, body) = request.into_parts();
    match to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => {
            let token = token_from_form(&bytes);
            (Request::from_parts(parts, Body::from(bytes)), token)
        }
        Err(err) => {
            debug!("Unable to buffer form body for csrf token: {err}");
            (Request::from_parts(parts, Body::empty()), None)
        }
    }
}
