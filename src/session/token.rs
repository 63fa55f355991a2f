//! HS256 signing and verification of session tokens.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use super::Session;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_TTL_SECONDS: i64 = 86_400;
pub const MIN_SECRET_LEN: usize = 32;

const ALG: &str = "HS256";
const SESSION_KEY_CONTEXT: &[u8] = b"comanda:session:v1";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("secret must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    WeakSecret(usize),
    #[error("invalid key length")]
    KeyLength,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Derive a 32 byte key for one purpose from the shared server secret.
///
/// # Errors
///
/// Returns [`TokenError::WeakSecret`] when the secret is shorter than
/// [`MIN_SECRET_LEN`] bytes.
pub(crate) fn derive_key(secret: &SecretString, context: &[u8]) -> Result<[u8; 32], TokenError> {
    let raw = secret.expose_secret().as_bytes();
    if raw.len() < MIN_SECRET_LEN {
        return Err(TokenError::WeakSecret(raw.len()));
    }
    let mut hasher = Sha256::new();
    hasher.update(context);
    hasher.update(raw);
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    Ok(key)
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Encoded token plus the session exactly as it was stamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    value: String,
    session: Session,
}

impl SignedToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.session.expires_at
    }

    #[must_use]
    pub fn into_parts(self) -> (String, Session) {
        (self.value, self.session)
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    key: [u8; 32],
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenCodec {
    /// # Errors
    ///
    /// Returns an error if the secret is too short to sign with.
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        Ok(Self {
            key: derive_key(secret, SESSION_KEY_CONTEXT)?,
        })
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::KeyLength)
    }

    /// Sign `session` with `iat = now` and a fresh 24 hour expiry.
    ///
    /// Timestamps already present on `session` are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be serialized.
    pub fn encode(&self, session: &Session, now_unix_seconds: i64) -> Result<SignedToken, TokenError> {
        let stamped = Session {
            issued_at: now_unix_seconds,
            expires_at: now_unix_seconds.saturating_add(SESSION_TTL_SECONDS),
            ..session.clone()
        };
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(&stamped)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(SignedToken {
            value: format!("{signing_input}.{signature_b64}"),
            session: stamped,
        })
    }

    /// Verify `token` and return its session.
    ///
    /// The signature is checked before any claim is parsed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the token does not have three base64url segments,
    /// - the header names an algorithm other than HS256,
    /// - the signature does not match,
    /// - the claims are malformed or `now >= exp`.
    pub fn decode(&self, token: &str, now_unix_seconds: i64) -> Result<Session, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(TokenError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(TokenError::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let session: Session = b64d_json(claims_b64)?;
        if session.expires_at <= now_unix_seconds {
            return Err(TokenError::Expired);
        }

        Ok(session)
    }
}
