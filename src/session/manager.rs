//! Reads, issues and clears the `session` cookie.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error};

use super::{Session, TokenCodec, TokenError};
use crate::clock::Clock;
use crate::error::GuardError;

pub const SESSION_COOKIE_NAME: &str = "session";

#[derive(Debug, Clone)]
pub struct SessionManager {
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    secure_cookies: bool,
}

impl SessionManager {
    /// # Errors
    ///
    /// Returns an error if the secret is too short to sign with.
    pub fn new(secret: &SecretString, clock: Arc<dyn Clock>) -> Result<Self, TokenError> {
        Ok(Self {
            codec: TokenCodec::new(secret)?,
            clock,
            secure_cookies: true,
        })
    }

    /// Drop the `Secure` attribute. Only for plain HTTP development.
    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    /// Sign `session` and attach it as a fresh cookie.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Internal`] if the token cannot be built.
    pub fn login(
        &self,
        session: &Session,
        response_headers: &mut HeaderMap,
    ) -> Result<Session, GuardError> {
        let now = self.clock.now_seconds();
        let token = self
            .codec
            .encode(session, now)
            .map_err(|err| GuardError::Internal(format!("failed to sign session: {err}")))?;
        let max_age = token.session().remaining_seconds(now);
        let (value, stamped) = token.into_parts();
        let cookie = self
            .session_cookie(&value, max_age)
            .map_err(|err| GuardError::Internal(format!("invalid session cookie: {err}")))?;
        response_headers.append(SET_COOKIE, cookie);
        Ok(stamped)
    }

    /// Expire the cookie immediately. The old token is never inspected.
    pub fn logout(&self, response_headers: &mut HeaderMap) {
        match self.session_cookie("", 0) {
            Ok(cookie) => {
                response_headers.append(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build logout cookie: {err}"),
        }
    }

    /// Returns the verified session, or `None` for every kind of failure.
    pub fn current_session(&self, request_headers: &HeaderMap) -> Option<Session> {
        let token = extract_session_token(request_headers)?;
        match self.codec.decode(&token, self.clock.now_seconds()) {
            Ok(session) => Some(session),
            Err(err) => {
                debug!("Ignoring session cookie: {err}");
                None
            }
        }
    }

    /// Re-sign the current session with a renewed expiry, if there is one.
    pub fn refresh(
        &self,
        request_headers: &HeaderMap,
        response_headers: &mut HeaderMap,
    ) -> Option<Session> {
        let session = self.current_session(request_headers)?;
        self.renew(&session, response_headers)
    }

    /// Sliding expiration for an already verified session.
    ///
    /// A `session` cookie already present on the response wins, so a logout or
    /// a login performed by the handler is never overwritten.
    pub fn renew(&self, session: &Session, response_headers: &mut HeaderMap) -> Option<Session> {
        if sets_session_cookie(response_headers) {
            return None;
        }
        match self.login(session, response_headers) {
            Ok(renewed) => Some(renewed),
            Err(err) => {
                error!("Failed to renew session: {err}");
                None
            }
        }
    }

    fn session_cookie(&self, token: &str, max_age: i64) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}"
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME {
                let val = val.trim();
                if !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
    }
    None
}

fn sets_session_cookie(headers: &HeaderMap) -> bool {
    let prefix = format!("{SESSION_COOKIE_NAME}=");
    headers
        .get_all(SET_COOKIE)
        .iter()
        .any(|value| value.to_str().is_ok_and(|s| s.starts_with(&prefix)))
}
