use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AccessDecision, RouteTable};
use crate::csrf::{self, CsrfGuard};
use crate::error::GuardError;
use crate::session::{Session, SessionManager};

pub const LOGIN_PATH: &str = "/login";
pub const FORBIDDEN_PATH: &str = "/forbidden";

/// Everything the per-request pipeline needs.
#[derive(Debug, Clone)]
pub struct AuthGuard {
    sessions: SessionManager,
    csrf: CsrfGuard,
    routes: RouteTable,
}

impl AuthGuard {
    #[must_use]
    pub fn new(sessions: SessionManager, csrf: CsrfGuard, routes: RouteTable) -> Self {
        Self {
            sessions,
            csrf,
            routes,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

/// Authorize every request before it reaches a handler.
///
/// Anonymous callers on protected paths are redirected to `/login` and
/// callers without a matching role to `/forbidden`. Mutating requests under a
/// CSRF prefix must carry a valid token. A verified session is placed in the
/// request extensions and its cookie is renewed on the way out.
pub async fn guard(State(auth): State<Arc<AuthGuard>>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let session = auth.sessions.current_session(request.headers());

    match auth.routes.decide(&path, session.as_ref()) {
        AccessDecision::Public => {
            let mut request = request;
            if let Some(session) = &session {
                request.extensions_mut().insert(session.clone());
            }
            let mut response = next.run(request).await;
            if let Some(session) = session {
                auth.sessions.renew(&session, response.headers_mut());
            }
            response
        }
        AccessDecision::Unauthenticated => {
            debug!(path = %path, "No session, redirecting to login");
            Redirect::to(LOGIN_PATH).into_response()
        }
        AccessDecision::Forbidden => {
            debug!(path = %path, "Role mismatch, redirecting to forbidden");
            Redirect::to(FORBIDDEN_PATH).into_response()
        }
        AccessDecision::Authorized => {
            let Some(session) = session else {
                return Redirect::to(LOGIN_PATH).into_response();
            };

            let mut request = request;
            if csrf::requires_check(request.method()) && auth.routes.requires_csrf(&path) {
                let (buffered, token) = csrf::extract_from_request(request).await;
                if let Err(err) = auth.csrf.check(Some(&session), token.as_deref()) {
                    warn!(path = %path, user = %session.user_id, "CSRF check failed: {err}");
                    return err.into_response();
                }
                request = buffered;
            }

            request.extensions_mut().insert(session.clone());
            let mut response = next.run(request).await;
            auth.sessions.renew(&session, response.headers_mut());
            response
        }
    }
}

/// The verified session placed in the request by [`guard`].
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = GuardError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(CurrentSession)
            .ok_or(GuardError::Unauthenticated)
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Session>().cloned().map(CurrentSession))
    }
}
