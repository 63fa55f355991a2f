//! # Comanda (session integrity and request authorization)
//!
//! `comanda` is the protective layer in front of the food-ordering web
//! application. Page rendering and order handling live elsewhere; every request
//! they serve passes through this crate first.
//!
//! ## Sessions
//!
//! Sessions are stateless. The browser holds an `HS256`-signed token in the
//! `session` cookie (`HttpOnly`, `Secure`, `SameSite=Strict`) and the server
//! never stores it. Every successful request re-signs the token with a fresh
//! 24 hour expiry (sliding expiration). A forged, expired, or rotated-secret
//! token is indistinguishable from having no cookie at all.
//!
//! ## Authorization
//!
//! The [`authorize`] middleware matches the request path against a static
//! route table (longest prefix wins), redirects anonymous callers to `/login`,
//! and redirects callers without an overlapping role to `/forbidden`.
//! Mutating API calls must also carry a CSRF token bound to the caller's user
//! id.
//!
//! ## Dependencies
//!
//! Calls to the database and payment provider go through independent
//! [`breaker::CircuitBreaker`] instances. High-traffic endpoints are guarded by
//! [`rate_limit::RateLimiter`] profiles backed by Redis, which fail open when
//! the store is unreachable.

pub mod authorize;
pub mod breaker;
pub mod cli;
pub mod clock;
pub mod comanda;
pub mod csrf;
pub mod error;
pub mod rate_limit;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
