//! Stateless sessions carried in a signed cookie.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub mod manager;
pub mod token;

pub use manager::{SESSION_COOKIE_NAME, SessionManager};
pub use token::{SESSION_TTL_SECONDS, SignedToken, TokenCodec, TokenError};

/// Well-known role names used by the storefront route table.
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const CUSTOMER: &str = "customer";
}

/// Identity and roles of the caller. Timestamps are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    #[serde(rename = "sub")]
    pub user_id: String,
    pub roles: BTreeSet<String>,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl Session {
    /// Unstamped session; `TokenCodec::encode` fills in the timestamps.
    pub fn new<I, R>(user_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            issued_at: 0,
            expires_at: 0,
        }
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// True when at least one of `required` is held.
    #[must_use]
    pub fn has_any_role(&self, required: &BTreeSet<String>) -> bool {
        !self.roles.is_disjoint(required)
    }

    #[must_use]
    pub fn remaining_seconds(&self, now_seconds: i64) -> i64 {
        self.expires_at.saturating_sub(now_seconds).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(roles: &[&str]) -> BTreeSet<String> {
        roles.iter().map(|r| (*r).to_string()).collect()
    }

    #[test]
    fn overlapping_role_is_accepted() {
        let session = Session::new("u-1", [roles::CUSTOMER]);
        assert!(session.has_any_role(&required(&[roles::ADMIN, roles::CUSTOMER])));
    }

    #[test]
    fn disjoint_roles_are_rejected() {
        let session = Session::new("u-1", [roles::CUSTOMER]);
        assert!(!session.has_any_role(&required(&[roles::ADMIN])));
        assert!(!Session::new("u-2", Vec::<String>::new()).has_any_role(&required(&[])));
    }

    #[test]
    fn claims_use_short_wire_names() -> anyhow::Result<()> {
        let session = Session::new("u-1", ["admin"]);
        let json = serde_json::to_value(&session)?;
        assert_eq!(json["sub"], "u-1");
        assert_eq!(json["roles"][0], "admin");
        assert!(json.get("iat").is_some());
        assert!(json.get("exp").is_some());
        Ok(())
    }
}
