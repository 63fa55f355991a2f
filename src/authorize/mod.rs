//! Route-based role authorization.
//!
//! The [`RouteTable`] is static and built once at startup. Paths are matched by
//! plain string prefix, so `/dashboard` also covers `/dashboard/orders`; when
//! several rules match, the longest prefix wins regardless of the order rules
//! were registered in.

use std::collections::BTreeSet;

use crate::session::{Session, roles};

mod middleware;

pub use middleware::{AuthGuard, CurrentSession, guard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub path_prefix: String,
    pub required_roles: BTreeSet<String>,
}

impl RouteRule {
    pub fn new<I, R>(path_prefix: impl Into<String>, required_roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            path_prefix: path_prefix.into(),
            required_roles: required_roles.into_iter().map(Into::into).collect(),
        }
    }
}

/// What to do with an authenticated request that no rule covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnmatchedPolicy {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Public,
    Unauthenticated,
    Authorized,
    Forbidden,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    public_prefixes: Vec<String>,
    rules: Vec<RouteRule>,
    csrf_prefixes: Vec<String>,
    unmatched: UnmatchedPolicy,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default table for the storefront.
    #[must_use]
    pub fn storefront() -> Self {
        let both = [roles::ADMIN, roles::CUSTOMER];
        [
            "/login",
            "/register",
            "/forbidden",
            "/health",
            "/openapi.json",
            "/favicon.ico",
            "/static/",
            "/api/auth/",
            "/api/webhooks/",
        ]
        .into_iter()
        .fold(Self::new(), Self::with_public_prefix)
        .with_rule(RouteRule::new("/dashboard", [roles::ADMIN]))
        .with_rule(RouteRule::new("/api/customers", [roles::ADMIN]))
        .with_rule(RouteRule::new("/api/products", [roles::ADMIN]))
        .with_rule(RouteRule::new("/api/orders", both))
        .with_rule(RouteRule::new("/api/payment", both))
        .with_rule(RouteRule::new("/api/csrf", both))
        .with_rule(RouteRule::new("/orders", both))
        .with_rule(RouteRule::new("/account", both))
        .with_csrf_prefix("/api/")
    }

    #[must_use]
    pub fn with_public_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_rule(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn with_csrf_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.csrf_prefixes.push(prefix.into());
        self
    }

    #[must_use]
    pub fn with_unmatched_policy(mut self, policy: UnmatchedPolicy) -> Self {
        self.unmatched = policy;
        self
    }

    #[must_use]
    pub fn unmatched_policy(&self) -> UnmatchedPolicy {
        self.unmatched
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    #[must_use]
    pub fn requires_csrf(&self, path: &str) -> bool {
        self.csrf_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Longest matching prefix. Among equal lengths the first registered wins.
    #[must_use]
    pub fn matching_rule(&self, path: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .filter(|rule| path.starts_with(rule.path_prefix.as_str()))
            .fold(None, |best: Option<&RouteRule>, rule| match best {
                Some(best) if best.path_prefix.len() >= rule.path_prefix.len() => Some(best),
                _ => Some(rule),
            })
    }

    #[must_use]
    pub fn decide(&self, path: &str, session: Option<&Session>) -> AccessDecision {
        if self.is_public(path) {
            return AccessDecision::Public;
        }
        let Some(session) = session else {
            return AccessDecision::Unauthenticated;
        };
        let allowed = match self.matching_rule(path) {
            Some(rule) => session.has_any_role(&rule.required_roles),
            None => self.unmatched == UnmatchedPolicy::Allow,
        };
        if allowed {
            AccessDecision::Authorized
        } else {
            AccessDecision::Forbidden
        }
    }
}
