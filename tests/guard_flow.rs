use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{
        HeaderMap, Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
};
use comanda::{
    authorize::{AuthGuard, RouteTable, UnmatchedPolicy},
    breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    clock::{Clock, ManualClock},
    comanda::{
        AppState, router,
        upstream::{CustomerRepository, PaymentGateway, PaymentReceipt, PaymentRequest},
    },
    csrf::{CSRF_HEADER, CsrfGuard},
    rate_limit::{RateLimitProfile, RateLimiter},
    session::{Session, SessionManager, roles},
};
use secrecy::SecretString;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

const SECRET: &str = "kitchen-secret-0123456789abcdefghij";
const CLIENT_IP: &str = "203.0.113.9";

#[derive(Debug, Default)]
struct FakeGateway {
    calls: AtomicUsize,
    failing: AtomicBool,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("provider timed out"));
        }
        Ok(PaymentReceipt {
            payment_id: format!("pay-{}", request.order_id),
            status: "accepted".to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct FakeCustomers {
    calls: AtomicUsize,
}

#[async_trait]
impl CustomerRepository for FakeCustomers {
    async fn delete(&self, id: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(id == "123")
    }
}

struct Harness {
    state: AppState,
    payments: Arc<FakeGateway>,
    customers: Arc<FakeCustomers>,
}

impl Harness {
    fn new() -> Result<Self> {
        Self::with_routes(RouteTable::storefront())
    }

    fn with_routes(routes: RouteTable) -> Result<Self> {
        let secret = SecretString::from(SECRET.to_string());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_700_000_000_000));
        let sessions = SessionManager::new(&secret, clock.clone())?;
        let csrf = CsrfGuard::new(&secret)?;
        let payments = Arc::new(FakeGateway::default());
        let customers = Arc::new(FakeCustomers::default());

        let state = AppState {
            auth: Arc::new(AuthGuard::new(sessions, csrf, routes)),
            database: Arc::new(CircuitBreaker::new(
                "database",
                CircuitBreakerConfig::database(),
                clock.clone(),
            )),
            payment: Arc::new(CircuitBreaker::new(
                "payment",
                CircuitBreakerConfig::new(1, Duration::from_secs(60)),
                clock.clone(),
            )),
            auth_limiter: Arc::new(RateLimiter::in_memory(
                RateLimitProfile::auth(),
                clock.clone(),
            )),
            api_limiter: Arc::new(RateLimiter::in_memory(RateLimitProfile::api(), clock)),
            payments: payments.clone(),
            customers: customers.clone(),
            dev_login: false,
        };

        Ok(Self {
            state,
            payments,
            customers,
        })
    }

    /// Returns the `session=<token>` pair a browser would send back.
    fn cookie_for(&self, user: &str, role: &str) -> Result<(Session, String)> {
        let mut headers = HeaderMap::new();
        let session = self
            .state
            .auth
            .sessions()
            .login(&Session::new(user, [role]), &mut headers)?;
        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("login did not set a cookie"))?;
        Ok((session, cookie))
    }

    fn csrf_for(&self, session: &Session) -> Result<String> {
        Ok(self
            .state
            .auth
            .csrf()
            .issue(Some(session))?
            .as_str()
            .to_string())
    }
}

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn payment_request(cookie: &str, csrf: &str) -> Result<Request<Body>> {
    Ok(Request::post("/api/payment")
        .header(COOKIE, cookie)
        .header(CSRF_HEADER, csrf)
        .header(CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::from(
            r#"{"orderId":"o-1","amountCents":1250,"currency":"EUR"}"#,
        ))?)
}

#[tokio::test]
async fn anonymous_dashboard_redirects_to_login() -> Result<()> {
    let harness = Harness::new()?;
    let response = router(harness.state.clone())
        .oneshot(Request::get("/dashboard").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/login")
    );
    Ok(())
}

#[tokio::test]
async fn customer_dashboard_redirects_to_forbidden() -> Result<()> {
    let harness = Harness::new()?;
    let (_, cookie) = harness.cookie_for("u-42", roles::CUSTOMER)?;
    let response = router(harness.state.clone())
        .oneshot(
            Request::get("/dashboard")
                .header(COOKIE, cookie)
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/forbidden")
    );
    Ok(())
}

#[tokio::test]
async fn admin_dashboard_renews_session() -> Result<()> {
    let harness = Harness::new()?;
    let (_, cookie) = harness.cookie_for("u-1", roles::ADMIN)?;
    let response = router(harness.state.clone())
        .oneshot(
            Request::get("/dashboard")
                .header(COOKIE, cookie)
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(response.headers());
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("session="));
    assert!(cookies[0].contains("Max-Age=86400"));
    Ok(())
}

#[tokio::test]
async fn delete_customer_requires_csrf() -> Result<()> {
    let harness = Harness::new()?;
    let (session, cookie) = harness.cookie_for("u-1", roles::ADMIN)?;
    let app = router(harness.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/customers/123/delete")
                .header(COOKIE, cookie.as_str())
                .header("x-forwarded-for", CLIENT_IP)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json["error"]["code"], "CSRF_INVALID");
    assert_eq!(harness.customers.calls.load(Ordering::SeqCst), 0);

    let csrf = harness.csrf_for(&session)?;
    let response = app
        .oneshot(
            Request::post("/api/customers/123/delete")
                .header(COOKIE, cookie.as_str())
                .header(CSRF_HEADER, csrf)
                .header("x-forwarded-for", CLIENT_IP)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(harness.customers.calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn csrf_token_of_another_user_is_rejected() -> Result<()> {
    let harness = Harness::new()?;
    let (_, cookie) = harness.cookie_for("u-1", roles::ADMIN)?;
    let (other, _) = harness.cookie_for("u-2", roles::ADMIN)?;
    let csrf = harness.csrf_for(&other)?;

    let response = router(harness.state.clone())
        .oneshot(
            Request::post("/api/customers/123/delete")
                .header(COOKIE, cookie)
                .header(CSRF_HEADER, csrf)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn open_payment_breaker_short_circuits() -> Result<()> {
    let harness = Harness::new()?;
    let (session, cookie) = harness.cookie_for("u-42", roles::CUSTOMER)?;
    let csrf = harness.csrf_for(&session)?;
    let app = router(harness.state.clone());

    let response = app.clone().oneshot(payment_request(&cookie, &csrf)?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    harness.payments.failing.store(true, Ordering::SeqCst);
    let response = app.clone().oneshot(payment_request(&cookie, &csrf)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(harness.state.payment.state(), CircuitState::Open);

    let response = app.oneshot(payment_request(&cookie, &csrf)?).await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok()),
        Some("60")
    );
    assert_eq!(harness.payments.calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn logout_cookie_is_not_renewed() -> Result<()> {
    let harness = Harness::new()?;
    let (_, cookie) = harness.cookie_for("u-42", roles::CUSTOMER)?;
    let response = router(harness.state.clone())
        .oneshot(
            Request::post("/api/auth/logout")
                .header(COOKIE, cookie)
                .body(Body::empty())?,
        )
        .await?;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let cookies = set_cookies(response.headers());
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("session=;"));
    assert!(cookies[0].contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn tampered_cookie_is_treated_as_anonymous() -> Result<()> {
    let harness = Harness::new()?;
    let (_, cookie) = harness.cookie_for("u-1", roles::ADMIN)?;
    let tampered = format!("{cookie}x");

    let response = router(harness.state.clone())
        .oneshot(
            Request::get("/api/auth/session")
                .header(COOKIE, tampered)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(set_cookies(response.headers()).is_empty());
    Ok(())
}

#[tokio::test]
async fn sixth_auth_request_is_rate_limited() -> Result<()> {
    let harness = Harness::new()?;
    let app = router(harness.state.clone());

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(
                Request::get("/api/auth/session")
                    .header("x-forwarded-for", CLIENT_IP)
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = app
        .oneshot(
            Request::get("/api/auth/session")
                .header("x-forwarded-for", CLIENT_IP)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("0")
    );
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
    Ok(())
}

#[tokio::test]
async fn health_reports_breakers() -> Result<()> {
    let harness = Harness::new()?;
    let response = router(harness.state.clone())
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(json["breakers"][0]["name"], "database");
    assert_eq!(json["breakers"][1]["state"], "closed");
    Ok(())
}

#[tokio::test]
async fn deny_unmatched_still_issues_csrf_tokens() -> Result<()> {
    let harness =
        Harness::with_routes(RouteTable::storefront().with_unmatched_policy(UnmatchedPolicy::Deny))?;
    let (_, cookie) = harness.cookie_for("u-42", roles::CUSTOMER)?;
    let app = router(harness.state.clone());

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/csrf")
                .header(COOKIE, cookie.as_str())
                .header("x-forwarded-for", CLIENT_IP)
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json: serde_json::Value = serde_json::from_slice(&body)?;
    let csrf = json["token"]
        .as_str()
        .ok_or_else(|| anyhow!("token missing"))?
        .to_string();

    let response = app.oneshot(payment_request(&cookie, &csrf)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.payments.calls.load(Ordering::SeqCst), 1);
    Ok(())
}
