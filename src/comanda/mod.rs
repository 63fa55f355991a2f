//! HTTP service: router, handlers and upstream adapters behind the guards.

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;

pub mod handlers;
mod openapi;
mod state;
pub mod upstream;

pub use openapi::openapi;
pub use state::AppState;

use crate::{authorize, cli::telemetry, rate_limit};
use handlers::{csrf, customers, health, pages, payment, session};

/// Build the full router with the authorization and rate-limit layers.
///
/// `/api/auth/*` is limited by the strict profile and the rest of `/api/*` by
/// the lenient one. Every route sits behind [`authorize::guard`].
pub fn router(state: AppState) -> Router {
    let mut auth_routes = Router::new()
        .route("/api/auth/session", get(session::session))
        .route("/api/auth/logout", post(session::logout));
    if state.dev_login {
        auth_routes = auth_routes.route("/api/auth/dev-login", get(session::dev_login));
    }
    let auth_routes = auth_routes.route_layer(middleware::from_fn_with_state(
        state.auth_limiter.clone(),
        rate_limit::enforce,
    ));

    let api_routes = Router::new()
        .route("/api/csrf", get(csrf::csrf_token))
        .route("/api/customers/{id}/delete", post(customers::delete_customer))
        .route("/api/payment", post(payment::charge))
        .route_layer(middleware::from_fn_with_state(
            state.api_limiter.clone(),
            rate_limit::enforce,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/openapi.json", get(openapi::openapi_json))
        .route("/login", get(pages::login))
        .route("/forbidden", get(pages::forbidden))
        .route("/dashboard", get(pages::dashboard))
        .merge(auth_routes)
        .merge(api_routes)
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            authorize::guard,
        ))
        .with_state(state)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: AppState) -> Result<()> {
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    telemetry::shutdown_tracer();
    served?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
