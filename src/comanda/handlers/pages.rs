//! Placeholder pages. The real templates are rendered by the storefront.

use axum::response::Html;

use crate::authorize::CurrentSession;

#[utoipa::path(get, path = "/login", responses((status = 200, description = "Login page")), tag = "pages")]
pub async fn login() -> Html<&'static str> {
    Html("<h1>Sign in</h1>")
}

#[utoipa::path(get, path = "/forbidden", responses((status = 200, description = "Access denied page")), tag = "pages")]
pub async fn forbidden() -> Html<&'static str> {
    Html("<h1>Forbidden</h1><p>Your account cannot open that page.</p>")
}

#[utoipa::path(
    get,
    path = "/dashboard",
    responses(
        (status = 200, description = "Admin landing page"),
        (status = 303, description = "Redirect to /login or /forbidden")
    ),
    tag = "pages"
)]
pub async fn dashboard(CurrentSession(session): CurrentSession) -> Html<String> {
    Html(format!("<h1>Dashboard</h1><p>Signed in as {}</p>", escape(&session.user_id)))
}

fn escape(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#39;".to_string(),
            other => other.to_string(),
        })
        .collect()
}
