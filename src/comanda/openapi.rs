use axum::Json;
use utoipa::OpenApi;
use utoipa::openapi::{Contact, License};

use super::handlers::{csrf, customers, health, pages, payment, session};
use crate::breaker::{CircuitSnapshot, CircuitState};
use crate::error::{ErrorDetail, ErrorEnvelope};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        pages::login,
        pages::forbidden,
        pages::dashboard,
        session::session,
        session::logout,
        session::dev_login,
        csrf::csrf_token,
        customers::delete_customer,
        payment::charge,
    ),
    components(schemas(ErrorEnvelope, ErrorDetail, CircuitSnapshot, CircuitState)),
    tags(
        (name = "health", description = "Liveness and breaker state"),
        (name = "auth", description = "Session cookie management"),
        (name = "csrf", description = "Anti-forgery tokens"),
        (name = "customers", description = "Customer administration"),
        (name = "payment", description = "Guarded payment provider calls"),
        (name = "pages", description = "Placeholder pages")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut spec = ApiDoc::openapi();
    // Use Cargo.toml metadata instead of the utoipa defaults.
    spec.info.title = env!("CARGO_PKG_NAME").to_string();
    spec.info.version = env!("CARGO_PKG_VERSION").to_string();
    spec.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    spec.info.contact = cargo_contact();
    spec.info.license = cargo_license();
    spec
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let Some(start) = author.find('<') else {
        let name = author.trim();
        return (if name.is_empty() { None } else { Some(name) }, None);
    };
    let name = author[..start].trim();
    let email = author[start + 1..].trim_end_matches('>').trim();
    (
        if name.is_empty() { None } else { Some(name) },
        if email.is_empty() { None } else { Some(email) },
    )
}
