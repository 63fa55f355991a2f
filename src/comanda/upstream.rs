//! Thin adapters for the dependencies guarded by circuit breakers.
//!
//! They forward exactly one call each; order and payment rules live in the
//! services behind them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{Instrument, info_span};
use url::Url;
use utoipa::ToSchema;

use crate::APP_USER_AGENT;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub order_id: String,
    pub amount_cents: u64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentReceipt>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// Returns `false` when no customer had that id.
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPaymentGateway {
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("Invalid payment URL: {endpoint}"))?;
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build payment HTTP client")?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, request: &PaymentRequest) -> Result<PaymentReceipt> {
        let span = info_span!("payment.charge", order_id = %request.order_id);
        async {
            self.client
                .post(self.endpoint.clone())
                .json(request)
                .send()
                .await
                .context("Payment provider request failed")?
                .error_for_status()
                .context("Payment provider rejected the charge")?
                .json::<PaymentReceipt>()
                .await
                .context("Invalid payment provider response")
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct PgCustomerRepository {
    pool: PgPool,
}

impl PgCustomerRepository {
    /// Build the pool without connecting; connections are made on first use
    /// so an unreachable database trips the breaker instead of startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the DSN cannot be parsed.
    pub fn connect_lazy(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .max_lifetime(Duration::from_secs(60 * 2))
            .connect_lazy(dsn)
            .context("Invalid database DSN")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CustomerRepository for PgCustomerRepository {
    async fn delete(&self, id: &str) -> Result<bool> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE"
        );
        let result = sqlx::query("DELETE FROM customers WHERE id::text = $1")
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to delete customer")?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_gateway_rejects_bad_url() {
        assert!(HttpPaymentGateway::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_payment_provider_is_an_error() -> Result<()> {
        let gateway = HttpPaymentGateway::new("http://127.0.0.1:1/charge", Duration::from_secs(1))?;
        let request = PaymentRequest {
            order_id: "o-1".to_string(),
            amount_cents: 1_250,
            currency: "EUR".to_string(),
        };
        assert!(gateway.charge(&request).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn customer_repository_connects_lazily() {
        assert!(PgCustomerRepository::connect_lazy("postgres://user@127.0.0.1:1/comanda").is_ok());
        assert!(PgCustomerRepository::connect_lazy("not a dsn").is_err());
    }

    #[test]
    fn payment_request_is_camel_case() -> Result<()> {
        let json: serde_json::Value = serde_json::to_value(PaymentRequest {
            order_id: "o-1".to_string(),
            amount_cents: 500,
            currency: "USD".to_string(),
        })?;
        assert_eq!(json["orderId"], "o-1");
        assert_eq!(json["amountCents"], 500);
        Ok(())
    }
}
