use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{CheckoutRequest, PaymentGateway};
use crate::config::StripeConfig;
use crate::models::{CheckoutSession, SessionPage};
use crate::utils::error::{AppError, AppResult};

/// Page size used when walking historical sessions.
const LIST_PAGE_SIZE: &str = "100";

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct RefundResponse {
    id: String,
    status: Option<String>,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    AppError::ExternalServiceError(format!("Payment provider unreachable: {err}"))
}

async fn decode<T: DeserializeOwned>(response: Response) -> AppResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::ExternalServiceError(format!(
            "Payment provider returned {status}: {body}"
        )));
    }

    response.json::<T>().await.map_err(|e| {
        AppError::ExternalServiceError(format!("Unexpected payment provider response: {e}"))
    })
}

fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("customer_email".to_string(), request.customer_email.clone()),
        ("line_items[0][quantity]".to_string(), request.quantity.to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            request.unit_amount_minor.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.product_name.clone(),
        ),
    ];

    let mut metadata: Vec<(String, String)> = request.metadata.to_map().into_iter().collect();
    metadata.sort();
    form.extend(
        metadata
            .into_iter()
            .map(|(key, value)| (format!("metadata[{key}]"), value)),
    );
    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn retrieve_session(&self, session_id: &str) -> AppResult<Option<CheckoutSession>> {
        let response = self
            .get(&format!("/v1/checkout/sessions/{session_id}"))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn list_sessions(
        &self,
        created_since: DateTime<Utc>,
        starting_after: Option<&str>,
    ) -> AppResult<SessionPage> {
        let mut query = vec![
            ("limit", LIST_PAGE_SIZE.to_string()),
            ("created[gte]", created_since.timestamp().to_string()),
        ];
        if let Some(cursor) = starting_after {
            query.push(("starting_after", cursor.to_string()));
        }

        let response = self
            .get("/v1/checkout/sessions")
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn refund(&self, payment_intent: &str, idempotency_key: &str) -> AppResult<String> {
        let response = self
            .post("/v1/refunds")
            .header("Idempotency-Key", idempotency_key)
            .form(&[
                ("payment_intent", payment_intent),
                ("reason", "requested_by_customer"),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let refund: RefundResponse = decode(response).await?;
        tracing::info!(
            payment_intent,
            refund_id = %refund.id,
            status = refund.status.as_deref().unwrap_or("unknown"),
            "Refund issued"
        );
        Ok(refund.id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> AppResult<CheckoutSession> {
        let response = self
            .post("/v1/checkout/sessions")
            .form(&checkout_form(&request))
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::booking_metadata;
    use uuid::Uuid;

    #[test]
    fn test_checkout_form_carries_metadata_and_line_item() {
        let metadata = booking_metadata(Uuid::new_v4(), 2);
        let request = CheckoutRequest {
            product_name: "Jazz night".to_string(),
            unit_amount_minor: 1250,
            quantity: 2,
            currency: "eur".to_string(),
            customer_email: metadata.email.clone(),
            success_url: "https://example.org/ok".to_string(),
            cancel_url: "https://example.org/cancel".to_string(),
            metadata: metadata.clone(),
        };

        let form = checkout_form(&request);
        let value = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(value("line_items[0][quantity]").as_deref(), Some("2"));
        assert_eq!(
            value("line_items[0][price_data][unit_amount]").as_deref(),
            Some("1250")
        );
        assert_eq!(
            value("metadata[event_id]"),
            Some(metadata.event_id.to_string())
        );
        assert_eq!(value("metadata[number_of_places]").as_deref(), Some("2"));
    }
}
