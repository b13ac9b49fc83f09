//! Payment provider collaborator: checkout sessions, refunds and webhooks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CheckoutSession, SessionPage};
use crate::utils::error::AppResult;

pub mod metadata;
pub mod signature;
pub mod stripe;

pub use metadata::BookingMetadata;
pub use stripe::StripeClient;

/// Smallest charge the provider accepts, in minor currency units.
pub const MINIMUM_CHARGE_MINOR: i64 = 50;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub product_name: String,
    pub unit_amount_minor: i64,
    pub quantity: i32,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BookingMetadata,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// `None` when the provider does not know the session.
    async fn retrieve_session(&self, session_id: &str) -> AppResult<Option<CheckoutSession>>;

    /// One page of sessions created at or after `created_since`, newest first.
    async fn list_sessions(
        &self,
        created_since: DateTime<Utc>,
        starting_after: Option<&str>,
    ) -> AppResult<SessionPage>;

    /// Refunds the full payment. Repeating a call with the same idempotency
    /// key returns the original refund. Returns the refund id.
    async fn refund(&self, payment_intent: &str, idempotency_key: &str) -> AppResult<String>;

    async fn create_checkout_session(&self, request: CheckoutRequest)
        -> AppResult<CheckoutSession>;
}
