//! Wire types of the payment provider's checkout API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// A signed event delivered to `/webhook`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    pub created: i64,
    /// Echoed back verbatim from session creation.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    /// Email the buyer typed at checkout, falling back to the prefilled one.
    pub fn buyer_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

/// One page of `GET /v1/checkout/sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionPage {
    pub data: Vec<CheckoutSession>,
    pub has_more: bool,
}
