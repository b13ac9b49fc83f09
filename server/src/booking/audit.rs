//! Read-only search for paid sessions of a buyer, annotated with whether a
//! reservation exists. Orphans found here are fed to the recovery service.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::CheckoutSession;
use crate::payments::PaymentGateway;
use crate::store::Ledger;
use crate::utils::error::{AppError, AppResult};

/// Hard stop on pagination, in case the provider keeps reporting `has_more`.
const MAX_PAGES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditedPayment {
    pub session_id: String,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub created: i64,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub event_id: Option<Uuid>,
    pub has_reservation: bool,
}

pub struct PaymentAudit {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn Ledger>,
    lookback_days: i64,
}

impl PaymentAudit {
    pub fn new(gateway: Arc<dyn PaymentGateway>, ledger: Arc<dyn Ledger>, lookback_days: i64) -> Self {
        Self {
            gateway,
            ledger,
            lookback_days,
        }
    }

    pub async fn search(&self, email: &str, now: DateTime<Utc>) -> AppResult<Vec<AuditedPayment>> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::ValidationError("A valid email is required".to_string()));
        }

        let since = now - Duration::days(self.lookback_days);
        let mut matching: Vec<CheckoutSession> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self.gateway.list_sessions(since, cursor.as_deref()).await?;
            pages += 1;
            debug!(pages, sessions = page.data.len(), "Fetched session page");

            cursor = page.data.last().map(|session| session.id.clone());
            let has_more = page.has_more;
            matching.extend(
                page.data
                    .into_iter()
                    .filter(|session| session.is_paid() && matches_email(session, &email)),
            );

            if !has_more || cursor.is_none() || pages >= MAX_PAGES {
                break;
            }
        }

        let ids: Vec<String> = matching.iter().map(|s| s.id.clone()).collect();
        let reserved = self.ledger.sessions_with_reservation(&ids).await?;

        let payments: Vec<AuditedPayment> = matching
            .into_iter()
            .map(|session| AuditedPayment {
                has_reservation: reserved.contains(&session.id),
                event_id: session
                    .metadata
                    .get("event_id")
                    .and_then(|raw| raw.parse().ok()),
                customer_email: session.buyer_email().map(str::to_string),
                customer_name: session
                    .customer_details
                    .as_ref()
                    .and_then(|details| details.name.clone()),
                session_id: session.id,
                payment_intent: session.payment_intent,
                amount_total: session.amount_total,
                currency: session.currency,
                created: session.created,
            })
            .collect();

        info!(
            pages,
            found = payments.len(),
            orphaned = payments.iter().filter(|p| !p.has_reservation).count(),
            "Payment audit completed"
        );
        Ok(payments)
    }
}

fn matches_email(session: &CheckoutSession, email: &str) -> bool {
    let details = session
        .customer_details
        .as_ref()
        .and_then(|d| d.email.as_deref());
    [details, session.customer_email.as_deref()]
        .into_iter()
        .flatten()
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(email))
}
