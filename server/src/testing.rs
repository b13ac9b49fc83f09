//! Fixtures and fake collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Authenticator};
use crate::config::{Config, EmailConfig, StripeConfig};
use crate::models::{
    CheckoutSession, Event, NewReservation, PaymentMethod, PaymentStatus, Reservation,
    ReservationStatus, SessionPage,
};
use crate::notifications::{EmailProvider, OutgoingEmail};
use crate::payments::metadata::EventDescriptor;
use crate::payments::{BookingMetadata, CheckoutRequest, PaymentGateway};
use crate::utils::error::{AppError, AppResult};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn event_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 6, 21, 20, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// An event with `places` free seats out of `places`, priced 25.00.
pub fn event_with_places(places: i32) -> Event {
    let now = Utc::now();
    Event {
        id: Uuid::new_v4(),
        name: "Jazz night".to_string(),
        location: "Main hall".to_string(),
        starts_at: event_date(),
        price: Decimal::new(2500, 2),
        max_places: places,
        available_places: places,
        created_at: now,
        updated_at: now,
    }
}

pub fn new_reservation(event_id: Uuid, session_id: &str, places: i32) -> NewReservation {
    NewReservation {
        id: Uuid::new_v4(),
        event_id,
        user_id: Uuid::new_v4(),
        stripe_checkout_session_id: session_id.to_string(),
        number_of_places: places,
        total_price: Decimal::new(2500, 2) * Decimal::from(places),
        payment_method: PaymentMethod::Card,
        payment_status: PaymentStatus::Paid,
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.org".to_string(),
        phone: None,
    }
}

pub fn reservation_for(event_id: Uuid, session_id: &str, places: i32) -> Reservation {
    let new = new_reservation(event_id, session_id, places);
    Reservation {
        id: new.id,
        event_id: new.event_id,
        user_id: new.user_id,
        stripe_checkout_session_id: new.stripe_checkout_session_id,
        number_of_places: new.number_of_places,
        total_price: new.total_price,
        payment_method: new.payment_method,
        payment_status: new.payment_status,
        status: ReservationStatus::Confirmed,
        first_name: new.first_name,
        last_name: new.last_name,
        email: new.email,
        phone: new.phone,
        confirmation_email_sent: false,
        created_at: Utc::now(),
    }
}

pub fn booking_metadata(event_id: Uuid, places: i32) -> BookingMetadata {
    let participants = (1..=places)
        .map(|n| {
            if n == 1 {
                "Ada Lovelace".to_string()
            } else {
                format!("Guest {n}")
            }
        })
        .collect();

    BookingMetadata {
        event_id,
        user_id: Uuid::new_v4(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: "ada@example.org".to_string(),
        phone: Some("+33600000000".to_string()),
        number_of_places: places,
        total_amount: Decimal::new(2500, 2) * Decimal::from(places),
        participants,
        event: Some(EventDescriptor {
            name: "Jazz night".to_string(),
            date: event_date(),
            location: "Main hall".to_string(),
        }),
    }
}

/// A completed, paid session whose payment intent is `pi_<session id>`.
pub fn paid_session(session_id: &str, metadata: &BookingMetadata) -> CheckoutSession {
    CheckoutSession {
        id: session_id.to_string(),
        payment_status: "paid".to_string(),
        payment_intent: Some(format!("pi_{session_id}")),
        customer_email: Some(metadata.email.clone()),
        customer_details: None,
        amount_total: Some(2500 * i64::from(metadata.number_of_places)),
        currency: Some("eur".to_string()),
        created: Utc::now().timestamp(),
        metadata: metadata.to_map(),
        url: None,
    }
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/booking_test".to_string(),
        port: 0,
        site_url: "https://tickets.example.org".to_string(),
        currency: "eur".to_string(),
        stripe: StripeConfig {
            api_base: "http://stripe.invalid".to_string(),
            secret_key: "sk_test".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
        },
        email: EmailConfig {
            api_base: "http://email.invalid".to_string(),
            api_key: "re_test".to_string(),
            from: "Reservations <reservations@example.org>".to_string(),
        },
        auth_api_base: "http://auth.invalid".to_string(),
        outbox_poll_interval: Duration::from_secs(3600),
        audit_lookback_days: 90,
    }
}

#[derive(Default)]
struct GatewayState {
    sessions: Vec<CheckoutSession>,
    refunds: Vec<(String, String)>,
    checkout_requests: Vec<CheckoutRequest>,
}

/// In-process payment provider. Sessions are listed in insertion order.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
    page_size: Option<usize>,
    fail_refunds: AtomicBool,
    list_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn add_session(&self, session: CheckoutSession) {
        self.state.lock().unwrap().sessions.push(session);
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// `(payment_intent, idempotency_key)` of every refund call.
    pub fn refunds(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().refunds.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        self.state.lock().unwrap().checkout_requests.clone()
    }

    pub fn last_created_id(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        let count = state.checkout_requests.len();
        (count > 0).then(|| format!("cs_created_{count}"))
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn retrieve_session(&self, session_id: &str) -> AppResult<Option<CheckoutSession>> {
        let state = self.state.lock().unwrap();
        Ok(state.sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn list_sessions(
        &self,
        created_since: DateTime<Utc>,
        starting_after: Option<&str>,
    ) -> AppResult<SessionPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();

        let start = match starting_after {
            Some(cursor) => state
                .sessions
                .iter()
                .position(|s| s.id == cursor)
                .map_or(state.sessions.len(), |i| i + 1),
            None => 0,
        };
        let remaining: Vec<CheckoutSession> = state.sessions[start..]
            .iter()
            .filter(|s| s.created >= created_since.timestamp())
            .cloned()
            .collect();
        let page_size = self.page_size.unwrap_or(100);

        Ok(SessionPage {
            has_more: remaining.len() > page_size,
            data: remaining.into_iter().take(page_size).collect(),
        })
    }

    async fn refund(&self, payment_intent: &str, idempotency_key: &str) -> AppResult<String> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(AppError::ExternalServiceError(
                "Payment provider returned 503".to_string(),
            ));
        }
        let mut state = self.state.lock().unwrap();
        state
            .refunds
            .push((payment_intent.to_string(), idempotency_key.to_string()));
        Ok(format!("re_{}", state.refunds.len()))
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> AppResult<CheckoutSession> {
        let mut state = self.state.lock().unwrap();
        state.checkout_requests.push(request.clone());
        let id = format!("cs_created_{}", state.checkout_requests.len());
        let session = CheckoutSession {
            id: id.clone(),
            payment_status: "unpaid".to_string(),
            payment_intent: None,
            customer_email: Some(request.customer_email.clone()),
            customer_details: None,
            amount_total: Some(request.unit_amount_minor * i64::from(request.quantity)),
            currency: Some(request.currency.clone()),
            created: Utc::now().timestamp(),
            metadata: request.metadata.to_map(),
            url: Some(format!("https://checkout.example.org/{id}")),
        };
        state.sessions.push(session.clone());
        Ok(session)
    }
}

/// Email provider that fails a fixed number of times before accepting.
pub struct ScriptedEmail {
    failures_left: AtomicUsize,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl ScriptedEmail {
    pub fn failing_times(failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailProvider for ScriptedEmail {
    async fn send(&self, email: &OutgoingEmail) -> AppResult<String> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(AppError::ExternalServiceError(
                "Email provider returned 500".to_string(),
            ));
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("msg_{}", sent.len()))
    }
}

/// Accepts a fixed set of tokens.
#[derive(Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, AuthenticatedUser>,
}

impl StaticAuthenticator {
    pub fn with_user(mut self, token: &str, user: AuthenticatedUser) -> Self {
        self.users.insert(token.to_string(), user);
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> AppResult<AuthenticatedUser> {
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| AppError::AuthError("Invalid or expired token".to_string()))
    }
}
