use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::booking::{
    CancellationService, CheckoutService, PaymentAudit, RecoveryService, ReservationCommitter,
};
use crate::config::{create_cors_layer, create_security_headers_layer, Config};
use crate::handlers::payments::{create_checkout_session, recover_payment, search_payments};
use crate::handlers::queue::process_queue;
use crate::handlers::reservations::cancel_reservation;
use crate::handlers::webhook::payment_webhook;
use crate::handlers::health_check;
use crate::notifications::{EmailProvider, OutboxProcessor, OutboxTrigger};
use crate::payments::PaymentGateway;
use crate::store::Ledger;

/// Shared by every handler; cloning only bumps reference counts.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub committer: Arc<ReservationCommitter>,
    pub recovery: Arc<RecoveryService>,
    pub audit: Arc<PaymentAudit>,
    pub cancellation: Arc<CancellationService>,
    pub checkout: Arc<CheckoutService>,
    pub outbox: Arc<OutboxProcessor>,
    pub authenticator: Arc<dyn Authenticator>,
    pub webhook_secret: Arc<str>,
}

impl AppState {
    /// Wires the services on top of the given collaborators. `trigger` must be
    /// the one passed to the spawned outbox loop so enqueues wake it.
    pub fn new(
        config: &Config,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailProvider>,
        authenticator: Arc<dyn Authenticator>,
        trigger: OutboxTrigger,
    ) -> Self {
        let committer = Arc::new(
            ReservationCommitter::new(ledger.clone(), gateway.clone(), trigger.clone())
                .with_default_currency(&config.currency),
        );

        Self {
            recovery: Arc::new(RecoveryService::new(gateway.clone(), committer.clone())),
            audit: Arc::new(PaymentAudit::new(
                gateway.clone(),
                ledger.clone(),
                config.audit_lookback_days,
            )),
            cancellation: Arc::new(CancellationService::new(ledger.clone(), trigger)),
            checkout: Arc::new(CheckoutService::new(
                ledger.clone(),
                gateway,
                &config.site_url,
                &config.currency,
            )),
            outbox: Arc::new(OutboxProcessor::new(ledger.clone(), email)),
            committer,
            ledger,
            authenticator,
            webhook_secret: Arc::from(config.stripe.webhook_secret.as_str()),
        }
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook", post(payment_webhook))
        .route("/recover-payment", post(recover_payment))
        .route("/search-payments", post(search_payments))
        .route("/cancel-reservation", post(cancel_reservation))
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/process-queue", post(process_queue))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer())
        .layer(create_cors_layer())
}
