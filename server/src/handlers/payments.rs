use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::json_body;
use crate::auth::bearer_token;
use crate::booking::{AuditedPayment, CheckoutInput, CommitOutcome};
use crate::models::{Reservation, Ticket};
use crate::routes::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverPaymentRequest {
    pub session_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecoveredReservation {
    reservation: Reservation,
    tickets: Vec<Ticket>,
    already_processed: bool,
}

pub async fn recover_payment(
    State(state): State<AppState>,
    payload: Result<Json<RecoverPaymentRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = json_body(payload)?;
    let outcome = state.recovery.recover(&request.session_id).await?;

    let body = match outcome {
        CommitOutcome::Created {
            reservation,
            tickets,
            ..
        } => RecoveredReservation {
            reservation,
            tickets,
            already_processed: false,
        },
        CommitOutcome::AlreadyProcessed { reservation } => RecoveredReservation {
            tickets: state.ledger.tickets_for_reservation(reservation.id).await?,
            reservation,
            already_processed: true,
        },
    };

    let message = if body.already_processed {
        "Reservation already exists for this session"
    } else {
        "Reservation recovered"
    };
    Ok(success(body, message))
}

#[derive(Debug, Deserialize)]
pub struct SearchPaymentsRequest {
    pub email: String,
}

#[derive(Serialize)]
struct PaymentSearchResult {
    payments: Vec<AuditedPayment>,
    orphaned: usize,
}

pub async fn search_payments(
    State(state): State<AppState>,
    payload: Result<Json<SearchPaymentsRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = json_body(payload)?;
    let payments = state.audit.search(&request.email, Utc::now()).await?;
    let orphaned = payments.iter().filter(|p| !p.has_reservation).count();

    Ok(success(
        PaymentSearchResult { payments, orphaned },
        format!("{orphaned} paid session(s) without reservation"),
    ))
}

pub async fn create_checkout_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CheckoutInput>, JsonRejection>,
) -> AppResult<Response> {
    let user = state
        .authenticator
        .authenticate(bearer_token(&headers)?)
        .await?;
    let input = json_body(payload)?;

    let link = state.checkout.create(input, &user).await?;
    Ok(success(link, "Checkout session created"))
}
