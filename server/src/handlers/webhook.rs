use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use tracing::info;

use crate::booking::CommitResponse;
use crate::models::payment::CHECKOUT_SESSION_COMPLETED;
use crate::models::CheckoutSession;
use crate::payments::signature::{self, SIGNATURE_HEADER};
use crate::routes::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::response::{acknowledged, success};

/// `POST /webhook`: the raw body is needed for signature verification, so
/// it is taken as bytes and parsed only after the signature checks out.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let event = signature::construct_event(
        &body,
        header,
        &state.webhook_secret,
        Utc::now().timestamp(),
    )?;

    if event.event_type != CHECKOUT_SESSION_COMPLETED {
        info!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
        return Ok(acknowledged(format!("Event type {} ignored", event.event_type)));
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object).map_err(|e| {
        AppError::ValidationError(format!("Malformed checkout session in event {}: {e}", event.id))
    })?;

    // Delayed payment methods complete the session before the money arrives.
    if !session.is_paid() {
        info!(
            event_id = %event.id,
            session_id = %session.id,
            payment_status = %session.payment_status,
            "Completed session is not paid yet"
        );
        return Ok(acknowledged("Session not paid, nothing to commit"));
    }

    info!(event_id = %event.id, session_id = %session.id, "Committing checkout session");
    let outcome = state.committer.commit(&session).await?;

    Ok(success(
        CommitResponse::from(&outcome),
        "Reservation committed",
    ))
}
