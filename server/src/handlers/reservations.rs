use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::json_body;
use crate::auth::bearer_token;
use crate::routes::AppState;
use crate::utils::error::AppResult;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReservationRequest {
    pub reservation_id: Uuid,
}

pub async fn cancel_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CancelReservationRequest>, JsonRejection>,
) -> AppResult<Response> {
    let caller = state
        .authenticator
        .authenticate(bearer_token(&headers)?)
        .await?;
    let request = json_body(payload)?;

    let receipt = state
        .cancellation
        .cancel(request.reservation_id, &caller)
        .await?;

    let message = format!("Reservation cancelled, {} place(s) restored", receipt.places_restored);
    Ok(success(receipt, message))
}
