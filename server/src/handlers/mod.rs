use axum::extract::rejection::JsonRejection;
use axum::response::Response;
use axum::Json;
use serde::Serialize;

use crate::utils::error::{AppError, AppResult};
use crate::utils::response::success;

pub mod payments;
pub mod queue;
pub mod reservations;
pub mod webhook;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "booking-api",
    };

    success(payload, "Health check successful")
}

/// Unwraps a JSON body, turning axum's rejection into a 400 in our envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
}
