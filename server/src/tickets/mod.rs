//! Ticket identifiers and QR payloads. Everything here is pure.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{NewTicket, Reservation};
use crate::utils::error::{AppError, AppResult};

const QR_MIN_DIMENSION: u32 = 240;

/// Content encoded in a ticket's QR code and stored in `qr_code_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub ticket_id: Uuid,
    pub ticket_code: String,
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub participant_name: String,
    pub ticket_number: i32,
    pub event_date: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl QrPayload {
    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::InternalServerError(format!("QR payload encoding: {e}")))
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AppError::ValidationError(format!("Unreadable ticket QR payload: {e}")))
    }
}

/// Stable per (reservation, seat): a redelivered webhook recomputes the same id.
pub fn ticket_id(reservation_id: Uuid, ticket_number: i32) -> Uuid {
    Uuid::new_v5(&reservation_id, &ticket_number.to_be_bytes())
}

/// Human readable code printed under the QR image, e.g. `TKT-1F3A9C0B22D4-003`.
pub fn ticket_code(reservation_id: Uuid, ticket_number: i32) -> String {
    let simple = reservation_id.simple().to_string().to_uppercase();
    format!("TKT-{}-{:03}", &simple[..12], ticket_number)
}

/// One ticket per participant, numbered from 1 in participant order.
pub fn build_tickets(
    reservation: &Reservation,
    event_date: DateTime<Utc>,
    participants: &[String],
    issued_at: DateTime<Utc>,
) -> AppResult<Vec<NewTicket>> {
    participants
        .iter()
        .zip(1..)
        .map(|(participant, ticket_number)| -> AppResult<NewTicket> {
            let id = ticket_id(reservation.id, ticket_number);
            let code = ticket_code(reservation.id, ticket_number);
            let payload = QrPayload {
                ticket_id: id,
                ticket_code: code.clone(),
                reservation_id: reservation.id,
                event_id: reservation.event_id,
                participant_name: participant.clone(),
                ticket_number,
                event_date,
                issued_at,
            };

            Ok(NewTicket {
                id,
                reservation_id: reservation.id,
                ticket_code: code,
                participant_name: participant.clone(),
                ticket_number,
                qr_code_data: payload.encode()?,
            })
        })
        .collect()
}

/// Renders a QR payload as an SVG `data:` URI suitable for `<img src>`.
pub fn render_qr_data_uri(payload: &str) -> AppResult<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| AppError::InternalServerError(format!("QR rendering failed: {e}")))?;

    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .quiet_zone(true)
        .build();

    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}
