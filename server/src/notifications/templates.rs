//! Payload shapes stored in the outbox and the rendering of each
//! notification type. Rendering happens at send time so templates can change
//! without touching queued rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::email::OutgoingEmail;
use crate::models::{NotificationOutboxItem, NotificationType};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSummary {
    pub ticket_code: String,
    pub ticket_number: i32,
    pub participant_name: String,
    /// `data:` URI of the rendered QR image.
    pub qr_image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationPayload {
    pub reservation_id: Uuid,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub event_location: String,
    pub number_of_places: i32,
    pub participants: Vec<String>,
    pub total_amount: Decimal,
    pub currency: String,
    pub tickets: Vec<TicketSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationPayload {
    pub reservation_id: Uuid,
    pub event_name: String,
    pub event_date: DateTime<Utc>,
    pub number_of_places: i32,
}

fn decode<T: DeserializeOwned>(item: &NotificationOutboxItem) -> AppResult<T> {
    serde_json::from_value(item.payload.clone()).map_err(|e| {
        AppError::ValidationError(format!(
            "Unreadable {:?} payload for notification {}: {e}",
            item.notification_type, item.id
        ))
    })
}

pub fn render(item: &NotificationOutboxItem) -> AppResult<OutgoingEmail> {
    let (subject, html) = match item.notification_type {
        NotificationType::ReservationConfirmation => {
            let payload: ConfirmationPayload = decode(item)?;
            (
                format!("Your reservation for {}", payload.event_name),
                confirmation_html(&item.recipient_name, &payload),
            )
        }
        NotificationType::ReservationCancelled => {
            let payload: CancellationPayload = decode(item)?;
            (
                format!("Reservation cancelled: {}", payload.event_name),
                cancellation_html(&item.recipient_name, &payload),
            )
        }
    };

    Ok(OutgoingEmail {
        to: item.recipient_email.clone(),
        subject,
        html,
    })
}

fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%d/%m/%Y %H:%M UTC").to_string()
}

fn confirmation_html(recipient: &str, payload: &ConfirmationPayload) -> String {
    let mut html = format!(
        "<h1>Reservation confirmed</h1>\
         <p>Hello {name},</p>\
         <p>Your reservation for <strong>{event}</strong> is confirmed.</p>\
         <ul><li>Date: {date}</li><li>Location: {location}</li>\
         <li>Places: {places}</li><li>Total paid: {total} {currency}</li></ul>\
         <p>Reference: {reference}</p>",
        name = escape(recipient),
        event = escape(&payload.event_name),
        date = format_date(&payload.event_date),
        location = escape(&payload.event_location),
        places = payload.number_of_places,
        total = payload.total_amount.round_dp(2),
        currency = escape(&payload.currency.to_uppercase()),
        reference = payload.reservation_id,
    );

    for ticket in &payload.tickets {
        html.push_str(&format!(
            "<div class=\"ticket\"><h2>Ticket {number} of {places}: {participant}</h2>\
             <img src=\"{qr}\" alt=\"QR code {code}\" width=\"240\" height=\"240\"/>\
             <p>{code}</p></div>",
            number = ticket.ticket_number,
            places = payload.number_of_places,
            participant = escape(&ticket.participant_name),
            qr = ticket.qr_image,
            code = escape(&ticket.ticket_code),
        ));
    }

    html.push_str("<p>Please show one QR code per participant at the entrance.</p>");
    html
}

fn cancellation_html(recipient: &str, payload: &CancellationPayload) -> String {
    format!(
        "<h1>Reservation cancelled</h1>\
         <p>Hello {name},</p>\
         <p>Your reservation of {places} place(s) for <strong>{event}</strong> on {date} \
         has been cancelled and its tickets are no longer valid.</p>\
         <p>Reference: {reference}</p>",
        name = escape(recipient),
        places = payload.number_of_places,
        event = escape(&payload.event_name),
        date = format_date(&payload.event_date),
        reference = payload.reservation_id,
    )
}
