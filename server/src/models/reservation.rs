use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Cash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

/// A committed booking. `stripe_checkout_session_id` is the idempotency key:
/// at most one reservation exists per checkout session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub stripe_checkout_session_id: String,
    pub number_of_places: i32,
    pub total_price: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: ReservationStatus,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub confirmation_email_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn buyer_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub stripe_checkout_session_id: String,
    pub number_of_places: i32,
    pub total_price: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}
