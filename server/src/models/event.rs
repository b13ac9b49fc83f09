use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An event with a bounded number of places.
///
/// `0 <= available_places <= max_places` holds at all times; only the booking
/// commit (decrement) and cancellation (increment) move the counter.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub starts_at: DateTime<Utc>,
    pub price: Decimal,
    pub max_places: i32,
    pub available_places: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
