use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Sends are capped at this many attempts per item.
pub const MAX_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ReservationConfirmation,
    ReservationCancelled,
}

/// A queued notification. The payload carries the data needed to render the
/// message, never the rendered message itself. Rows are kept forever.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationOutboxItem {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub recipient_email: String,
    pub recipient_name: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    /// Weak back-reference, only used to flag the confirmation email as sent.
    pub reservation_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub recipient_email: String,
    pub recipient_name: String,
    pub payload: Value,
    pub reservation_id: Option<Uuid>,
}
