use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Valid,
    Used,
    Void,
}

/// One seat of a reservation. Ticket numbers of a reservation form 1..=N.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub ticket_code: String,
    pub participant_name: String,
    pub ticket_number: i32,
    pub qr_code_data: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub ticket_code: String,
    pub participant_name: String,
    pub ticket_number: i32,
    pub qr_code_data: String,
}
