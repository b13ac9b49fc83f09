//! Persistence seam for events, reservations, tickets and the notification outbox.
//!
//! Uniqueness of the checkout session id is the only thing protecting against
//! duplicate bookings, so `insert_reservation` must report a conflict as
//! [`InsertOutcome::AlreadyExists`] instead of failing.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Event, NewNotification, NewReservation, NewTicket, NotificationOutboxItem, Reservation, Ticket,
};
use crate::utils::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

/// Result of a conditional decrement of an event's available places.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacesDecrement {
    Reserved { remaining: i32 },
    Insufficient { available: i32 },
}

#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(Reservation),
    AlreadyExists(Reservation),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_event(&self, event_id: Uuid) -> AppResult<Option<Event>>;

    /// Decrements `available_places` only if at least `places` remain.
    async fn reserve_places(&self, event_id: Uuid, places: i32) -> AppResult<PlacesDecrement>;

    /// Adds places back, never above `max_places`. Returns the new count.
    async fn release_places(&self, event_id: Uuid, places: i32) -> AppResult<i32>;

    async fn get_reservation(&self, reservation_id: Uuid) -> AppResult<Option<Reservation>>;

    /// Flips a confirmed reservation to cancelled and returns it. `None` means
    /// the row is missing or another caller already claimed it.
    async fn claim_cancellation(&self, reservation_id: Uuid) -> AppResult<Option<Reservation>>;

    async fn find_reservation_by_session(&self, session_id: &str)
        -> AppResult<Option<Reservation>>;

    /// Which of the given checkout sessions already have a reservation.
    async fn sessions_with_reservation(&self, session_ids: &[String])
        -> AppResult<HashSet<String>>;

    async fn insert_reservation(&self, reservation: NewReservation) -> AppResult<InsertOutcome>;

    async fn delete_reservation(&self, reservation_id: Uuid) -> AppResult<()>;

    async fn mark_confirmation_email_sent(&self, reservation_id: Uuid) -> AppResult<()>;

    /// Inserts all tickets in one unit: either every ticket is stored or none.
    async fn insert_tickets(&self, tickets: Vec<NewTicket>) -> AppResult<Vec<Ticket>>;

    async fn tickets_for_reservation(&self, reservation_id: Uuid) -> AppResult<Vec<Ticket>>;

    async fn delete_tickets(&self, reservation_id: Uuid) -> AppResult<u64>;

    async fn enqueue_notification(
        &self,
        notification: NewNotification,
    ) -> AppResult<NotificationOutboxItem>;

    /// Oldest pending items that still have attempts left.
    async fn pending_notifications(&self, limit: i64) -> AppResult<Vec<NotificationOutboxItem>>;

    /// Returns the attempt count after the increment.
    async fn increment_attempts(&self, notification_id: Uuid) -> AppResult<i32>;

    async fn mark_notification_sent(&self, notification_id: Uuid) -> AppResult<()>;

    /// Records a send error. `terminal` moves the item to `failed`.
    async fn record_notification_error(
        &self,
        notification_id: Uuid,
        error: &str,
        terminal: bool,
    ) -> AppResult<()>;
}
