//! Mutex-guarded ledger used by tests and local runs without Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{InsertOutcome, Ledger, PlacesDecrement};
use crate::models::outbox::MAX_ATTEMPTS;
use crate::models::{
    Event, NewNotification, NewReservation, NewTicket, NotificationOutboxItem, OutboxStatus,
    Reservation, ReservationStatus, Ticket, TicketStatus,
};
use crate::utils::error::{AppError, AppResult};

#[derive(Default)]
struct LedgerState {
    events: HashMap<Uuid, Event>,
    reservations: HashMap<Uuid, Reservation>,
    tickets: Vec<Ticket>,
    outbox: Vec<NotificationOutboxItem>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    fail_ticket_inserts: Arc<AtomicBool>,
    fail_enqueue: Arc<AtomicBool>,
    fail_confirmation_marks: Arc<AtomicBool>,
    latency: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> AppResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| AppError::InternalServerError("ledger mutex poisoned".to_string()))
    }

    pub fn insert_event(&self, event: Event) -> AppResult<()> {
        self.state()?.events.insert(event.id, event);
        Ok(())
    }

    pub fn event(&self, event_id: Uuid) -> Option<Event> {
        self.state().ok()?.events.get(&event_id).cloned()
    }

    pub fn reservations(&self) -> Vec<Reservation> {
        self.state()
            .map(|state| state.reservations.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<NotificationOutboxItem> {
        self.state()
            .map(|state| state.outbox.clone())
            .unwrap_or_default()
    }

    /// Rows written by older flows may carry `cancelled` instead of being deleted.
    pub fn set_reservation_status(&self, reservation_id: Uuid, status: ReservationStatus) {
        if let Ok(mut state) = self.state() {
            if let Some(reservation) = state.reservations.get_mut(&reservation_id) {
                reservation.status = status;
            }
        }
    }

    /// Makes every following ticket insert fail, to exercise compensation.
    pub fn fail_ticket_inserts(&self, fail: bool) {
        self.fail_ticket_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    pub fn fail_confirmation_marks(&self, fail: bool) {
        self.fail_confirmation_marks.store(fail, Ordering::SeqCst);
    }

    /// Yields to the scheduler before every ledger call, so concurrent
    /// callers interleave the way they would against a real database.
    pub fn with_latency(self) -> Self {
        self.latency.store(true, Ordering::SeqCst);
        self
    }

    async fn pause(&self) {
        if self.latency.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }
}

fn missing_event(event_id: Uuid) -> AppError {
    AppError::NotFound(format!("Event {event_id} does not exist"))
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get_event(&self, event_id: Uuid) -> AppResult<Option<Event>> {
        self.pause().await;
        Ok(self.state()?.events.get(&event_id).cloned())
    }

    async fn reserve_places(&self, event_id: Uuid, places: i32) -> AppResult<PlacesDecrement> {
        self.pause().await;
        let mut state = self.state()?;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or_else(|| missing_event(event_id))?;

        if event.available_places < places {
            return Ok(PlacesDecrement::Insufficient {
                available: event.available_places,
            });
        }

        event.available_places = (event.available_places - places).max(0);
        event.updated_at = Utc::now();
        Ok(PlacesDecrement::Reserved {
            remaining: event.available_places,
        })
    }

    async fn release_places(&self, event_id: Uuid, places: i32) -> AppResult<i32> {
        self.pause().await;
        let mut state = self.state()?;
        let event = state
            .events
            .get_mut(&event_id)
            .ok_or_else(|| missing_event(event_id))?;

        event.available_places = (event.available_places + places).min(event.max_places);
        event.updated_at = Utc::now();
        Ok(event.available_places)
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> AppResult<Option<Reservation>> {
        self.pause().await;
        Ok(self.state()?.reservations.get(&reservation_id).cloned())
    }

    async fn claim_cancellation(&self, reservation_id: Uuid) -> AppResult<Option<Reservation>> {
        self.pause().await;
        let mut state = self.state()?;
        Ok(state
            .reservations
            .get_mut(&reservation_id)
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .map(|r| {
                r.status = ReservationStatus::Cancelled;
                r.clone()
            }))
    }

    async fn find_reservation_by_session(
        &self,
        session_id: &str,
    ) -> AppResult<Option<Reservation>> {
        self.pause().await;
        Ok(self
            .state()?
            .reservations
            .values()
            .find(|r| r.stripe_checkout_session_id == session_id)
            .cloned())
    }

    async fn sessions_with_reservation(
        &self,
        session_ids: &[String],
    ) -> AppResult<HashSet<String>> {
        self.pause().await;
        let state = self.state()?;
        Ok(state
            .reservations
            .values()
            .filter(|r| session_ids.contains(&r.stripe_checkout_session_id))
            .map(|r| r.stripe_checkout_session_id.clone())
            .collect())
    }

    async fn insert_reservation(&self, new: NewReservation) -> AppResult<InsertOutcome> {
        self.pause().await;
        let mut state = self.state()?;

        if let Some(existing) = state
            .reservations
            .values()
            .find(|r| r.stripe_checkout_session_id == new.stripe_checkout_session_id)
        {
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }

        let reservation = Reservation {
            id: new.id,
            event_id: new.event_id,
            user_id: new.user_id,
            stripe_checkout_session_id: new.stripe_checkout_session_id,
            number_of_places: new.number_of_places,
            total_price: new.total_price,
            payment_method: new.payment_method,
            payment_status: new.payment_status,
            status: ReservationStatus::Confirmed,
            first_name: new.first_name,
            last_name: new.last_name,
            email: new.email,
            phone: new.phone,
            confirmation_email_sent: false,
            created_at: Utc::now(),
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(InsertOutcome::Created(reservation))
    }

    async fn delete_reservation(&self, reservation_id: Uuid) -> AppResult<()> {
        self.pause().await;
        let mut state = self.state()?;
        state.reservations.remove(&reservation_id);
        state.tickets.retain(|t| t.reservation_id != reservation_id);
        Ok(())
    }

    async fn mark_confirmation_email_sent(&self, reservation_id: Uuid) -> AppResult<()> {
        self.pause().await;
        if self.fail_confirmation_marks.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        if let Some(reservation) = self.state()?.reservations.get_mut(&reservation_id) {
            reservation.confirmation_email_sent = true;
        }
        Ok(())
    }

    async fn insert_tickets(&self, tickets: Vec<NewTicket>) -> AppResult<Vec<Ticket>> {
        self.pause().await;
        if self.fail_ticket_inserts.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.state()?;
        let now = Utc::now();
        let stored: Vec<Ticket> = tickets
            .into_iter()
            .map(|t| Ticket {
                id: t.id,
                reservation_id: t.reservation_id,
                ticket_code: t.ticket_code,
                participant_name: t.participant_name,
                ticket_number: t.ticket_number,
                qr_code_data: t.qr_code_data,
                status: TicketStatus::Valid,
                created_at: now,
            })
            .collect();

        let duplicate = stored.iter().any(|t| {
            state.tickets.iter().any(|existing| {
                existing.reservation_id == t.reservation_id
                    && existing.ticket_number == t.ticket_number
            })
        });
        if duplicate {
            return Err(AppError::DatabaseError(sqlx::Error::Protocol(
                "duplicate ticket number".to_string(),
            )));
        }

        state.tickets.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn tickets_for_reservation(&self, reservation_id: Uuid) -> AppResult<Vec<Ticket>> {
        self.pause().await;
        let mut tickets: Vec<Ticket> = self
            .state()?
            .tickets
            .iter()
            .filter(|t| t.reservation_id == reservation_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.ticket_number);
        Ok(tickets)
    }

    async fn delete_tickets(&self, reservation_id: Uuid) -> AppResult<u64> {
        self.pause().await;
        let mut state = self.state()?;
        let before = state.tickets.len();
        state.tickets.retain(|t| t.reservation_id != reservation_id);
        Ok((before - state.tickets.len()) as u64)
    }

    async fn enqueue_notification(
        &self,
        new: NewNotification,
    ) -> AppResult<NotificationOutboxItem> {
        self.pause().await;
        if self.fail_enqueue.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }

        let item = NotificationOutboxItem {
            id: Uuid::new_v4(),
            notification_type: new.notification_type,
            recipient_email: new.recipient_email,
            recipient_name: new.recipient_name,
            payload: new.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            reservation_id: new.reservation_id,
            error_message: None,
            created_at: Utc::now(),
            sent_at: None,
        };
        self.state()?.outbox.push(item.clone());
        Ok(item)
    }

    async fn pending_notifications(&self, limit: i64) -> AppResult<Vec<NotificationOutboxItem>> {
        self.pause().await;
        let state = self.state()?;
        let mut pending: Vec<NotificationOutboxItem> = state
            .outbox
            .iter()
            .filter(|item| item.status == OutboxStatus::Pending && item.attempts < MAX_ATTEMPTS)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for identical timestamps.
        pending.sort_by_key(|item| item.created_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn increment_attempts(&self, notification_id: Uuid) -> AppResult<i32> {
        self.pause().await;
        let mut state = self.state()?;
        let item = state
            .outbox
            .iter_mut()
            .find(|item| item.id == notification_id && item.attempts < MAX_ATTEMPTS)
            .ok_or_else(|| {
                AppError::Conflict(format!(
                    "Notification {notification_id} has no attempts left"
                ))
            })?;
        item.attempts += 1;
        Ok(item.attempts)
    }

    async fn mark_notification_sent(&self, notification_id: Uuid) -> AppResult<()> {
        self.pause().await;
        let mut state = self.state()?;
        if let Some(item) = state.outbox.iter_mut().find(|i| i.id == notification_id) {
            item.status = OutboxStatus::Sent;
            item.sent_at = Some(Utc::now());
            item.error_message = None;
        }
        Ok(())
    }

    async fn record_notification_error(
        &self,
        notification_id: Uuid,
        error: &str,
        terminal: bool,
    ) -> AppResult<()> {
        self.pause().await;
        let mut state = self.state()?;
        if let Some(item) = state.outbox.iter_mut().find(|i| i.id == notification_id) {
            item.status = if terminal {
                OutboxStatus::Failed
            } else {
                OutboxStatus::Pending
            };
            item.error_message = Some(error.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{event_with_places, new_reservation};

    #[tokio::test]
    async fn test_reserve_places_never_goes_negative() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(2);
        ledger.insert_event(event.clone()).unwrap();

        let outcome = ledger.reserve_places(event.id, 3).await.unwrap();
        assert_eq!(outcome, PlacesDecrement::Insufficient { available: 2 });

        let outcome = ledger.reserve_places(event.id, 2).await.unwrap();
        assert_eq!(outcome, PlacesDecrement::Reserved { remaining: 0 });
    }

    #[tokio::test]
    async fn test_release_places_is_capped_at_max() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(5);
        ledger.insert_event(event.clone()).unwrap();

        assert_eq!(ledger.release_places(event.id, 4).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_session_reports_existing() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(5);
        ledger.insert_event(event.clone()).unwrap();

        let first = ledger
            .insert_reservation(new_reservation(event.id, "cs_dup", 1))
            .await
            .unwrap();
        let second = ledger
            .insert_reservation(new_reservation(event.id, "cs_dup", 1))
            .await
            .unwrap();

        let InsertOutcome::Created(created) = first else {
            panic!("first insert should create");
        };
        let InsertOutcome::AlreadyExists(existing) = second else {
            panic!("second insert should conflict");
        };
        assert_eq!(created.id, existing.id);
        assert_eq!(ledger.reservations().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_claim_succeeds_once() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(5);
        ledger.insert_event(event.clone()).unwrap();
        let InsertOutcome::Created(reservation) = ledger
            .insert_reservation(new_reservation(event.id, "cs_claim", 2))
            .await
            .unwrap()
        else {
            panic!("expected a new reservation");
        };

        let claimed = ledger.claim_cancellation(reservation.id).await.unwrap();
        assert_eq!(claimed.map(|r| r.status), Some(ReservationStatus::Cancelled));
        assert!(ledger.claim_cancellation(reservation.id).await.unwrap().is_none());
        assert!(ledger.claim_cancellation(Uuid::new_v4()).await.unwrap().is_none());
    }
}
