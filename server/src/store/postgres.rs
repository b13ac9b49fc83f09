use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{InsertOutcome, Ledger, PlacesDecrement};
use crate::models::outbox::MAX_ATTEMPTS;
use crate::models::{
    Event, NewNotification, NewReservation, NewTicket, NotificationOutboxItem, OutboxStatus,
    Reservation, ReservationStatus, Ticket,
};
use crate::utils::error::{AppError, AppResult};

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn get_event(&self, event_id: Uuid) -> AppResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    async fn reserve_places(&self, event_id: Uuid, places: i32) -> AppResult<PlacesDecrement> {
        // The guard lives in the WHERE clause so concurrent bookings cannot
        // both pass a stale read.
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE events
               SET available_places = GREATEST(available_places - $2, 0),
                   updated_at = NOW()
             WHERE id = $1 AND available_places >= $2
            RETURNING available_places
            "#,
        )
        .bind(event_id)
        .bind(places)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(remaining) = remaining {
            return Ok(PlacesDecrement::Reserved { remaining });
        }

        let available: Option<i32> =
            sqlx::query_scalar("SELECT available_places FROM events WHERE id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await?;

        match available {
            Some(available) => Ok(PlacesDecrement::Insufficient { available }),
            None => Err(AppError::NotFound(format!("Event {event_id} does not exist"))),
        }
    }

    async fn release_places(&self, event_id: Uuid, places: i32) -> AppResult<i32> {
        let available: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE events
               SET available_places = LEAST(available_places + $2, max_places),
                   updated_at = NOW()
             WHERE id = $1
            RETURNING available_places
            "#,
        )
        .bind(event_id)
        .bind(places)
        .fetch_optional(&self.pool)
        .await?;

        available.ok_or_else(|| AppError::NotFound(format!("Event {event_id} does not exist")))
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> AppResult<Option<Reservation>> {
        let reservation =
            sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
                .bind(reservation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(reservation)
    }

    async fn claim_cancellation(&self, reservation_id: Uuid) -> AppResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(
            r#"
            UPDATE reservations
            SET status = $2
            WHERE id = $1 AND status = $3
            RETURNING *
            "#,
        )
        .bind(reservation_id)
        .bind(ReservationStatus::Cancelled)
        .bind(ReservationStatus::Confirmed)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reservation)
    }

    async fn find_reservation_by_session(
        &self,
        session_id: &str,
    ) -> AppResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE stripe_checkout_session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reservation)
    }

    async fn sessions_with_reservation(
        &self,
        session_ids: &[String],
    ) -> AppResult<HashSet<String>> {
        if session_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let found: Vec<String> = sqlx::query_scalar(
            "SELECT stripe_checkout_session_id FROM reservations \
             WHERE stripe_checkout_session_id = ANY($1)",
        )
        .bind(session_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(found.into_iter().collect())
    }

    async fn insert_reservation(&self, new: NewReservation) -> AppResult<InsertOutcome> {
        let inserted = sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (
                id, event_id, user_id, stripe_checkout_session_id, number_of_places,
                total_price, payment_method, payment_status, status,
                first_name, last_name, email, phone
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'confirmed', $9, $10, $11, $12)
            ON CONFLICT (stripe_checkout_session_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(new.event_id)
        .bind(new.user_id)
        .bind(&new.stripe_checkout_session_id)
        .bind(new.number_of_places)
        .bind(new.total_price)
        .bind(new.payment_method)
        .bind(new.payment_status)
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.phone)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(reservation) = inserted {
            return Ok(InsertOutcome::Created(reservation));
        }

        self.find_reservation_by_session(&new.stripe_checkout_session_id)
            .await?
            .map(InsertOutcome::AlreadyExists)
            .ok_or_else(|| {
                AppError::InternalServerError(format!(
                    "Reservation for session {} conflicted but could not be read back",
                    new.stripe_checkout_session_id
                ))
            })
    }

    async fn delete_reservation(&self, reservation_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_confirmation_email_sent(&self, reservation_id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE reservations SET confirmation_email_sent = TRUE WHERE id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_tickets(&self, tickets: Vec<NewTicket>) -> AppResult<Vec<Ticket>> {
        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        // A single multi-row INSERT is atomic on its own.
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO tickets \
             (id, reservation_id, ticket_code, participant_name, ticket_number, qr_code_data) ",
        );
        builder.push_values(tickets, |mut row, ticket| {
            row.push_bind(ticket.id)
                .push_bind(ticket.reservation_id)
                .push_bind(ticket.ticket_code)
                .push_bind(ticket.participant_name)
                .push_bind(ticket.ticket_number)
                .push_bind(ticket.qr_code_data);
        });
        builder.push(" RETURNING *");

        let mut stored = builder
            .build_query_as::<Ticket>()
            .fetch_all(&self.pool)
            .await?;
        stored.sort_by_key(|ticket| ticket.ticket_number);
        Ok(stored)
    }

    async fn tickets_for_reservation(&self, reservation_id: Uuid) -> AppResult<Vec<Ticket>> {
        let tickets = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE reservation_id = $1 ORDER BY ticket_number",
        )
        .bind(reservation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tickets)
    }

    async fn delete_tickets(&self, reservation_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM tickets WHERE reservation_id = $1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn enqueue_notification(
        &self,
        new: NewNotification,
    ) -> AppResult<NotificationOutboxItem> {
        let item = sqlx::query_as::<_, NotificationOutboxItem>(
            r#"
            INSERT INTO notification_outbox (
                id, notification_type, recipient_email, recipient_name, payload, reservation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.notification_type)
        .bind(&new.recipient_email)
        .bind(&new.recipient_name)
        .bind(&new.payload)
        .bind(new.reservation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(item)
    }

    async fn pending_notifications(&self, limit: i64) -> AppResult<Vec<NotificationOutboxItem>> {
        let items = sqlx::query_as::<_, NotificationOutboxItem>(
            r#"
            SELECT * FROM notification_outbox
             WHERE status = $1 AND attempts < $2
             ORDER BY created_at ASC
             LIMIT $3
            "#,
        )
        .bind(OutboxStatus::Pending)
        .bind(MAX_ATTEMPTS)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn increment_attempts(&self, notification_id: Uuid) -> AppResult<i32> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE notification_outbox SET attempts = attempts + 1 \
             WHERE id = $1 AND attempts < $2 RETURNING attempts",
        )
        .bind(notification_id)
        .bind(MAX_ATTEMPTS)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| {
            AppError::Conflict(format!(
                "Notification {notification_id} has no attempts left"
            ))
        })
    }

    async fn mark_notification_sent(&self, notification_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE notification_outbox \
             SET status = $2, sent_at = NOW(), error_message = NULL WHERE id = $1",
        )
        .bind(notification_id)
        .bind(OutboxStatus::Sent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_notification_error(
        &self,
        notification_id: Uuid,
        error: &str,
        terminal: bool,
    ) -> AppResult<()> {
        let status = if terminal {
            OutboxStatus::Failed
        } else {
            OutboxStatus::Pending
        };

        sqlx::query("UPDATE notification_outbox SET status = $2, error_message = $3 WHERE id = $1")
            .bind(notification_id)
            .bind(status)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
