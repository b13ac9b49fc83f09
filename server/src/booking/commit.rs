//! Turns a paid checkout session into inventory decrement, reservation,
//! tickets and a queued confirmation, exactly once per session.
//!
//! Correctness under concurrent deliveries of the same session rests on the
//! ledger's uniqueness of `stripe_checkout_session_id`, not on locking here.
//! Inventory is taken *before* the reservation row is written, so a crash in
//! between under-counts availability instead of overselling.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::saga::{CommitSaga, CommitStep, Compensation};
use crate::models::{
    CheckoutSession, Event, NewNotification, NewReservation, NotificationType, PaymentMethod,
    PaymentStatus, Reservation, Ticket,
};
use crate::notifications::templates::{ConfirmationPayload, TicketSummary};
use crate::notifications::OutboxTrigger;
use crate::payments::{BookingMetadata, PaymentGateway};
use crate::store::{InsertOutcome, Ledger, PlacesDecrement};
use crate::tickets;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Created {
        reservation: Reservation,
        tickets: Vec<Ticket>,
        remaining_places: i32,
    },
    /// The session was committed earlier; nothing was changed.
    AlreadyProcessed { reservation: Reservation },
}

impl CommitOutcome {
    pub fn reservation(&self) -> &Reservation {
        match self {
            CommitOutcome::Created { reservation, .. }
            | CommitOutcome::AlreadyProcessed { reservation } => reservation,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub reservation_id: Uuid,
    pub already_processed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_places: Option<i32>,
    pub number_of_places: i32,
}

impl From<&CommitOutcome> for CommitResponse {
    fn from(outcome: &CommitOutcome) -> Self {
        let reservation = outcome.reservation();
        Self {
            reservation_id: reservation.id,
            already_processed: matches!(outcome, CommitOutcome::AlreadyProcessed { .. }),
            remaining_places: match outcome {
                CommitOutcome::Created {
                    remaining_places, ..
                } => Some(*remaining_places),
                CommitOutcome::AlreadyProcessed { .. } => None,
            },
            number_of_places: reservation.number_of_places,
        }
    }
}

pub struct ReservationCommitter {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    outbox: OutboxTrigger,
    default_currency: String,
}

impl ReservationCommitter {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        outbox: OutboxTrigger,
    ) -> Self {
        Self {
            ledger,
            gateway,
            outbox,
            default_currency: "eur".to_string(),
        }
    }

    /// Currency shown in confirmations when the session does not carry one.
    pub fn with_default_currency(mut self, currency: &str) -> Self {
        self.default_currency = currency.to_lowercase();
        self
    }

    pub async fn commit(&self, session: &CheckoutSession) -> AppResult<CommitOutcome> {
        if !session.is_paid() {
            return Err(AppError::ValidationError(format!(
                "Checkout session {} is not paid (status: {})",
                session.id, session.payment_status
            )));
        }

        if let Some(reservation) = self.ledger.find_reservation_by_session(&session.id).await? {
            info!(
                session_id = %session.id,
                reservation_id = %reservation.id,
                step = %CommitStep::IdempotencyCheck,
                "Session already committed"
            );
            return Ok(CommitOutcome::AlreadyProcessed { reservation });
        }

        let booking = BookingMetadata::from_session(session)?;
        let event = self.ledger.get_event(booking.event_id).await?.ok_or_else(|| {
            AppError::ValidationError(format!("Unknown event {}", booking.event_id))
        })?;

        if event.available_places < booking.number_of_places {
            return Err(self
                .reject_overbooked(session, &booking, event.available_places)
                .await);
        }

        let mut saga = CommitSaga::begin(self.ledger.clone(), &session.id);

        let remaining_places = match self
            .ledger
            .reserve_places(event.id, booking.number_of_places)
            .await?
        {
            PlacesDecrement::Reserved { remaining } => remaining,
            // Lost a race with a concurrent booking since the read above.
            PlacesDecrement::Insufficient { available } => {
                return Err(self.reject_overbooked(session, &booking, available).await);
            }
        };
        saga.record(Compensation::RestoreInventory {
            event_id: event.id,
            places: booking.number_of_places,
        });

        let reservation = match self
            .ledger
            .insert_reservation(new_reservation(session, &booking))
            .await
        {
            Ok(InsertOutcome::Created(reservation)) => reservation,
            Ok(InsertOutcome::AlreadyExists(reservation)) => {
                info!(
                    session_id = %session.id,
                    reservation_id = %reservation.id,
                    "Concurrent delivery committed first, releasing places"
                );
                saga.unwind(CommitStep::PersistReservation).await;
                return Ok(CommitOutcome::AlreadyProcessed { reservation });
            }
            Err(e) => return Err(fail(saga, CommitStep::PersistReservation, &session.id, e).await),
        };
        saga.record(Compensation::DeleteReservation {
            reservation_id: reservation.id,
        });

        match self.finish(&mut saga, &event, &booking, &reservation, session).await {
            Ok(tickets) => {
                saga.complete();
                self.outbox.wake();
                info!(
                    session_id = %session.id,
                    reservation_id = %reservation.id,
                    event_id = %event.id,
                    places = booking.number_of_places,
                    remaining_places,
                    "Reservation committed"
                );
                Ok(CommitOutcome::Created {
                    reservation,
                    tickets,
                    remaining_places,
                })
            }
            Err((step, e)) => Err(fail(saga, step, &session.id, e).await),
        }
    }

    /// Tickets, QR images and the confirmation email. The caller unwinds the
    /// saga if any of these fail.
    async fn finish(
        &self,
        saga: &mut CommitSaga,
        event: &Event,
        booking: &BookingMetadata,
        reservation: &Reservation,
        session: &CheckoutSession,
    ) -> Result<Vec<Ticket>, (CommitStep, AppError)> {
        let drafts = tickets::build_tickets(
            reservation,
            event.starts_at,
            &booking.participants,
            Utc::now(),
        )
        .map_err(|e| (CommitStep::IssueTickets, e))?;
        let stored = self
            .ledger
            .insert_tickets(drafts)
            .await
            .map_err(|e| (CommitStep::IssueTickets, e))?;
        saga.record(Compensation::DeleteTickets {
            reservation_id: reservation.id,
        });

        let summaries = stored
            .iter()
            .map(|ticket| -> AppResult<TicketSummary> {
                Ok(TicketSummary {
                    ticket_code: ticket.ticket_code.clone(),
                    ticket_number: ticket.ticket_number,
                    participant_name: ticket.participant_name.clone(),
                    qr_image: tickets::render_qr_data_uri(&ticket.qr_code_data)?,
                })
            })
            .collect::<AppResult<Vec<_>>>()
            .map_err(|e| (CommitStep::RenderQrCodes, e))?;

        let payload = ConfirmationPayload {
            reservation_id: reservation.id,
            event_name: event.name.clone(),
            event_date: event.starts_at,
            event_location: event.location.clone(),
            number_of_places: reservation.number_of_places,
            participants: booking.participants.clone(),
            total_amount: reservation.total_price,
            currency: session
                .currency
                .clone()
                .unwrap_or_else(|| self.default_currency.clone()),
            tickets: summaries,
        };
        let payload = serde_json::to_value(&payload).map_err(|e| {
            (
                CommitStep::EnqueueNotification,
                AppError::InternalServerError(format!("Confirmation payload: {e}")),
            )
        })?;

        self.ledger
            .enqueue_notification(NewNotification {
                notification_type: NotificationType::ReservationConfirmation,
                recipient_email: reservation.email.clone(),
                recipient_name: reservation.buyer_name(),
                payload,
                reservation_id: Some(reservation.id),
            })
            .await
            .map_err(|e| (CommitStep::EnqueueNotification, e))?;

        Ok(stored)
    }

    /// Refunds the payment of a session that cannot be honoured. Returns the
    /// error to surface: `Overbooked` once the refund went through, or the
    /// refund failure so the provider redelivers and the refund is retried
    /// under the same idempotency key.
    async fn reject_overbooked(
        &self,
        session: &CheckoutSession,
        booking: &BookingMetadata,
        available: i32,
    ) -> AppError {
        warn!(
            session_id = %session.id,
            event_id = %booking.event_id,
            requested = booking.number_of_places,
            available,
            step = %CommitStep::InventoryCheck,
            "Not enough places, refunding"
        );

        let overbooked = AppError::Overbooked {
            event_id: booking.event_id,
            requested: booking.number_of_places,
            available,
        };

        let Some(payment_intent) = session.payment_intent.as_deref() else {
            error!(
                session_id = %session.id,
                "Overbooked session has no payment intent, refund must be issued manually"
            );
            return overbooked;
        };

        match self
            .gateway
            .refund(payment_intent, &refund_idempotency_key(&session.id))
            .await
        {
            Ok(refund_id) => {
                info!(session_id = %session.id, %refund_id, "Overbooked payment refunded");
                overbooked
            }
            Err(e) => {
                error!(
                    session_id = %session.id,
                    payment_intent,
                    error = %e,
                    "Refund of overbooked payment failed"
                );
                e
            }
        }
    }
}

pub fn refund_idempotency_key(session_id: &str) -> String {
    format!("overbooked-refund-{session_id}")
}

fn new_reservation(session: &CheckoutSession, booking: &BookingMetadata) -> NewReservation {
    NewReservation {
        id: Uuid::new_v4(),
        event_id: booking.event_id,
        user_id: booking.user_id,
        stripe_checkout_session_id: session.id.clone(),
        number_of_places: booking.number_of_places,
        total_price: booking.total_amount,
        payment_method: PaymentMethod::Card,
        payment_status: PaymentStatus::Paid,
        first_name: booking.first_name.clone(),
        last_name: booking.last_name.clone(),
        email: session
            .buyer_email()
            .map(str::to_string)
            .unwrap_or_else(|| booking.email.clone()),
        phone: booking.phone.clone(),
    }
}

async fn fail(saga: CommitSaga, step: CommitStep, session_id: &str, error: AppError) -> AppError {
    error!(
        session_id = %session_id,
        %step,
        error = %error,
        "Commit step failed, compensating"
    );
    saga.unwind(step).await;
    error
}
