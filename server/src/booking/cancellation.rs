//! Owner-initiated cancellation of a reservation.
//!
//! The reservation is first claimed by flipping it from confirmed to
//! cancelled; only the caller that wins the claim touches inventory. The
//! remaining steps run in a fixed order with no rollback: places are restored
//! first, then tickets and the reservation are deleted. If a later step fails,
//! the event shows too many free places rather than a billed reservation
//! lingering with its seats still taken.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::models::{NewNotification, NotificationType, Reservation, ReservationStatus};
use crate::notifications::templates::CancellationPayload;
use crate::notifications::OutboxTrigger;
use crate::store::Ledger;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationReceipt {
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub places_restored: i32,
    pub available_places: i32,
    pub tickets_deleted: u64,
    /// False when the cancellation email could not be queued.
    pub notification_queued: bool,
}

pub struct CancellationService {
    ledger: Arc<dyn Ledger>,
    outbox: OutboxTrigger,
}

impl CancellationService {
    pub fn new(ledger: Arc<dyn Ledger>, outbox: OutboxTrigger) -> Self {
        Self { ledger, outbox }
    }

    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        caller: &AuthenticatedUser,
    ) -> AppResult<CancellationReceipt> {
        let reservation = self
            .ledger
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Reservation {reservation_id} not found")))?;

        if reservation.user_id != caller.id {
            return Err(AppError::Forbidden(
                "Only the owner can cancel this reservation".to_string(),
            ));
        }
        let already_cancelled =
            || AppError::Conflict(format!("Reservation {reservation_id} is already cancelled"));
        if reservation.status == ReservationStatus::Cancelled {
            return Err(already_cancelled());
        }
        let reservation = self
            .ledger
            .claim_cancellation(reservation_id)
            .await?
            .ok_or_else(already_cancelled)?;

        let available_places = self
            .ledger
            .release_places(reservation.event_id, reservation.number_of_places)
            .await?;
        let tickets_deleted = self.ledger.delete_tickets(reservation.id).await?;
        self.ledger.delete_reservation(reservation.id).await?;

        info!(
            reservation_id = %reservation.id,
            event_id = %reservation.event_id,
            user_id = %caller.id,
            places_restored = reservation.number_of_places,
            available_places,
            tickets_deleted,
            "Reservation cancelled"
        );

        let notification_queued = self.queue_notice(&reservation).await;

        Ok(CancellationReceipt {
            reservation_id: reservation.id,
            event_id: reservation.event_id,
            places_restored: reservation.number_of_places,
            available_places,
            tickets_deleted,
            notification_queued,
        })
    }

    /// The cancellation already happened; a failure here only loses the email.
    async fn queue_notice(&self, reservation: &Reservation) -> bool {
        let queued = async {
            let event = self.ledger.get_event(reservation.event_id).await?.ok_or_else(|| {
                AppError::NotFound(format!("Event {} not found", reservation.event_id))
            })?;
            let payload = serde_json::to_value(CancellationPayload {
                reservation_id: reservation.id,
                event_name: event.name,
                event_date: event.starts_at,
                number_of_places: reservation.number_of_places,
            })
            .map_err(|e| AppError::InternalServerError(format!("Cancellation payload: {e}")))?;

            self.ledger
                .enqueue_notification(NewNotification {
                    notification_type: NotificationType::ReservationCancelled,
                    recipient_email: reservation.email.clone(),
                    recipient_name: reservation.buyer_name(),
                    payload,
                    reservation_id: None,
                })
                .await
        }
        .await;

        match queued {
            Ok(item) => {
                self.outbox.wake();
                info!(reservation_id = %reservation.id, outbox_id = %item.id, "Cancellation notice queued");
                true
            }
            Err(e) => {
                error!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "Could not queue cancellation notice"
                );
                false
            }
        }
    }
}
