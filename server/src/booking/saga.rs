//! Compensation log for the multi-step booking commit.
//!
//! Every forward step that changes state registers the step that undoes it.
//! On failure the log is unwound newest first; on success it is discarded.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::store::Ledger;
use crate::utils::error::AppResult;

/// Forward steps of the commit, used to label logs and failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    IdempotencyCheck,
    InventoryCheck,
    ReserveInventory,
    PersistReservation,
    IssueTickets,
    RenderQrCodes,
    EnqueueNotification,
}

impl fmt::Display for CommitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitStep::IdempotencyCheck => "idempotency_check",
            CommitStep::InventoryCheck => "inventory_check",
            CommitStep::ReserveInventory => "reserve_inventory",
            CommitStep::PersistReservation => "persist_reservation",
            CommitStep::IssueTickets => "issue_tickets",
            CommitStep::RenderQrCodes => "render_qr_codes",
            CommitStep::EnqueueNotification => "enqueue_notification",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    RestoreInventory { event_id: Uuid, places: i32 },
    DeleteReservation { reservation_id: Uuid },
    DeleteTickets { reservation_id: Uuid },
}

impl Compensation {
    async fn run(&self, ledger: &dyn Ledger) -> AppResult<()> {
        match self {
            Compensation::RestoreInventory { event_id, places } => {
                ledger.release_places(*event_id, *places).await.map(|_| ())
            }
            Compensation::DeleteReservation { reservation_id } => {
                ledger.delete_reservation(*reservation_id).await
            }
            Compensation::DeleteTickets { reservation_id } => {
                ledger.delete_tickets(*reservation_id).await.map(|_| ())
            }
        }
    }
}

pub struct CommitSaga {
    ledger: Arc<dyn Ledger>,
    session_id: String,
    compensations: Vec<Compensation>,
}

impl CommitSaga {
    pub fn begin(ledger: Arc<dyn Ledger>, session_id: &str) -> Self {
        Self {
            ledger,
            session_id: session_id.to_string(),
            compensations: Vec::new(),
        }
    }

    pub fn record(&mut self, compensation: Compensation) {
        self.compensations.push(compensation);
    }

    pub fn pending(&self) -> &[Compensation] {
        &self.compensations
    }

    /// Forward steps all succeeded; nothing will be undone.
    pub fn complete(mut self) {
        self.compensations.clear();
    }

    /// Undoes every recorded step, newest first. A compensation that fails
    /// is logged with enough context for manual repair and the unwinding
    /// continues with the remaining steps.
    pub async fn unwind(mut self, failed_at: CommitStep) {
        while let Some(compensation) = self.compensations.pop() {
            match compensation.run(self.ledger.as_ref()).await {
                Ok(()) => info!(
                    session_id = %self.session_id,
                    %failed_at,
                    ?compensation,
                    "Compensation applied"
                ),
                Err(e) => error!(
                    session_id = %self.session_id,
                    %failed_at,
                    ?compensation,
                    error = %e,
                    "Compensation failed, manual reconciliation required"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryLedger, InsertOutcome, PlacesDecrement};
    use crate::testing::{event_with_places, new_reservation};

    #[tokio::test]
    async fn test_unwind_runs_newest_first_and_restores_state() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(4);
        ledger.insert_event(event.clone()).unwrap();
        let shared: Arc<dyn Ledger> = Arc::new(ledger.clone());

        let mut saga = CommitSaga::begin(shared.clone(), "cs_saga");
        assert_eq!(
            shared.reserve_places(event.id, 2).await.unwrap(),
            PlacesDecrement::Reserved { remaining: 2 }
        );
        saga.record(Compensation::RestoreInventory {
            event_id: event.id,
            places: 2,
        });
        let InsertOutcome::Created(reservation) = shared
            .insert_reservation(new_reservation(event.id, "cs_saga", 2))
            .await
            .unwrap()
        else {
            panic!("expected a new reservation");
        };
        saga.record(Compensation::DeleteReservation {
            reservation_id: reservation.id,
        });
        assert_eq!(saga.pending().len(), 2);

        saga.unwind(CommitStep::IssueTickets).await;

        assert_eq!(ledger.event(event.id).unwrap().available_places, 4);
        assert!(ledger.reservations().is_empty());
    }

    #[tokio::test]
    async fn test_complete_discards_compensations() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(4);
        ledger.insert_event(event.clone()).unwrap();
        let shared: Arc<dyn Ledger> = Arc::new(ledger.clone());

        shared.reserve_places(event.id, 1).await.unwrap();
        let mut saga = CommitSaga::begin(shared, "cs_done");
        saga.record(Compensation::RestoreInventory {
            event_id: event.id,
            places: 1,
        });
        saga.complete();

        assert_eq!(ledger.event(event.id).unwrap().available_places, 3);
    }
}
