//! Re-commits a paid session whose webhook delivery was lost.

use std::sync::Arc;

use tracing::info;

use super::commit::{CommitOutcome, ReservationCommitter};
use crate::payments::PaymentGateway;
use crate::utils::error::{AppError, AppResult};

pub struct RecoveryService {
    gateway: Arc<dyn PaymentGateway>,
    committer: Arc<ReservationCommitter>,
}

impl RecoveryService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, committer: Arc<ReservationCommitter>) -> Self {
        Self { gateway, committer }
    }

    /// Safe to call repeatedly: an existing reservation is returned unchanged.
    pub async fn recover(&self, session_id: &str) -> AppResult<CommitOutcome> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AppError::ValidationError("sessionId is required".to_string()));
        }

        let session = self
            .gateway
            .retrieve_session(session_id)
            .await?
            .ok_or_else(|| {
                AppError::ValidationError(format!("Checkout session {session_id} not found"))
            })?;

        if !session.is_paid() {
            return Err(AppError::ValidationError(format!(
                "Checkout session {session_id} is not paid (status: {})",
                session.payment_status
            )));
        }

        info!(session_id, "Recovering checkout session");
        self.committer.commit(&session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::OutboxTrigger;
    use crate::store::InMemoryLedger;
    use crate::testing::{booking_metadata, event_with_places, paid_session, FakeGateway};

    fn service(ledger: &InMemoryLedger, gateway: &Arc<FakeGateway>) -> RecoveryService {
        let committer = Arc::new(ReservationCommitter::new(
            Arc::new(ledger.clone()),
            gateway.clone(),
            OutboxTrigger::new(),
        ));
        RecoveryService::new(gateway.clone(), committer)
    }

    #[tokio::test]
    async fn test_recovers_lost_webhook_once() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(4);
        ledger.insert_event(event.clone()).unwrap();
        let gateway = Arc::new(FakeGateway::default());
        gateway.add_session(paid_session("cs_lost", &booking_metadata(event.id, 2)));
        let recovery = service(&ledger, &gateway);

        let first = recovery.recover("cs_lost").await.unwrap();
        assert!(matches!(first, CommitOutcome::Created { .. }));

        let second = recovery.recover("cs_lost").await.unwrap();
        assert!(matches!(second, CommitOutcome::AlreadyProcessed { .. }));
        assert_eq!(first.reservation().id, second.reservation().id);
        assert_eq!(ledger.event(event.id).unwrap().available_places, 2);
    }

    #[tokio::test]
    async fn test_unknown_session_is_a_validation_error() {
        let ledger = InMemoryLedger::new();
        let gateway = Arc::new(FakeGateway::default());

        let err = service(&ledger, &gateway).recover("cs_missing").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn test_unpaid_session_is_rejected() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(4);
        ledger.insert_event(event.clone()).unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let mut session = paid_session("cs_open", &booking_metadata(event.id, 1));
        session.payment_status = "unpaid".to_string();
        gateway.add_session(session);

        let err = service(&ledger, &gateway).recover("cs_open").await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(ledger.reservations().is_empty());
    }
}
