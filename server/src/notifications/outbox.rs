//! Polling processor for the notification outbox.
//!
//! Each poll takes up to [`BATCH_SIZE`] pending items, oldest first. The
//! attempt counter is bumped *before* sending, so a crash mid-send still
//! consumes one of the [`MAX_ATTEMPTS`] attempts: delivery is at-least-once
//! with a hard cap.
//!
//! Batches are serialized inside one processor, so the polling loop and a
//! manual `/process-queue` call never pick up the same rows. Only one
//! processor may run against a given database. Two processes would both
//! select the same pending rows; scaling out needs a claim step
//! (conditional "processing by worker X" update) that this loop does not have.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::email::EmailProvider;
use super::templates;
use crate::models::outbox::MAX_ATTEMPTS;
use crate::models::{NotificationOutboxItem, NotificationType};
use crate::store::Ledger;
use crate::utils::error::AppResult;

pub const BATCH_SIZE: i64 = 10;

/// Wakes the processor right after an enqueue instead of waiting for the timer.
#[derive(Clone, Default)]
pub struct OutboxTrigger(Arc<Notify>);

impl OutboxTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        self.0.notify_one();
    }

    async fn woken(&self) {
        self.0.notified().await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub sent: usize,
    /// Failed sends that will be retried on a later poll.
    pub retried: usize,
    /// Failed sends that used up the last attempt.
    pub failed: usize,
}

enum ItemOutcome {
    Sent,
    Retry,
    Failed,
}

pub struct OutboxProcessor {
    ledger: Arc<dyn Ledger>,
    email: Arc<dyn EmailProvider>,
    batch_lock: Mutex<()>,
}

impl OutboxProcessor {
    pub fn new(ledger: Arc<dyn Ledger>, email: Arc<dyn EmailProvider>) -> Self {
        Self {
            ledger,
            email,
            batch_lock: Mutex::new(()),
        }
    }

    /// Processes one batch. A failing item never stops the rest of the batch.
    /// A call made while another batch is running waits for it to finish.
    pub async fn process_batch(&self) -> AppResult<BatchSummary> {
        let _running = self.batch_lock.lock().await;
        let items = self.ledger.pending_notifications(BATCH_SIZE).await?;
        let mut summary = BatchSummary::default();

        for item in items {
            summary.processed += 1;
            match self.process_item(&item).await {
                Ok(ItemOutcome::Sent) => summary.sent += 1,
                Ok(ItemOutcome::Retry) => summary.retried += 1,
                Ok(ItemOutcome::Failed) => summary.failed += 1,
                Err(e) => {
                    error!(outbox_id = %item.id, error = %e, "Outbox bookkeeping failed");
                    summary.retried += 1;
                }
            }
        }

        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                sent = summary.sent,
                retried = summary.retried,
                failed = summary.failed,
                "Outbox batch processed"
            );
        }
        Ok(summary)
    }

    async fn process_item(&self, item: &NotificationOutboxItem) -> AppResult<ItemOutcome> {
        let attempts = self.ledger.increment_attempts(item.id).await?;

        let delivery = match templates::render(item) {
            Ok(email) => self.email.send(&email).await,
            Err(e) => Err(e),
        };

        match delivery {
            Ok(message_id) => {
                self.ledger.mark_notification_sent(item.id).await?;
                if let (NotificationType::ReservationConfirmation, Some(reservation_id)) =
                    (item.notification_type, item.reservation_id)
                {
                    // The email is out; a stale flag must not turn it into a retry.
                    if let Err(e) = self
                        .ledger
                        .mark_confirmation_email_sent(reservation_id)
                        .await
                    {
                        error!(
                            outbox_id = %item.id,
                            reservation_id = %reservation_id,
                            error = %e,
                            "Could not flag confirmation email as sent"
                        );
                    }
                }
                info!(
                    outbox_id = %item.id,
                    reservation_id = ?item.reservation_id,
                    attempts,
                    message_id = %message_id,
                    "Notification sent"
                );
                Ok(ItemOutcome::Sent)
            }
            Err(e) => {
                let message = e.to_string();
                let terminal = attempts >= MAX_ATTEMPTS;
                self.ledger
                    .record_notification_error(item.id, &message, terminal)
                    .await?;

                if terminal {
                    error!(
                        outbox_id = %item.id,
                        reservation_id = ?item.reservation_id,
                        attempts,
                        error = %message,
                        "Notification failed permanently"
                    );
                    Ok(ItemOutcome::Failed)
                } else {
                    warn!(
                        outbox_id = %item.id,
                        attempts,
                        error = %message,
                        "Notification send failed, will retry"
                    );
                    Ok(ItemOutcome::Retry)
                }
            }
        }
    }

    /// Runs batches on every tick and on every trigger until the runtime stops.
    pub fn spawn(self: Arc<Self>, interval: Duration, trigger: OutboxTrigger) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = trigger.woken() => {}
                }

                if let Err(e) = self.process_batch().await {
                    error!(error = %e, "Outbox poll failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewNotification, OutboxStatus};
    use crate::notifications::templates::ConfirmationPayload;
    use crate::store::InMemoryLedger;
    use crate::testing::ScriptedEmail;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn cancellation_notice(email: &str) -> NewNotification {
        NewNotification {
            notification_type: NotificationType::ReservationCancelled,
            recipient_email: email.to_string(),
            recipient_name: "Ada".to_string(),
            payload: json!({
                "reservationId": uuid::Uuid::new_v4(),
                "eventName": "Jazz night",
                "eventDate": "2026-11-01T20:00:00Z",
                "numberOfPlaces": 2
            }),
            reservation_id: None,
        }
    }

    fn processor(ledger: &InMemoryLedger, email: &Arc<ScriptedEmail>) -> OutboxProcessor {
        OutboxProcessor::new(Arc::new(ledger.clone()), email.clone())
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let ledger = InMemoryLedger::new();
        let email = Arc::new(ScriptedEmail::failing_times(2));
        let processor = processor(&ledger, &email);
        ledger
            .enqueue_notification(cancellation_notice("ada@example.org"))
            .await
            .unwrap();

        assert_eq!(processor.process_batch().await.unwrap().retried, 1);
        assert_eq!(processor.process_batch().await.unwrap().retried, 1);
        assert_eq!(processor.process_batch().await.unwrap().sent, 1);

        let item = &ledger.notifications()[0];
        assert_eq!(item.status, OutboxStatus::Sent);
        assert_eq!(item.attempts, 3);
        assert!(item.sent_at.is_some());
        assert!(item.error_message.is_none());
        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_are_terminal() {
        let ledger = InMemoryLedger::new();
        let email = Arc::new(ScriptedEmail::failing_times(10));
        let processor = processor(&ledger, &email);
        ledger
            .enqueue_notification(cancellation_notice("ada@example.org"))
            .await
            .unwrap();

        for _ in 0..3 {
            processor.process_batch().await.unwrap();
        }
        let summary = processor.process_batch().await.unwrap();
        assert_eq!(summary.processed, 0);

        let item = &ledger.notifications()[0];
        assert_eq!(item.status, OutboxStatus::Failed);
        assert_eq!(item.attempts, 3);
        assert!(item.error_message.is_some());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_batch() {
        let ledger = InMemoryLedger::new();
        let email = Arc::new(ScriptedEmail::failing_times(1));
        let processor = processor(&ledger, &email);
        for address in ["first@example.org", "second@example.org"] {
            ledger
                .enqueue_notification(cancellation_notice(address))
                .await
                .unwrap();
        }

        let summary = processor.process_batch().await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                processed: 2,
                sent: 1,
                retried: 1,
                failed: 0
            }
        );
        assert_eq!(email.sent()[0].to, "second@example.org");
    }

    #[tokio::test]
    async fn test_batch_is_capped_and_oldest_first() {
        let ledger = InMemoryLedger::new();
        let email = Arc::new(ScriptedEmail::failing_times(0));
        let processor = processor(&ledger, &email);
        for n in 0..12 {
            ledger
                .enqueue_notification(cancellation_notice(&format!("user{n}@example.org")))
                .await
                .unwrap();
        }

        let summary = processor.process_batch().await.unwrap();
        assert_eq!(summary.sent, 10);
        assert_eq!(email.sent()[0].to, "user0@example.org");

        let summary = processor.process_batch().await.unwrap();
        assert_eq!(summary.sent, 2);
    }

    #[tokio::test]
    async fn test_concurrent_batches_send_each_item_once() {
        let ledger = InMemoryLedger::new().with_latency();
        let email = Arc::new(ScriptedEmail::failing_times(0));
        let processor = processor(&ledger, &email);
        ledger
            .enqueue_notification(cancellation_notice("ada@example.org"))
            .await
            .unwrap();

        let (first, second) = tokio::join!(processor.process_batch(), processor.process_batch());

        assert_eq!(first.unwrap().sent + second.unwrap().sent, 1);
        assert_eq!(email.sent().len(), 1);
        assert_eq!(ledger.notifications()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_confirmation_flag_failure_still_counts_as_sent() {
        let ledger = InMemoryLedger::new();
        let email = Arc::new(ScriptedEmail::failing_times(0));
        let processor = processor(&ledger, &email);
        let payload = ConfirmationPayload {
            reservation_id: uuid::Uuid::new_v4(),
            event_name: "Jazz night".to_string(),
            event_date: Utc::now(),
            event_location: "Blue Room".to_string(),
            number_of_places: 1,
            participants: vec!["Ada Lovelace".to_string()],
            total_amount: Decimal::new(2500, 2),
            currency: "eur".to_string(),
            tickets: Vec::new(),
        };
        ledger
            .enqueue_notification(NewNotification {
                notification_type: NotificationType::ReservationConfirmation,
                recipient_email: "ada@example.org".to_string(),
                recipient_name: "Ada Lovelace".to_string(),
                payload: serde_json::to_value(&payload).unwrap(),
                reservation_id: Some(payload.reservation_id),
            })
            .await
            .unwrap();
        ledger.fail_confirmation_marks(true);

        let summary = processor.process_batch().await.unwrap();

        assert_eq!(summary.sent, 1);
        assert_eq!(summary.retried, 0);
        assert_eq!(ledger.notifications()[0].status, OutboxStatus::Sent);
        assert_eq!(email.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_wakes_spawned_processor() {
        let ledger = InMemoryLedger::new();
        let email = Arc::new(ScriptedEmail::failing_times(0));
        let trigger = OutboxTrigger::new();
        let handle = Arc::new(processor(&ledger, &email))
            .spawn(Duration::from_secs(3600), trigger.clone());

        // Let the first immediate tick run on an empty queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger
            .enqueue_notification(cancellation_notice("ada@example.org"))
            .await
            .unwrap();
        trigger.wake();

        for _ in 0..50 {
            if !email.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(email.sent().len(), 1);
    }
}
