//! Outbox-backed email notifications.

pub mod email;
pub mod outbox;
pub mod templates;

pub use email::{EmailProvider, OutgoingEmail, ResendEmailClient};
pub use outbox::{BatchSummary, OutboxProcessor, OutboxTrigger, BATCH_SIZE};
