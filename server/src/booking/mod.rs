//! The payment-to-reservation pipeline and the services around it.

pub mod audit;
pub mod cancellation;
pub mod checkout;
pub mod commit;
pub mod recovery;
pub mod saga;

pub use audit::{AuditedPayment, PaymentAudit};
pub use cancellation::{CancellationReceipt, CancellationService};
pub use checkout::{CheckoutInput, CheckoutLink, CheckoutService};
pub use commit::{CommitOutcome, CommitResponse, ReservationCommitter};
pub use recovery::RecoveryService;
