pub mod event;
pub mod outbox;
pub mod payment;
pub mod reservation;
pub mod ticket;

pub use event::Event;
pub use outbox::{NewNotification, NotificationOutboxItem, NotificationType, OutboxStatus};
pub use payment::{CheckoutSession, SessionPage, WebhookEvent};
pub use reservation::{
    NewReservation, PaymentMethod, PaymentStatus, Reservation, ReservationStatus,
};
pub use ticket::{NewTicket, Ticket, TicketStatus};
