//! Creation of the hosted checkout session that later completes through the
//! webhook. No places are held here; the commit re-checks availability.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::payments::metadata::{resolve_participants, EventDescriptor};
use crate::payments::{BookingMetadata, CheckoutRequest, PaymentGateway, MINIMUM_CHARGE_MINOR};
use crate::store::Ledger;
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    pub event_id: Uuid,
    pub number_of_places: i32,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Defaults to the authenticated user's email.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLink {
    pub session_id: String,
    pub url: Option<String>,
}

pub struct CheckoutService {
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn PaymentGateway>,
    site_url: String,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn PaymentGateway>,
        site_url: &str,
        currency: &str,
    ) -> Self {
        Self {
            ledger,
            gateway,
            site_url: site_url.trim_end_matches('/').to_string(),
            currency: currency.to_lowercase(),
        }
    }

    pub async fn create(
        &self,
        input: CheckoutInput,
        buyer: &AuthenticatedUser,
    ) -> AppResult<CheckoutLink> {
        if input.number_of_places < 1 {
            return Err(AppError::ValidationError(
                "numberOfPlaces must be at least 1".to_string(),
            ));
        }
        let first_name = input.first_name.trim().to_string();
        if first_name.is_empty() {
            return Err(AppError::ValidationError("firstName is required".to_string()));
        }
        let email = input
            .email
            .as_deref()
            .or(buyer.email.as_deref())
            .map(str::trim)
            .filter(|email| email.contains('@'))
            .ok_or_else(|| AppError::ValidationError("A valid email is required".to_string()))?
            .to_string();

        let event = self
            .ledger
            .get_event(input.event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", input.event_id)))?;

        if event.available_places < input.number_of_places {
            return Err(AppError::ValidationError(format!(
                "Only {} places left for {}",
                event.available_places, event.name
            )));
        }

        let unit_amount_minor = to_minor_units(event.price)?;
        let total_minor = unit_amount_minor * i64::from(input.number_of_places);
        if total_minor < MINIMUM_CHARGE_MINOR {
            return Err(AppError::ValidationError(format!(
                "Total must be at least {MINIMUM_CHARGE_MINOR} minor units, got {total_minor}"
            )));
        }

        let last_name = input.last_name.trim().to_string();
        let participants = resolve_participants(
            input
                .participants
                .into_iter()
                .map(|name| name.trim().to_string())
                .collect(),
            input.number_of_places,
            &format!("{first_name} {last_name}"),
        )?;

        let metadata = BookingMetadata {
            event_id: event.id,
            user_id: buyer.id,
            first_name,
            last_name,
            email: email.clone(),
            phone: input
                .phone
                .map(|phone| phone.trim().to_string())
                .filter(|phone| !phone.is_empty()),
            number_of_places: input.number_of_places,
            total_amount: event.price * Decimal::from(input.number_of_places),
            participants,
            event: Some(EventDescriptor {
                name: event.name.clone(),
                date: event.starts_at,
                location: event.location.clone(),
            }),
        };

        let session = self
            .gateway
            .create_checkout_session(CheckoutRequest {
                product_name: event.name.clone(),
                unit_amount_minor,
                quantity: input.number_of_places,
                currency: self.currency.clone(),
                customer_email: email,
                success_url: format!(
                    "{}/reservation/success?session_id={{CHECKOUT_SESSION_ID}}",
                    self.site_url
                ),
                cancel_url: format!("{}/events/{}", self.site_url, event.id),
                metadata,
            })
            .await?;

        info!(
            session_id = %session.id,
            event_id = %event.id,
            user_id = %buyer.id,
            places = input.number_of_places,
            total_minor,
            "Checkout session created"
        );

        Ok(CheckoutLink {
            session_id: session.id,
            url: session.url,
        })
    }
}

fn to_minor_units(price: Decimal) -> AppResult<i64> {
    (price * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|amount| *amount >= 0)
        .ok_or_else(|| AppError::ValidationError(format!("Invalid event price {price}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedger;
    use crate::testing::{event_with_places, FakeGateway};

    fn input(event_id: Uuid, places: i32, participants: &[&str]) -> CheckoutInput {
        CheckoutInput {
            event_id,
            number_of_places: places,
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: None,
            phone: None,
            participants: participants.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn buyer() -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            email: Some("ada@example.org".to_string()),
        }
    }

    fn service(ledger: &InMemoryLedger, gateway: &Arc<FakeGateway>) -> CheckoutService {
        CheckoutService::new(
            Arc::new(ledger.clone()),
            gateway.clone(),
            "https://tickets.example.org/",
            "EUR",
        )
    }

    #[tokio::test]
    async fn test_creates_session_with_booking_metadata() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(5);
        ledger.insert_event(event.clone()).unwrap();
        let gateway = Arc::new(FakeGateway::default());
        let user = buyer();

        let link = service(&ledger, &gateway)
            .create(input(event.id, 2, &["Ada", "Grace"]), &user)
            .await
            .unwrap();

        let requests = gateway.checkout_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.quantity, 2);
        assert_eq!(request.currency, "eur");
        assert_eq!(request.unit_amount_minor, to_minor_units(event.price).unwrap());
        assert_eq!(request.metadata.user_id, user.id);
        assert_eq!(request.metadata.participants, vec!["Ada", "Grace"]);
        assert_eq!(request.metadata.total_amount, event.price * Decimal::from(2));
        assert!(request.success_url.starts_with("https://tickets.example.org/reservation"));

        assert_eq!(link.session_id, gateway.last_created_id().unwrap());
        // Nothing is held until the payment completes.
        assert_eq!(ledger.event(event.id).unwrap().available_places, 5);
    }

    #[tokio::test]
    async fn test_rejects_more_places_than_available() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(1);
        ledger.insert_event(event.clone()).unwrap();
        let gateway = Arc::new(FakeGateway::default());

        let err = service(&ledger, &gateway)
            .create(input(event.id, 2, &[]), &buyer())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(gateway.checkout_requests().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_total_below_minimum_charge() {
        let ledger = InMemoryLedger::new();
        let mut event = event_with_places(5);
        event.price = Decimal::new(20, 2);
        ledger.insert_event(event.clone()).unwrap();
        let gateway = Arc::new(FakeGateway::default());

        let err = service(&ledger, &gateway)
            .create(input(event.id, 2, &[]), &buyer())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(msg) if msg.contains("minor units")));
    }

    #[tokio::test]
    async fn test_rejects_mismatched_participants() {
        let ledger = InMemoryLedger::new();
        let event = event_with_places(5);
        ledger.insert_event(event.clone()).unwrap();
        let gateway = Arc::new(FakeGateway::default());

        let result = service(&ledger, &gateway)
            .create(input(event.id, 3, &["Ada"]), &buyer())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_minor_units_round_half_away() {
        assert_eq!(to_minor_units(Decimal::new(1999, 2)).unwrap(), 1999);
        assert_eq!(to_minor_units(Decimal::new(12345, 3)).unwrap(), 1235);
    }
}
