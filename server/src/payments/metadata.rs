//! The metadata map attached to a checkout session at creation and echoed
//! back on completion. It is the only source of the booking's details when
//! the session completes, so parsing is strict.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::CheckoutSession;
use crate::utils::error::{AppError, AppResult};

const EVENT_ID: &str = "event_id";
const USER_ID: &str = "user_id";
const FIRST_NAME: &str = "first_name";
const LAST_NAME: &str = "last_name";
const EMAIL: &str = "email";
const PHONE: &str = "phone";
const NUMBER_OF_PLACES: &str = "number_of_places";
const TOTAL_AMOUNT: &str = "total_amount";
const PARTICIPANTS: &str = "participants";
const EVENT_NAME: &str = "event_name";
const EVENT_DATE: &str = "event_date";
const EVENT_LOCATION: &str = "event_location";

#[derive(Debug, Clone, PartialEq)]
pub struct BookingMetadata {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub number_of_places: i32,
    pub total_amount: Decimal,
    /// Exactly `number_of_places` names, one per ticket.
    pub participants: Vec<String>,
    pub event: Option<EventDescriptor>,
}

/// Informational copy of the event, for the provider's dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDescriptor {
    pub name: String,
    pub date: DateTime<Utc>,
    pub location: String,
}

fn required<'a>(metadata: &'a HashMap<String, String>, key: &str) -> AppResult<&'a str> {
    metadata
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::ValidationError(format!("Missing metadata field '{key}'")))
}

fn parsed<T: FromStr>(metadata: &HashMap<String, String>, key: &str) -> AppResult<T> {
    required(metadata, key)?
        .parse()
        .map_err(|_| AppError::ValidationError(format!("Invalid metadata field '{key}'")))
}

impl BookingMetadata {
    pub fn from_session(session: &CheckoutSession) -> AppResult<Self> {
        Self::from_map(&session.metadata)
    }

    pub fn from_map(metadata: &HashMap<String, String>) -> AppResult<Self> {
        let first_name = required(metadata, FIRST_NAME)?.to_string();
        let last_name = metadata
            .get(LAST_NAME)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();

        let number_of_places: i32 = parsed(metadata, NUMBER_OF_PLACES)?;
        if number_of_places < 1 {
            return Err(AppError::ValidationError(
                "number_of_places must be at least 1".to_string(),
            ));
        }

        let total_amount: Decimal = parsed(metadata, TOTAL_AMOUNT)?;
        if total_amount.is_sign_negative() {
            return Err(AppError::ValidationError(
                "total_amount must not be negative".to_string(),
            ));
        }

        let participants = match metadata.get(PARTICIPANTS).map(|v| v.trim()) {
            Some(raw) if !raw.is_empty() => serde_json::from_str::<Vec<String>>(raw)
                .map_err(|_| {
                    AppError::ValidationError("Invalid metadata field 'participants'".to_string())
                })?
                .into_iter()
                .map(|name| name.trim().to_string())
                .collect(),
            _ => Vec::new(),
        };
        let participants = resolve_participants(
            participants,
            number_of_places,
            &format!("{first_name} {last_name}"),
        )?;

        let event = match (
            metadata.get(EVENT_NAME),
            metadata
                .get(EVENT_DATE)
                .and_then(|d| d.parse::<DateTime<Utc>>().ok()),
            metadata.get(EVENT_LOCATION),
        ) {
            (Some(name), Some(date), Some(location)) => Some(EventDescriptor {
                name: name.clone(),
                date,
                location: location.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            event_id: parsed(metadata, EVENT_ID)?,
            user_id: parsed(metadata, USER_ID)?,
            first_name,
            last_name,
            email: required(metadata, EMAIL)?.to_string(),
            phone: metadata
                .get(PHONE)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            number_of_places,
            total_amount,
            participants,
            event,
        })
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            (EVENT_ID.to_string(), self.event_id.to_string()),
            (USER_ID.to_string(), self.user_id.to_string()),
            (FIRST_NAME.to_string(), self.first_name.clone()),
            (LAST_NAME.to_string(), self.last_name.clone()),
            (EMAIL.to_string(), self.email.clone()),
            (NUMBER_OF_PLACES.to_string(), self.number_of_places.to_string()),
            (TOTAL_AMOUNT.to_string(), self.total_amount.to_string()),
            (
                PARTICIPANTS.to_string(),
                serde_json::Value::from(self.participants.clone()).to_string(),
            ),
        ]);
        if let Some(phone) = &self.phone {
            map.insert(PHONE.to_string(), phone.clone());
        }
        if let Some(event) = &self.event {
            map.insert(EVENT_NAME.to_string(), event.name.clone());
            map.insert(EVENT_DATE.to_string(), event.date.to_rfc3339());
            map.insert(EVENT_LOCATION.to_string(), event.location.clone());
        }
        map
    }

    pub fn buyer_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// No names means every ticket carries the buyer's name.
pub fn resolve_participants(
    participants: Vec<String>,
    number_of_places: i32,
    buyer_name: &str,
) -> AppResult<Vec<String>> {
    let expected = usize::try_from(number_of_places)
        .map_err(|_| AppError::ValidationError("Invalid number of places".to_string()))?;

    if participants.is_empty() {
        return Ok(vec![buyer_name.trim().to_string(); expected]);
    }
    if participants.len() != expected {
        return Err(AppError::ValidationError(format!(
            "Expected {expected} participant names, got {}",
            participants.len()
        )));
    }
    if participants.iter().any(|name| name.trim().is_empty()) {
        return Err(AppError::ValidationError(
            "Participant names must not be empty".to_string(),
        ));
    }
    Ok(participants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::booking_metadata;

    #[test]
    fn test_map_round_trip_keeps_booking() {
        let metadata = booking_metadata(Uuid::new_v4(), 2);
        let parsed = BookingMetadata::from_map(&metadata.to_map()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_missing_event_id_is_a_validation_error() {
        let mut map = booking_metadata(Uuid::new_v4(), 1).to_map();
        map.remove(EVENT_ID);

        let err = BookingMetadata::from_map(&map).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(msg) if msg.contains("event_id")));
    }

    #[test]
    fn test_participant_count_must_match() {
        let mut map = booking_metadata(Uuid::new_v4(), 3).to_map();
        map.insert(PARTICIPANTS.to_string(), "[\"Ada\"]".to_string());

        assert!(BookingMetadata::from_map(&map).is_err());
    }

    #[test]
    fn test_missing_participants_default_to_buyer() {
        let mut map = booking_metadata(Uuid::new_v4(), 2).to_map();
        map.remove(PARTICIPANTS);

        let parsed = BookingMetadata::from_map(&map).unwrap();
        assert_eq!(parsed.participants, vec!["Ada Lovelace", "Ada Lovelace"]);
    }

    #[test]
    fn test_zero_places_rejected() {
        let mut map = booking_metadata(Uuid::new_v4(), 1).to_map();
        map.insert(NUMBER_OF_PLACES.to_string(), "0".to_string());

        assert!(BookingMetadata::from_map(&map).is_err());
    }
}
