use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration venue for the original (held) slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Place {
    VenueA,
    VenueB,
}

impl Place {
    pub fn as_str(&self) -> &'static str {
        match self {
            Place::VenueA => "A",
            Place::VenueB => "B",
        }
    }
}

impl TryFrom<&str> for Place {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_uppercase().as_str() {
            "A" => Ok(Place::VenueA),
            "B" => Ok(Place::VenueB),
            other => Err(format!("unknown place: {other}")),
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Venue constraint on the desired slot; `Either` accepts both venues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DesiredPlace {
    VenueA,
    VenueB,
    Either,
}

impl DesiredPlace {
    pub fn as_str(&self) -> &'static str {
        match self {
            DesiredPlace::VenueA => "A",
            DesiredPlace::VenueB => "B",
            DesiredPlace::Either => "either",
        }
    }

    /// Does a counterpart's original venue satisfy this constraint?
    pub fn accepts(&self, place: Place) -> bool {
        match self {
            DesiredPlace::VenueA => place == Place::VenueA,
            DesiredPlace::VenueB => place == Place::VenueB,
            DesiredPlace::Either => true,
        }
    }
}

impl TryFrom<&str> for DesiredPlace {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "a" => Ok(DesiredPlace::VenueA),
            "b" => Ok(DesiredPlace::VenueB),
            "either" => Ok(DesiredPlace::Either),
            other => Err(format!("unknown desired place: {other}")),
        }
    }
}

impl fmt::Display for DesiredPlace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle states of a swap request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Matched,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Matched => "matched",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<&str> for RequestStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(RequestStatus::Pending),
            "matched" => Ok(RequestStatus::Matched),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// A complete candidate produced by the registration dialogue, not yet stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequest {
    pub requester_id: String,
    pub contact: String,
    pub order_no: String,
    pub phone: String,
    pub email: String,
    /// Single-valued: the slot the requester currently holds
    pub orig_date: String,
    pub orig_slot: String,
    pub orig_place: Place,
    /// Parallel lists: desired_slots[i] is the slot wanted on desired_dates[i]
    pub desired_dates: Vec<String>,
    pub desired_slots: Vec<String>,
    pub desired_place: DesiredPlace,
    /// Assigned once at creation, never regenerated
    pub verif_code: String,
}

/// A stored swap request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub id: i64,
    pub requester_id: String,
    pub contact: String,
    pub order_no: String,
    pub phone: String,
    pub email: String,
    pub orig_date: String,
    pub orig_slot: String,
    pub orig_place: Place,
    pub desired_dates: Vec<String>,
    pub desired_slots: Vec<String>,
    pub desired_place: DesiredPlace,
    pub verif_code: String,
    pub status: RequestStatus,
    pub match_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ExchangeRequest {
    /// Aligned (date, slot) pairs of the desired side
    pub fn desired_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.desired_dates
            .iter()
            .map(String::as_str)
            .zip(self.desired_slots.iter().map(String::as_str))
    }

    /// The desired side reduced to a single scalar wish, if it is one
    pub fn scalar_desire(&self) -> Option<(&str, &str)> {
        match (self.desired_dates.as_slice(), self.desired_slots.as_slice()) {
            ([date], [slot]) => Some((date.as_str(), slot.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_round_trip() {
        assert_eq!(Place::try_from("a").unwrap(), Place::VenueA);
        assert_eq!(Place::try_from(" B ").unwrap(), Place::VenueB);
        assert!(Place::try_from("C").is_err());
        assert_eq!(Place::VenueA.as_str(), "A");
    }

    #[test]
    fn test_desired_place_accepts() {
        assert!(DesiredPlace::Either.accepts(Place::VenueA));
        assert!(DesiredPlace::Either.accepts(Place::VenueB));
        assert!(DesiredPlace::VenueA.accepts(Place::VenueA));
        assert!(!DesiredPlace::VenueA.accepts(Place::VenueB));
    }

    #[test]
    fn test_status_literals() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Matched,
            RequestStatus::Cancelled,
        ] {
            assert_eq!(RequestStatus::try_from(status.as_str()).unwrap(), status);
        }
    }
}
