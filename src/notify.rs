//! Verification codes and pairing notifications.
//!
//! The code is a mutual identity confirmation between paired parties, not a
//! security token; it is generated once at creation and never rotated.
//! Delivery is fire-and-forget: the pairing commit is the durable fact and
//! a failed push never rolls it back.

use async_trait::async_trait;
use rand::Rng;

use crate::domain::ExchangeRequest;

/// Generate a uniform 6-digit verification code
pub fn verification_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

/// An outbound push produced by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub target_id: String,
    pub text: String,
}

/// Delivery seam for asynchronous pushes
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best-effort delivery; implementations log failures and return
    async fn push(&self, message: OutgoingMessage);
}

/// The notice one party receives about their counterpart
pub fn pairing_notice(counterpart: &ExchangeRequest) -> String {
    format!(
        "Swap partner found!\n\
         They are offering: {} {} at venue {}\n\
         Contact: {}\n\
         Phone: {}\n\
         Email: {}\n\
         Their verification code: {}\n\
         Exchange codes with each other to confirm the swap.",
        counterpart.orig_date,
        counterpart.orig_slot,
        counterpart.orig_place,
        counterpart.contact,
        counterpart.phone,
        counterpart.email,
        counterpart.verif_code,
    )
}

/// Both pushes for a committed pairing: each side gets the other's details
pub fn pairing_messages(a: &ExchangeRequest, b: &ExchangeRequest) -> [OutgoingMessage; 2] {
    [
        OutgoingMessage {
            target_id: a.requester_id.clone(),
            text: pairing_notice(b),
        },
        OutgoingMessage {
            target_id: b.requester_id.clone(),
            text: pairing_notice(a),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DesiredPlace, Place, RequestStatus};
    use chrono::Utc;

    fn request(requester: &str, code: &str) -> ExchangeRequest {
        ExchangeRequest {
            id: 1,
            requester_id: requester.to_string(),
            contact: format!("@{requester}"),
            order_no: "ORD-1".to_string(),
            phone: "0912345678".to_string(),
            email: format!("{requester}@example.com"),
            orig_date: "2024-12-24".to_string(),
            orig_slot: "14:00-15:00".to_string(),
            orig_place: Place::VenueA,
            desired_dates: vec!["2024-12-25".to_string()],
            desired_slots: vec!["10:00-11:00".to_string()],
            desired_place: DesiredPlace::VenueB,
            verif_code: code.to_string(),
            status: RequestStatus::Matched,
            match_id: Some(1),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_code_is_six_digits() {
        for _ in 0..100 {
            let code = verification_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_each_party_receives_the_counterpart() {
        let a = request("alice", "111111");
        let b = request("bob", "222222");
        let [to_a, to_b] = pairing_messages(&a, &b);

        assert_eq!(to_a.target_id, "alice");
        assert!(to_a.text.contains("@bob"));
        assert!(to_a.text.contains("222222"));
        assert!(!to_a.text.contains("111111"));

        assert_eq!(to_b.target_id, "bob");
        assert!(to_b.text.contains("@alice"));
        assert!(to_b.text.contains("111111"));
    }
}
