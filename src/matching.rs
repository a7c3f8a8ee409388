//! Matching engine: finds a compatible pending counterpart for a
//! just-inserted request and commits the pairing exactly once.
//!
//! The search and the commit are separate steps, so a candidate can be
//! matched or cancelled by a concurrent task in between. The commit is a
//! compare-and-set over both rows (`RequestStore::try_commit_pair`); when it
//! reports a stale candidate the search is retried a bounded number of
//! times, and the request is simply left pending when retries run out.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{ExchangeRequest, RequestStatus};
use crate::error::{Result, SwapError};
use crate::store::RequestStore;

/// A committed pairing, both sides freshly matched
#[derive(Debug, Clone)]
pub struct Pairing {
    pub match_id: i64,
    pub me: ExchangeRequest,
    pub other: ExchangeRequest,
}

/// Is `other` a pairing candidate for `me`?
///
/// The two legs are deliberately not symmetric:
/// - `me`'s desire may enumerate several (date, slot) alternatives, and
///   `other`'s original must hit one of them;
/// - `other`'s desire must be the exact scalar of `me`'s original, never a
///   list containing it;
/// - only `me.desired_place` is checked, against `other.orig_place`. The
///   reverse venue check does not exist in the documented behavior and is
///   not applied.
pub fn is_candidate(me: &ExchangeRequest, other: &ExchangeRequest) -> bool {
    if other.requester_id == me.requester_id {
        return false;
    }

    // Their original must be one of my desired (date, slot) alternatives.
    let offers_what_i_want = me
        .desired_pairs()
        .any(|(date, slot)| date == other.orig_date && slot == other.orig_slot);
    if !offers_what_i_want {
        return false;
    }

    // Their desire must point back exactly at my original.
    let wants_what_i_hold = other.scalar_desire()
        == Some((me.orig_date.as_str(), me.orig_slot.as_str()));
    if !wants_what_i_hold {
        return false;
    }

    me.desired_place.accepts(other.orig_place)
}

/// Pick the winning candidate: earliest `created_at`, id as a stable
/// tiebreak. Callers pass only pending requests from other requesters.
pub fn select_candidate(
    me: &ExchangeRequest,
    candidates: &[ExchangeRequest],
) -> Option<ExchangeRequest> {
    candidates
        .iter()
        .filter(|other| is_candidate(me, other))
        .min_by_key(|other| (other.created_at, other.id))
        .cloned()
}

/// Matching engine over an injected store
pub struct MatchEngine {
    store: Arc<dyn RequestStore>,
    max_retries: u32,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn RequestStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// Search for a counterpart of `me` and commit the pairing.
    ///
    /// Returns `None` when no compatible counterpart exists (the request
    /// stays pending; not an error) or when every candidate went stale
    /// within the retry budget.
    pub async fn run_for(&self, me: &ExchangeRequest) -> Result<Option<Pairing>> {
        for attempt in 0..self.max_retries {
            let candidates = self
                .store
                .list_pending_candidates(&me.requester_id)
                .await?;

            let Some(other) = select_candidate(me, &candidates) else {
                debug!(id = me.id, "No compatible counterpart");
                return Ok(None);
            };

            match self.commit(me, &other).await {
                Ok(pairing) => return Ok(Some(pairing)),
                // Candidate matched or cancelled between search and commit.
                Err(SwapError::StaleMatchCandidate) => {
                    debug!(
                        id = me.id,
                        candidate = other.id,
                        attempt,
                        "Stale match candidate, retrying search"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            id = me.id,
            retries = self.max_retries,
            "Match retries exhausted, leaving request pending"
        );
        Ok(None)
    }

    /// Commit the pairing as one compare-and-set over both rows.
    /// `StaleMatchCandidate` when either row stopped being pending.
    async fn commit(&self, me: &ExchangeRequest, other: &ExchangeRequest) -> Result<Pairing> {
        let match_id = me.id.min(other.id);
        if !self.store.try_commit_pair(me.id, other.id, match_id).await? {
            return Err(SwapError::StaleMatchCandidate);
        }

        info!(match_id, me = me.id, other = other.id, "Pairing committed");
        let mut me = me.clone();
        let mut other = other.clone();
        me.status = RequestStatus::Matched;
        me.match_id = Some(match_id);
        other.status = RequestStatus::Matched;
        other.match_id = Some(match_id);
        Ok(Pairing { match_id, me, other })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DesiredPlace, ExchangeRequest, Place, RequestStatus};
    use chrono::{TimeZone, Utc};

    fn request(id: i64, requester: &str) -> ExchangeRequest {
        ExchangeRequest {
            id,
            requester_id: requester.to_string(),
            contact: format!("@{requester}"),
            order_no: format!("ORD-{id}"),
            phone: "0912345678".to_string(),
            email: format!("{requester}@example.com"),
            orig_date: "2024-12-24".to_string(),
            orig_slot: "14:00-15:00".to_string(),
            orig_place: Place::VenueA,
            desired_dates: vec!["2024-12-25".to_string()],
            desired_slots: vec!["10:00-11:00".to_string()],
            desired_place: DesiredPlace::VenueB,
            verif_code: "111111".to_string(),
            status: RequestStatus::Pending,
            match_id: None,
            created_at: Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap(),
        }
    }

    fn mirror_of(me: &ExchangeRequest, id: i64, requester: &str) -> ExchangeRequest {
        let mut other = request(id, requester);
        other.orig_date = me.desired_dates[0].clone();
        other.orig_slot = me.desired_slots[0].clone();
        other.orig_place = Place::VenueB;
        other.desired_dates = vec![me.orig_date.clone()];
        other.desired_slots = vec![me.orig_slot.clone()];
        other.desired_place = DesiredPlace::VenueA;
        other
    }

    #[test]
    fn test_mirrored_requests_are_candidates() {
        let me = request(1, "alice");
        let other = mirror_of(&me, 2, "bob");
        assert!(is_candidate(&me, &other));
        assert!(is_candidate(&other, &me));
    }

    #[test]
    fn test_same_requester_never_matches() {
        let me = request(1, "alice");
        let other = mirror_of(&me, 2, "alice");
        assert!(!is_candidate(&me, &other));
    }

    #[test]
    fn test_self_shaped_request_not_a_candidate() {
        // Desires exactly what it holds; must not pair with itself.
        let mut me = request(1, "alice");
        me.desired_dates = vec![me.orig_date.clone()];
        me.desired_slots = vec![me.orig_slot.clone()];
        me.desired_place = DesiredPlace::VenueA;
        assert!(!is_candidate(&me, &me.clone()));
    }

    #[test]
    fn test_multi_date_membership_with_aligned_slot() {
        let mut me = request(1, "alice");
        me.desired_dates = vec!["2024-12-25".to_string(), "2024-12-26".to_string()];
        me.desired_slots = vec!["10:00-11:00".to_string(), "16:00-17:00".to_string()];

        let mut other = mirror_of(&me, 2, "bob");
        other.orig_date = "2024-12-26".to_string();
        other.orig_slot = "16:00-17:00".to_string();
        assert!(is_candidate(&me, &other));

        // Right date but the slot aligned with the other date: no match.
        other.orig_slot = "10:00-11:00".to_string();
        assert!(!is_candidate(&me, &other));
    }

    #[test]
    fn test_counterpart_desire_must_be_scalar() {
        let me = request(1, "alice");
        let mut other = mirror_of(&me, 2, "bob");
        other
            .desired_dates
            .push("2024-12-30".to_string());
        other.desired_slots.push("10:00-11:00".to_string());
        // My original is in their list, but list membership does not count.
        assert!(!is_candidate(&me, &other));
    }

    #[test]
    fn test_place_rule_one_directional() {
        let me = request(1, "alice");
        let mut other = mirror_of(&me, 2, "bob");

        // Their venue must satisfy my constraint...
        other.orig_place = Place::VenueA;
        assert!(!is_candidate(&me, &other));
        other.orig_place = Place::VenueB;
        assert!(is_candidate(&me, &other));

        // ...but their constraint is not checked against my venue.
        other.desired_place = DesiredPlace::VenueB; // my orig is VenueA
        assert!(is_candidate(&me, &other));
    }

    #[test]
    fn test_either_accepts_both_venues() {
        let mut me = request(1, "alice");
        me.desired_place = DesiredPlace::Either;
        let mut other = mirror_of(&me, 2, "bob");
        other.orig_place = Place::VenueA;
        assert!(is_candidate(&me, &other));
        other.orig_place = Place::VenueB;
        assert!(is_candidate(&me, &other));
    }

    #[test]
    fn test_fifo_tiebreak() {
        let me = request(1, "alice");
        let mut older = mirror_of(&me, 2, "bob");
        let mut newer = mirror_of(&me, 3, "carol");
        older.created_at = Utc.with_ymd_and_hms(2024, 12, 1, 8, 0, 0).unwrap();
        newer.created_at = Utc.with_ymd_and_hms(2024, 12, 1, 9, 0, 0).unwrap();

        let picked = select_candidate(&me, &[newer.clone(), older.clone()]).unwrap();
        assert_eq!(picked.id, older.id);
    }

    #[test]
    fn test_no_candidates_is_none() {
        let me = request(1, "alice");
        assert!(select_candidate(&me, &[]).is_none());
    }
}
