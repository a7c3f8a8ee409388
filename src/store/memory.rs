use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::{ExchangeRequest, NewRequest, RequestStatus};
use crate::error::{Result, SwapError};
use crate::store::RequestStore;

/// In-memory store for tests and local dry runs.
///
/// A single mutex guards all rows, which trivially gives every operation
/// the same atomicity the Postgres backend gets from transactions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: Vec<ExchangeRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for test assertions
    pub async fn dump(&self) -> Vec<ExchangeRequest> {
        self.inner.lock().await.rows.clone()
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn insert(&self, candidate: &NewRequest) -> Result<ExchangeRequest> {
        let mut inner = self.inner.lock().await;

        if inner
            .rows
            .iter()
            .any(|r| r.requester_id == candidate.requester_id && r.status == RequestStatus::Pending)
        {
            return Err(SwapError::DuplicatePendingRequest);
        }

        inner.next_id += 1;
        let request = ExchangeRequest {
            id: inner.next_id,
            requester_id: candidate.requester_id.clone(),
            contact: candidate.contact.clone(),
            order_no: candidate.order_no.clone(),
            phone: candidate.phone.clone(),
            email: candidate.email.clone(),
            orig_date: candidate.orig_date.clone(),
            orig_slot: candidate.orig_slot.clone(),
            orig_place: candidate.orig_place,
            desired_dates: candidate.desired_dates.clone(),
            desired_slots: candidate.desired_slots.clone(),
            desired_place: candidate.desired_place,
            verif_code: candidate.verif_code.clone(),
            status: RequestStatus::Pending,
            match_id: None,
            created_at: Utc::now(),
        };
        inner.rows.push(request.clone());
        Ok(request)
    }

    async fn find_pending_by_id(&self, id: i64) -> Result<Option<ExchangeRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .find(|r| r.id == id && r.status == RequestStatus::Pending)
            .cloned())
    }

    async fn find_pending_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<ExchangeRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .find(|r| r.requester_id == requester_id && r.status == RequestStatus::Pending)
            .cloned())
    }

    async fn find_latest_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<ExchangeRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .filter(|r| r.requester_id == requester_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn list_pending_candidates(
        &self,
        exclude_requester: &str,
    ) -> Result<Vec<ExchangeRequest>> {
        let inner = self.inner.lock().await;
        let mut candidates: Vec<ExchangeRequest> = inner
            .rows
            .iter()
            .filter(|r| r.status == RequestStatus::Pending && r.requester_id != exclude_requester)
            .cloned()
            .collect();
        candidates.sort_by_key(|r| (r.created_at, r.id));
        Ok(candidates)
    }

    async fn try_commit_pair(&self, me_id: i64, other_id: i64, match_id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        let both_pending = [me_id, other_id].iter().all(|id| {
            inner
                .rows
                .iter()
                .any(|r| r.id == *id && r.status == RequestStatus::Pending)
        });
        if !both_pending {
            return Ok(false);
        }

        for row in inner
            .rows
            .iter_mut()
            .filter(|r| r.id == me_id || r.id == other_id)
        {
            row.status = RequestStatus::Matched;
            row.match_id = Some(match_id);
        }
        Ok(true)
    }

    async fn mark_cancelled(&self, id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner
            .rows
            .iter_mut()
            .find(|r| r.id == id && r.status == RequestStatus::Pending)
        {
            Some(row) => {
                row.status = RequestStatus::Cancelled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_order_and_code(
        &self,
        order_no: &str,
        code: &str,
    ) -> Result<Option<ExchangeRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .filter(|r| r.order_no == order_no && r.verif_code == code)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn find_matched_pair(&self, match_id: i64) -> Result<Vec<ExchangeRequest>> {
        let inner = self.inner.lock().await;
        let mut pair: Vec<ExchangeRequest> = inner
            .rows
            .iter()
            .filter(|r| r.match_id == Some(match_id) && r.status == RequestStatus::Matched)
            .cloned()
            .collect();
        pair.sort_by_key(|r| r.id);
        Ok(pair)
    }

    async fn unmatch_pair(&self, a_id: i64, b_id: i64) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        let both_matched = [a_id, b_id].iter().all(|id| {
            inner
                .rows
                .iter()
                .any(|r| r.id == *id && r.status == RequestStatus::Matched)
        });
        if !both_matched {
            return Ok(false);
        }

        // Reverting must not give either requester a second pending row.
        let requesters: Vec<String> = inner
            .rows
            .iter()
            .filter(|r| r.id == a_id || r.id == b_id)
            .map(|r| r.requester_id.clone())
            .collect();
        let has_open_request = inner
            .rows
            .iter()
            .any(|r| r.status == RequestStatus::Pending && requesters.contains(&r.requester_id));
        if has_open_request {
            return Ok(false);
        }

        for row in inner.rows.iter_mut().filter(|r| r.id == a_id || r.id == b_id) {
            row.status = RequestStatus::Pending;
            row.match_id = None;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DesiredPlace, Place};

    fn candidate(requester: &str) -> NewRequest {
        NewRequest {
            requester_id: requester.to_string(),
            contact: "@someone".to_string(),
            order_no: "ORD-1".to_string(),
            phone: "0912345678".to_string(),
            email: "someone@example.com".to_string(),
            orig_date: "2024-12-24".to_string(),
            orig_slot: "14:00-15:00".to_string(),
            orig_place: Place::VenueA,
            desired_dates: vec!["2024-12-25".to_string()],
            desired_slots: vec!["10:00-11:00".to_string()],
            desired_place: DesiredPlace::VenueB,
            verif_code: "123456".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_pending_rejected() {
        let store = MemoryStore::new();
        store.insert(&candidate("u1")).await.unwrap();
        let err = store.insert(&candidate("u1")).await.unwrap_err();
        assert!(matches!(err, SwapError::DuplicatePendingRequest));
    }

    #[tokio::test]
    async fn test_cancel_then_reinsert_allowed() {
        let store = MemoryStore::new();
        let first = store.insert(&candidate("u1")).await.unwrap();
        assert!(store.mark_cancelled(first.id).await.unwrap());
        // second cancel is a no-op
        assert!(!store.mark_cancelled(first.id).await.unwrap());
        store.insert(&candidate("u1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_pair_requires_both_pending() {
        let store = MemoryStore::new();
        let a = store.insert(&candidate("u1")).await.unwrap();
        let b = store.insert(&candidate("u2")).await.unwrap();
        assert!(store.mark_cancelled(b.id).await.unwrap());
        assert!(!store.try_commit_pair(a.id, b.id, a.id).await.unwrap());
        // a must be untouched
        assert!(store.find_pending_by_id(a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unmatch_pair_round_trip() {
        let store = MemoryStore::new();
        let a = store.insert(&candidate("u1")).await.unwrap();
        let b = store.insert(&candidate("u2")).await.unwrap();
        assert!(store.try_commit_pair(a.id, b.id, a.id).await.unwrap());
        assert!(store.unmatch_pair(a.id, b.id).await.unwrap());
        assert!(!store.unmatch_pair(a.id, b.id).await.unwrap());
        assert!(store.find_pending_by_id(a.id).await.unwrap().is_some());
        assert!(store.find_pending_by_id(b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unmatch_refused_when_requester_has_open_request() {
        let store = MemoryStore::new();
        let a = store.insert(&candidate("u1")).await.unwrap();
        let b = store.insert(&candidate("u2")).await.unwrap();
        assert!(store.try_commit_pair(a.id, b.id, a.id).await.unwrap());

        // u1 registers again after being matched; the old pair must stay put.
        let fresh = store.insert(&candidate("u1")).await.unwrap();
        assert!(!store.unmatch_pair(a.id, b.id).await.unwrap());

        let pending: Vec<_> = store
            .dump()
            .await
            .into_iter()
            .filter(|r| r.requester_id == "u1" && r.status == RequestStatus::Pending)
            .collect();
        assert_eq!(pending.len(), 1);

        // Once the new request is gone the revert goes through.
        assert!(store.mark_cancelled(fresh.id).await.unwrap());
        assert!(store.unmatch_pair(a.id, b.id).await.unwrap());
        assert!(store.find_pending_by_id(a.id).await.unwrap().is_some());
        assert!(store.find_pending_by_id(b.id).await.unwrap().is_some());
    }
}
