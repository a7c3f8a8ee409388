//! Request Store: durable registry of swap requests.
//!
//! The engine and controller depend on the [`RequestStore`] trait, not on a
//! backend. `PostgresStore` is the production implementation; `MemoryStore`
//! backs tests and local dry runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::domain::{ExchangeRequest, NewRequest};
use crate::error::Result;

/// Persistence interface for swap requests.
///
/// `try_commit_pair` and `unmatch_pair` are the concurrency primitives: both
/// are compare-and-set updates over exactly two rows, applied atomically or
/// not at all. A `false` return means some precondition row changed state
/// concurrently and nothing was written.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Insert a new pending request. Fails with `DuplicatePendingRequest`
    /// when the requester already has one.
    async fn insert(&self, candidate: &NewRequest) -> Result<ExchangeRequest>;

    async fn find_pending_by_id(&self, id: i64) -> Result<Option<ExchangeRequest>>;

    async fn find_pending_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<ExchangeRequest>>;

    /// Most recent record for a requester regardless of status (for `status`
    /// queries).
    async fn find_latest_by_requester(
        &self,
        requester_id: &str,
    ) -> Result<Option<ExchangeRequest>>;

    /// All pending requests from other requesters, oldest first. The
    /// compatibility predicate itself lives in the matching engine.
    async fn list_pending_candidates(
        &self,
        exclude_requester: &str,
    ) -> Result<Vec<ExchangeRequest>>;

    /// Atomically mark both rows matched with the given pairing identity.
    /// Returns `false` without writing if either row is no longer pending.
    async fn try_commit_pair(&self, me_id: i64, other_id: i64, match_id: i64) -> Result<bool>;

    /// Cancel a pending request. Returns `false` if it was not pending.
    async fn mark_cancelled(&self, id: i64) -> Result<bool>;

    async fn find_by_order_and_code(
        &self,
        order_no: &str,
        code: &str,
    ) -> Result<Option<ExchangeRequest>>;

    /// Both records of a committed pairing
    async fn find_matched_pair(&self, match_id: i64) -> Result<Vec<ExchangeRequest>>;

    /// Atomically revert both rows of a matched pair to pending, clearing
    /// the pairing identity. Returns `false` if either row is not matched,
    /// or if either requester has an open pending request (reverting would
    /// give them a second one).
    async fn unmatch_pair(&self, a_id: i64, b_id: i64) -> Result<bool>;
}

/// Join a desired date/slot list into its persisted comma-separated form
pub(crate) fn join_list(values: &[String]) -> String {
    values.join(",")
}

/// Split a persisted comma-separated list
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
