//! Lifecycle controller: routes inbound messages through the registration
//! dialogue, the store and the matching engine, and produces reply text.
//!
//! Pairing notifications go out as asynchronous pushes through the
//! [`Notifier`] seam; the synchronous return value of [`Controller::handle`]
//! is the single reply for the inbound message.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::domain::{ExchangeRequest, RequestStatus};
use crate::error::{Result, SwapError};
use crate::matching::MatchEngine;
use crate::notify::{pairing_messages, verification_code, Notifier, OutgoingMessage};
use crate::registration::{DialogueState, Progress, SessionStore};
use crate::store::RequestStore;

/// Normalized inbound event from the chat transport
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub requester_id: String,
    pub text: String,
}

pub const REPLY_TRY_AGAIN: &str =
    "Something went wrong on our side, please send that again in a moment.";
pub const REPLY_DUPLICATE: &str =
    "You already have a pending swap request. Send 'cancel' first if you want to start over.";
pub const REPLY_NOTHING_PENDING: &str = "You have no pending swap request.";
pub const REPLY_CANCELLED: &str = "Your swap request has been cancelled.";
pub const REPLY_DIALOGUE_CANCELLED: &str = "Registration cancelled.";
pub const REPLY_UNMATCH_BLOCKED: &str =
    "The pairing cannot be undone while one of you has another open request. Cancel it first.";
pub const REPLY_HELP: &str = "Commands:\n\
     swap - register a slot swap request\n\
     cancel - cancel your registration or pending request\n\
     status - show your current request\n\
     unmatch <order_no> <your code> <partner code> - undo a confirmed pairing";

/// Orchestrates registration, store writes, matching and notification
pub struct Controller {
    store: Arc<dyn RequestStore>,
    sessions: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    engine: MatchEngine,
    // One lock per requester: a requester's messages are processed one at a
    // time so dialogue steps cannot interleave.
    requester_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn RequestStore>,
        sessions: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        match_retries: u32,
    ) -> Self {
        let engine = MatchEngine::new(Arc::clone(&store), match_retries);
        Self {
            store,
            sessions,
            notifier,
            engine,
            requester_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process one inbound message to completion and return the reply text
    pub async fn handle(&self, msg: IncomingMessage) -> String {
        let lock = self.requester_lock(&msg.requester_id).await;
        let reply = {
            let _guard = lock.lock().await;
            self.dispatch(&msg).await
        };
        self.release_requester_lock(&msg.requester_id, lock).await;
        reply
    }

    async fn dispatch(&self, msg: &IncomingMessage) -> String {
        let text = msg.text.trim().to_string();
        let requester = msg.requester_id.as_str();

        if let Some(state) = self.sessions.get(requester).await {
            if text.eq_ignore_ascii_case("cancel") {
                self.sessions.delete(requester).await;
                return REPLY_DIALOGUE_CANCELLED.to_string();
            }
            return self.advance_dialogue(requester, state, &text).await;
        }

        let lowered = text.to_lowercase();
        match lowered.as_str() {
            "swap" => self.start_registration(requester).await,
            "cancel" => self.cancel_request(requester).await,
            "status" => self.report_status(requester).await,
            _ if lowered.starts_with("unmatch") => self.unmatch(requester, &text).await,
            _ => REPLY_HELP.to_string(),
        }
    }

    async fn requester_lock(&self, requester_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.requester_locks.lock().await;
        Arc::clone(
            locks
                .entry(requester_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Remove the requester's lock entry once no other task holds it, so the
    /// map does not retain one entry per requester ever seen.
    async fn release_requester_lock(&self, requester_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.requester_locks.lock().await;
        // Two handles left: the map's and ours. Cloning goes through the map
        // mutex we hold, so nobody can grab the entry between check and remove.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(requester_id);
        }
    }

    async fn start_registration(&self, requester: &str) -> String {
        match self.store.find_pending_by_requester(requester).await {
            Ok(Some(_)) => REPLY_DUPLICATE.to_string(),
            Ok(None) => {
                let state = DialogueState::new();
                let prompt = state.step().prompt();
                self.sessions.put(requester, state).await;
                info!(requester, "Registration dialogue started");
                format!("Let's register your swap request.\n{prompt}")
            }
            Err(err) => self.reply_for(requester, err),
        }
    }

    async fn advance_dialogue(
        &self,
        requester: &str,
        mut state: DialogueState,
        text: &str,
    ) -> String {
        match state.apply(text) {
            Ok(Progress::Prompt(prompt)) => {
                self.sessions.put(requester, state).await;
                prompt.to_string()
            }
            Ok(Progress::Complete(registration)) => {
                let candidate =
                    registration.into_candidate(requester, verification_code());
                match self.store.insert(&candidate).await {
                    Ok(inserted) => {
                        self.sessions.delete(requester).await;
                        self.run_matching(inserted).await
                    }
                    Err(SwapError::DuplicatePendingRequest) => {
                        self.sessions.delete(requester).await;
                        REPLY_DUPLICATE.to_string()
                    }
                    Err(err) => {
                        // Dialogue state is kept so the requester can resend
                        // the final answer once the store is back.
                        self.reply_for(requester, err)
                    }
                }
            }
            Err(SwapError::Validation(reason)) => {
                let prompt = state.step().prompt();
                self.sessions.put(requester, state).await;
                format!("{reason}\n{prompt}")
            }
            Err(err) => {
                error!(requester, %err, "Dialogue failed");
                self.sessions.delete(requester).await;
                REPLY_TRY_AGAIN.to_string()
            }
        }
    }

    async fn run_matching(&self, inserted: ExchangeRequest) -> String {
        let confirmation = format!(
            "Your swap request is registered. Your verification code is {}.",
            inserted.verif_code
        );

        match self.engine.run_for(&inserted).await {
            Ok(Some(pairing)) => {
                let [to_me, to_other] = pairing_messages(&pairing.me, &pairing.other);
                self.push_later(to_me);
                self.push_later(to_other);
                format!("{confirmation}\nA matching counterpart was found; check the notification for their details.")
            }
            Ok(None) => format!(
                "{confirmation}\nNo counterpart is available yet; you will be notified when one registers."
            ),
            Err(err) => {
                // The request is durably pending; matching will get another
                // chance when a compatible counterpart registers.
                error!(id = inserted.id, %err, "Matching failed after insert");
                confirmation
            }
        }
    }

    fn push_later(&self, message: OutgoingMessage) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.push(message).await;
        });
    }

    async fn cancel_request(&self, requester: &str) -> String {
        match self.try_cancel(requester).await {
            Ok(()) => REPLY_CANCELLED.to_string(),
            Err(err) => self.reply_for(requester, err),
        }
    }

    async fn try_cancel(&self, requester: &str) -> Result<()> {
        let request = self
            .store
            .find_pending_by_requester(requester)
            .await?
            .ok_or(SwapError::NoPendingRequest)?;

        if self.store.mark_cancelled(request.id).await? {
            info!(requester, id = request.id, "Request cancelled");
            Ok(())
        } else {
            // Matched or already cancelled by a concurrent operation.
            Err(SwapError::NoPendingRequest)
        }
    }

    async fn report_status(&self, requester: &str) -> String {
        match self.store.find_latest_by_requester(requester).await {
            Ok(Some(request)) => match request.status {
                RequestStatus::Pending => format!(
                    "Your request for {} {} is pending; no counterpart yet.",
                    request.orig_date, request.orig_slot
                ),
                RequestStatus::Matched => format!(
                    "Your request for {} {} is matched (pairing #{}).",
                    request.orig_date,
                    request.orig_slot,
                    request.match_id.unwrap_or(request.id)
                ),
                RequestStatus::Cancelled => "Your last request was cancelled.".to_string(),
            },
            Ok(None) => REPLY_NOTHING_PENDING.to_string(),
            Err(err) => self.reply_for(requester, err),
        }
    }

    /// `unmatch <order_no> <my code> <partner code>` — both codes are the
    /// proof that both parties agree to revert the pairing.
    async fn unmatch(&self, requester: &str, text: &str) -> String {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let [_, order_no, my_code, partner_code] = parts.as_slice() else {
            return "Usage: unmatch <order_no> <your code> <partner code>".to_string();
        };

        let mine = match self.store.find_by_order_and_code(order_no, my_code).await {
            Ok(found) => found,
            Err(err) => return self.reply_for(requester, err),
        };

        let Some(mine) = mine else {
            return "No request matches that order number and code.".to_string();
        };
        if mine.requester_id != requester || mine.status != RequestStatus::Matched {
            return "That request is not a confirmed pairing of yours.".to_string();
        }
        let Some(match_id) = mine.match_id else {
            return "That request is not a confirmed pairing of yours.".to_string();
        };

        let pair = match self.store.find_matched_pair(match_id).await {
            Ok(pair) => pair,
            Err(err) => return self.reply_for(requester, err),
        };
        let Some(partner) = pair.iter().find(|r| r.id != mine.id) else {
            warn!(match_id, "Matched record without a partner");
            return REPLY_TRY_AGAIN.to_string();
        };
        if partner.verif_code != *partner_code {
            return "The partner verification code does not match.".to_string();
        }

        // Reverting the pair to pending must not leave either party with two
        // pending records; a new request opened since the pairing blocks it.
        for party in [mine.requester_id.as_str(), partner.requester_id.as_str()] {
            match self.store.find_pending_by_requester(party).await {
                Ok(Some(_)) => return REPLY_UNMATCH_BLOCKED.to_string(),
                Ok(None) => {}
                Err(err) => return self.reply_for(requester, err),
            }
        }

        match self.store.unmatch_pair(mine.id, partner.id).await {
            Ok(true) => {
                info!(match_id, "Pairing reverted to pending");
                "The pairing was undone; both requests are pending again.".to_string()
            }
            Ok(false) => "That pairing is no longer active.".to_string(),
            Err(err) => self.reply_for(requester, err),
        }
    }

    fn reply_for(&self, requester: &str, err: SwapError) -> String {
        match err {
            SwapError::DuplicatePendingRequest => REPLY_DUPLICATE.to_string(),
            SwapError::NoPendingRequest => REPLY_NOTHING_PENDING.to_string(),
            SwapError::StoreUnavailable(reason) => {
                warn!(requester, %reason, "Store unavailable");
                REPLY_TRY_AGAIN.to_string()
            }
            other => {
                error!(requester, %other, "Store operation failed");
                REPLY_TRY_AGAIN.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::MemorySessions;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn push(&self, _message: OutgoingMessage) {}
    }

    fn controller() -> Controller {
        Controller::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySessions::new(1800)),
            Arc::new(NullNotifier),
            3,
        )
    }

    #[tokio::test]
    async fn test_requester_lock_released_after_handle() {
        let controller = controller();
        let reply = controller
            .handle(IncomingMessage {
                requester_id: "alice".to_string(),
                text: "status".to_string(),
            })
            .await;
        assert_eq!(reply, REPLY_NOTHING_PENDING);
        assert!(controller.requester_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_requester_locks_do_not_accumulate() {
        let controller = controller();
        for n in 0..50 {
            controller
                .handle(IncomingMessage {
                    requester_id: format!("user-{n}"),
                    text: "help".to_string(),
                })
                .await;
        }
        assert!(controller.requester_locks.lock().await.is_empty());
    }
}
