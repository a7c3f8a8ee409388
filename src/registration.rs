//! Registration state machine: one linear questionnaire per requester.
//!
//! A dialogue advances one field per message, re-prompting the same step on
//! invalid input with collected fields preserved. Progress lives behind the
//! [`SessionStore`] capability trait so deployments can keep in-flight
//! dialogues in an external cache; `MemorySessions` is the default
//! in-process implementation with idle-timeout expiry on access.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::fields;
use crate::domain::{DesiredPlace, NewRequest, Place};
use crate::error::{Result, SwapError};

/// Questionnaire steps, in collection order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Contact,
    OrderNo,
    Phone,
    Email,
    OrigDate,
    OrigSlot,
    OrigPlace,
    DesiredDates,
    DesiredSlots,
    DesiredPlace,
}

impl Step {
    pub fn prompt(&self) -> &'static str {
        match self {
            Step::Contact => "How can your swap partner reach you? (e.g. a LINE id)",
            Step::OrderNo => "What is your booking order number?",
            Step::Phone => "What is your phone number?",
            Step::Email => "What is your email address?",
            Step::OrigDate => "Which date is your current booking? (YYYY-MM-DD)",
            Step::OrigSlot => "Which time slot do you hold? (HH:MM-HH:MM)",
            Step::OrigPlace => "Which venue is your booking at? (A or B)",
            Step::DesiredDates => {
                "Which dates would you accept instead? (comma-separated, YYYY-MM-DD)"
            }
            Step::DesiredSlots => {
                "Which time slot on each of those dates? (comma-separated, one per date)"
            }
            Step::DesiredPlace => "Which venue do you want? (A, B or either)",
        }
    }

    fn next(&self) -> Option<Step> {
        match self {
            Step::Contact => Some(Step::OrderNo),
            Step::OrderNo => Some(Step::Phone),
            Step::Phone => Some(Step::Email),
            Step::Email => Some(Step::OrigDate),
            Step::OrigDate => Some(Step::OrigSlot),
            Step::OrigSlot => Some(Step::OrigPlace),
            Step::OrigPlace => Some(Step::DesiredDates),
            Step::DesiredDates => Some(Step::DesiredSlots),
            Step::DesiredSlots => Some(Step::DesiredPlace),
            Step::DesiredPlace => None,
        }
    }
}

/// All fields collected by a finished dialogue
#[derive(Debug, Clone)]
pub struct Registration {
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
}

impl Registration {
    /// Attach the requester identity and a verification code, yielding a
    /// store candidate.
    pub fn into_candidate(self, requester_id: &str, verif_code: String) -> NewRequest {
        NewRequest {
            requester_id: requester_id.to_string(),
            contact: self.contact,
            order_no: self.order_no,
            phone: self.phone,
            email: self.email,
            orig_date: self.orig_date,
            orig_slot: self.orig_slot,
            orig_place: self.orig_place,
            desired_dates: self.desired_dates,
            desired_slots: self.desired_slots,
            desired_place: self.desired_place,
            verif_code,
        }
    }
}

/// Per-requester dialogue progress
#[derive(Debug, Clone)]
pub struct DialogueState {
    step: Step,
    contact: Option<String>,
    order_no: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    orig_date: Option<String>,
    orig_slot: Option<String>,
    orig_place: Option<Place>,
    desired_dates: Option<Vec<String>>,
    desired_slots: Option<Vec<String>>,
    pub last_activity: DateTime<Utc>,
}

/// Result of feeding one message into a dialogue
#[derive(Debug, Clone)]
pub enum Progress {
    /// Field accepted; ask the next question
    Prompt(&'static str),
    /// Final field accepted; the dialogue is finished
    Complete(Box<Registration>),
}

impl DialogueState {
    pub fn new() -> Self {
        Self {
            step: Step::Contact,
            contact: None,
            order_no: None,
            phone: None,
            email: None,
            orig_date: None,
            orig_slot: None,
            orig_place: None,
            desired_dates: None,
            desired_slots: None,
            last_activity: Utc::now(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Apply one message to the current step.
    ///
    /// On `SwapError::Validation` the state is unchanged; the caller
    /// re-prompts the same step with `self.step().prompt()`.
    pub fn apply(&mut self, input: &str) -> Result<Progress> {
        match self.step {
            Step::Contact => {
                self.contact = Some(fields::parse_nonempty(input, "contact")?);
            }
            Step::OrderNo => {
                self.order_no = Some(fields::parse_nonempty(input, "order number")?);
            }
            Step::Phone => {
                self.phone = Some(fields::parse_phone(input)?);
            }
            Step::Email => {
                self.email = Some(fields::parse_email(input)?);
            }
            Step::OrigDate => {
                self.orig_date = Some(fields::parse_date(input)?);
            }
            Step::OrigSlot => {
                self.orig_slot = Some(fields::parse_slot(input)?);
            }
            Step::OrigPlace => {
                self.orig_place = Some(fields::parse_place(input)?);
            }
            Step::DesiredDates => {
                self.desired_dates = Some(fields::parse_date_list(input)?);
            }
            Step::DesiredSlots => {
                let expected = self.desired_dates.as_ref().map(Vec::len).unwrap_or(0);
                self.desired_slots = Some(fields::parse_slot_list(input, expected)?);
            }
            Step::DesiredPlace => {
                let desired_place = fields::parse_desired_place(input)?;
                let registration = self.finish(desired_place)?;
                return Ok(Progress::Complete(Box::new(registration)));
            }
        }

        self.last_activity = Utc::now();
        match self.step.next() {
            Some(next) => {
                self.step = next;
                Ok(Progress::Prompt(next.prompt()))
            }
            // Unreachable: DesiredPlace returned above.
            None => Err(SwapError::Internal(
                "dialogue advanced past its final step".to_string(),
            )),
        }
    }

    fn finish(&self, desired_place: DesiredPlace) -> Result<Registration> {
        let missing = || SwapError::Internal("dialogue completed with a missing field".to_string());
        Ok(Registration {
            contact: self.contact.clone().ok_or_else(missing)?,
            order_no: self.order_no.clone().ok_or_else(missing)?,
            phone: self.phone.clone().ok_or_else(missing)?,
            email: self.email.clone().ok_or_else(missing)?,
            orig_date: self.orig_date.clone().ok_or_else(missing)?,
            orig_slot: self.orig_slot.clone().ok_or_else(missing)?,
            orig_place: self.orig_place.ok_or_else(missing)?,
            desired_dates: self.desired_dates.clone().ok_or_else(missing)?,
            desired_slots: self.desired_slots.clone().ok_or_else(missing)?,
            desired_place,
        })
    }
}

impl Default for DialogueState {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability interface over dialogue persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, requester_id: &str) -> Option<DialogueState>;
    async fn put(&self, requester_id: &str, state: DialogueState);
    async fn delete(&self, requester_id: &str);
}

/// In-process session map with idle-timeout expiry on access
pub struct MemorySessions {
    idle_timeout: Duration,
    inner: Mutex<HashMap<String, DialogueState>>,
}

impl MemorySessions {
    pub fn new(idle_timeout_secs: u64) -> Self {
        Self {
            idle_timeout: Duration::seconds(idle_timeout_secs as i64),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live dialogues
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessions {
    async fn get(&self, requester_id: &str) -> Option<DialogueState> {
        let mut inner = self.inner.lock().await;
        match inner.get(requester_id) {
            Some(state) if Utc::now() - state.last_activity > self.idle_timeout => {
                inner.remove(requester_id);
                None
            }
            Some(state) => Some(state.clone()),
            None => None,
        }
    }

    async fn put(&self, requester_id: &str, state: DialogueState) {
        let mut inner = self.inner.lock().await;
        // Every write sweeps abandoned dialogues, so the map never holds
        // more than the dialogues that were live within one idle window.
        let now = Utc::now();
        inner.retain(|_, s| now - s.last_activity <= self.idle_timeout);
        inner.insert(requester_id.to_string(), state);
    }

    async fn delete(&self, requester_id: &str) {
        self.inner.lock().await.remove(requester_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWERS: [&str; 10] = [
        "@alice",
        "ORD-42",
        "0912-345-678",
        "alice@example.com",
        "2024-12-24",
        "14:00-15:00",
        "A",
        "2024-12-25",
        "10:00-11:00",
        "B",
    ];

    #[test]
    fn test_happy_path_completes() {
        let mut state = DialogueState::new();
        for (i, answer) in ANSWERS.iter().enumerate() {
            match state.apply(answer).unwrap() {
                Progress::Prompt(_) => assert!(i < ANSWERS.len() - 1),
                Progress::Complete(reg) => {
                    assert_eq!(i, ANSWERS.len() - 1);
                    assert_eq!(reg.order_no, "ORD-42");
                    assert_eq!(reg.orig_place, Place::VenueA);
                    assert_eq!(reg.desired_place, DesiredPlace::VenueB);
                }
            }
        }
    }

    #[test]
    fn test_invalid_input_keeps_step_and_fields() {
        let mut state = DialogueState::new();
        state.apply("@alice").unwrap();
        state.apply("ORD-42").unwrap();
        assert_eq!(state.step(), Step::Phone);

        let err = state.apply("not a phone").unwrap_err();
        assert!(matches!(err, SwapError::Validation(_)));
        assert_eq!(state.step(), Step::Phone);
        assert_eq!(state.order_no.as_deref(), Some("ORD-42"));

        state.apply("0912345678").unwrap();
        assert_eq!(state.step(), Step::Email);
    }

    #[test]
    fn test_slot_count_mismatch_repromptable() {
        let mut multi = DialogueState::new();
        for answer in &ANSWERS[..7] {
            multi.apply(answer).unwrap();
        }
        multi.apply("2024-12-25, 2024-12-26").unwrap();
        assert!(multi.apply("10:00-11:00").is_err());
        assert_eq!(multi.step(), Step::DesiredSlots);
        multi.apply("10:00-11:00, 11:00-12:00").unwrap();
        assert_eq!(multi.step(), Step::DesiredPlace);
    }

    #[tokio::test]
    async fn test_sessions_expire_on_access() {
        let sessions = MemorySessions::new(0);
        let mut state = DialogueState::new();
        state.last_activity = Utc::now() - Duration::seconds(5);
        sessions.put("alice", state).await;
        assert!(sessions.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_put_sweeps_abandoned_sessions() {
        let sessions = MemorySessions::new(60);
        let mut stale = DialogueState::new();
        stale.last_activity = Utc::now() - Duration::seconds(120);
        sessions.put("alice", stale).await;
        assert_eq!(sessions.len().await, 1);

        // A write by anyone evicts the dialogue alice walked away from.
        sessions.put("bob", DialogueState::new()).await;
        assert_eq!(sessions.len().await, 1);
        assert!(sessions.get("alice").await.is_none());
        assert!(sessions.get("bob").await.is_some());
    }

    #[tokio::test]
    async fn test_sessions_round_trip() {
        let sessions = MemorySessions::new(1800);
        sessions.put("alice", DialogueState::new()).await;
        assert!(sessions.get("alice").await.is_some());
        sessions.delete("alice").await;
        assert!(sessions.get("alice").await.is_none());
    }
}
