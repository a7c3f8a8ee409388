pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod matching;
pub mod notify;
pub mod registration;
pub mod store;

pub use config::AppConfig;
pub use domain::{DesiredPlace, ExchangeRequest, NewRequest, Place, RequestStatus};
pub use error::{Result, SwapError};
pub use lifecycle::{Controller, IncomingMessage};
pub use matching::{is_candidate, select_candidate, MatchEngine, Pairing};
pub use notify::{pairing_messages, verification_code, Notifier, OutgoingMessage};
pub use registration::{DialogueState, MemorySessions, Progress, SessionStore};
pub use store::{MemoryStore, PostgresStore, RequestStore};
