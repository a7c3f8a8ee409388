use thiserror::Error;

/// Main error type for the slot-swap service
#[derive(Error, Debug)]
pub enum SwapError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Request lifecycle errors (user-recoverable, mapped to reply text)
    #[error("Requester already has a pending request")]
    DuplicatePendingRequest,

    #[error("No eligible request for this operation")]
    NoPendingRequest,

    #[error("Validation failed: {0}")]
    Validation(String),

    // Matching errors
    #[error("Match candidate went stale between search and commit")]
    StaleMatchCandidate,

    // Transient storage failure, surfaced to the user as "try again"
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SwapError {
    /// True for errors the controller answers with a user-facing reply
    /// instead of logging as a failure.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            SwapError::DuplicatePendingRequest
                | SwapError::NoPendingRequest
                | SwapError::Validation(_)
                | SwapError::StoreUnavailable(_)
        )
    }
}

/// Result type alias for SwapError
pub type Result<T> = std::result::Result<T, SwapError>;
