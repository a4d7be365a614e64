// error.rs — Error taxonomy for the tutor core.
// Transport failures are typed so the orchestrator can branch on kind;
// everything at the application edge uses anyhow.

use crate::app::TurnState;

/// Failures of the remote chat completion call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl CompletionError {
    /// Short machine-friendly label, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            CompletionError::Network(_) => "network",
            CompletionError::Auth(_) => "auth",
            CompletionError::RateLimit(_) => "rate_limit",
            CompletionError::Upstream(_) => "upstream",
        }
    }
}

/// Errors surfaced by the session and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    /// Empty or whitespace-only user text. Rejected before any API call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// Missing credential or unusable config. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A turn is still in flight or its reply has not been rendered yet.
    #[error("Cannot accept a new message while in state {0}")]
    Busy(TurnState),
}
