// ⚠️ Error taxonomy shared by every component
// Validation / Provider / Persistence / Lookup-miss, plus the infrastructure
// errors they wrap.

use thiserror::Error;

/// Main error type for the steward
#[derive(Error, Debug)]
pub enum StewardError {
    // Infrastructure errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Validation errors (malformed local input, no state change)
    #[error("{0}")]
    Validation(String),

    // Provider errors (connect / send-code / sign-in)
    #[error("{0}")]
    Provider(String),

    // Onboarding errors
    #[error("No pending login found. Please restart with /add_account.")]
    NoPendingFlow,

    #[error("Session name `{0}` is already in use. Please restart with /add_account and pick another name.")]
    SessionNameTaken(String),

    #[error("Account `{session_name}` was NOT saved: {reason}")]
    CredentialNotSaved { session_name: String, reason: String },

    // Lookup-miss errors
    #[error("No pending group links.")]
    NothingToExport,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StewardError {
    /// True for errors the operator can fix by re-entering input.
    pub fn is_validation(&self) -> bool {
        matches!(self, StewardError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, StewardError>;
