use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Migration error: {message}")]
    Migration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors.
///
/// None of these are process-fatal: validation and not-found conditions are
/// returned to the immediate caller, integrity failures quarantine the one
/// affected session, and I/O failures abort only the operation in flight
/// (the atomic write discipline means a failed write never leaves a
/// half-written node behind).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Thought not found: {thought_id}")]
    ThoughtNotFound { thought_id: String },

    #[error("Branch not found: {branch_id}")]
    BranchNotFound { branch_id: String },

    #[error("Thought id already exists: {thought_id}")]
    DuplicateThought { thought_id: String },

    #[error("Integrity violation in session {session_id}: {message}")]
    Integrity { session_id: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a validation failure on a named input field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an integrity violation scoped to one session.
    pub fn integrity(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Integrity {
            session_id: session_id.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
