//! Error types for the triage workflow
//!
//! Errors are classified by recoverability:
//! - Retryable: provider rate limits, timeouts, transient transport failures
//! - Per-email: abort the current email, continue the batch
//! - Degradable: handled in place by falling back (bad LLM JSON, calendar down)

use thiserror::Error;

/// Errors surfaced while processing an email through the workflow.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// The language model could not be reached for triage, even after retries.
    /// Never resolved to a default verdict; a wrong guess risks sending mail.
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    /// The language model returned something that is not the JSON we asked for.
    /// Callers fall back to a generic draft instead of aborting.
    #[error("Draft parse error: {0}")]
    DraftParse(String),

    /// Calendar service failed. Availability is treated as unverified,
    /// never silently assumed free.
    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    /// Mailbox send failed. The email is left unread for the next cycle.
    #[error("Send failure: {0}")]
    SendFailure(String),

    /// Mailbox read/list/markRead failed.
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// Transient language-model failure (rate limit, 5xx, timeout).
    #[error("Language model error (transient={transient}): {message}")]
    LanguageModel { message: String, transient: bool },

    /// Approval channel failed to produce a decision (closed input, dropped
    /// resume handle). Treated like no decision at all: nothing sent.
    #[error("Approval channel error: {0}")]
    Approval(String),

    /// A second workflow run was started for a thread that already has one
    /// in flight.
    #[error("Run already in flight for thread {0}")]
    DuplicateRun(String),

    /// A polling cycle was started while the previous one is still running.
    #[error("Polling cycle already in progress")]
    CycleInProgress,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AssistantError {
    /// Returns true if retrying the failed call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssistantError::LanguageModel {
                transient: true,
                ..
            }
        )
    }
}

/// Errors specific to the preference store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create store directory: {0}")]
    CreateDir(std::io::Error),
}
