//! Collaborator seams: mailbox, calendar, language model.
//!
//! The workflow never talks to Gmail, Google Calendar, or a model provider
//! directly; it is handed trait objects at construction. Production
//! adapters live with the host process; tests substitute counting fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::AssistantError;
use crate::types::Email;

// ============================================================================
// Mailbox
// ============================================================================

/// A stub from the unread listing; the full message is fetched separately.
#[derive(Debug, Clone)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// Gmail-shaped mailbox operations.
///
/// `read` must be idempotent before any send: reading the same id twice
/// returns identical content. `send` threads the reply via `thread_id` and
/// the caller supplies the already-prefixed "Re: " subject.
#[async_trait]
pub trait Mailbox: Send + Sync {
    async fn list_unread(&self, max: u32) -> Result<Vec<MessageRef>, AssistantError>;

    async fn read(&self, id: &str) -> Result<Email, AssistantError>;

    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: &str,
    ) -> Result<(), AssistantError>;

    async fn mark_read(&self, id: &str) -> Result<(), AssistantError>;
}

// ============================================================================
// Calendar
// ============================================================================

/// Availability verdict for one queried interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Free,
    /// Summary of the first conflicting event.
    Busy { conflicting_event: String },
}

/// Calendar operations, all at the UTC boundary except `find_free_slots`,
/// which is a per-local-day query (mirrors the freebusy-style API shape).
///
/// Conflict semantics are half-open: an existing event ending exactly at
/// the queried start is not a conflict.
#[async_trait]
pub trait Calendar: Send + Sync {
    async fn check_availability(
        &self,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Availability, AssistantError>;

    async fn create_event(
        &self,
        title: &str,
        description: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AssistantError>;

    /// Free slot start times within one local day, earliest first, at most
    /// `count`. Business-hours filtering is the reasoner's concern.
    async fn find_free_slots(
        &self,
        date: NaiveDate,
        duration_minutes: i64,
        count: usize,
    ) -> Result<Vec<NaiveTime>, AssistantError>;
}

// ============================================================================
// Language model
// ============================================================================

/// A model provider: prompt in, text out. Nondeterministic but pure, so
/// retrying is always safe.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// `json_mode` asks the provider for a JSON-only response; callers
    /// still validate the payload before use.
    async fn complete(&self, prompt: &str, json_mode: bool) -> Result<String, AssistantError>;
}

/// One model call with exponential backoff on transient failures.
///
/// Only errors the provider marks transient (rate limit, 5xx, timeout) are
/// retried; a hard failure or an exhausted budget is returned to the caller
/// as-is so the orchestrator can abort just this email.
pub async fn complete_with_retry(
    llm: &Arc<dyn LanguageModel>,
    prompt: &str,
    json_mode: bool,
    policy: &RetryPolicy,
) -> Result<String, AssistantError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match llm.complete(prompt, json_mode).await {
            Ok(text) => return Ok(text),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = retry_delay(attempt, policy);
                warn!(attempt, attempts, %err, ?delay, "llm retry");
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or(AssistantError::LanguageModel {
        message: "request exhausted retries".to_string(),
        transient: false,
    }))
}

/// Exponential backoff: initial * 2^(attempt-1), capped.
fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exp = policy
        .initial_backoff_ms
        .saturating_mul(1u64 << (attempt - 1).min(16));
    Duration::from_millis(exp.min(policy.max_backoff_ms))
}
