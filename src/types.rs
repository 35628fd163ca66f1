//! Core value types shared across the workflow.
//!
//! Everything here is run-scoped and immutable once produced: an `Email` is
//! read once from the mailbox, a `TriageVerdict` is produced once per email,
//! a `Draft` is replaced (not mutated) when a calendar conflict forces a
//! regeneration.

use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Email
// ============================================================================

/// An email fetched from the mailbox. Immutable after fetch; identity is
/// `id`, and `thread_id` groups replies for correct in-thread sending.
#[derive(Debug, Clone, Serialize)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    /// Raw "From" header, e.g. `Jane Doe <jane@customer.com>`.
    pub sender: String,
    /// Bare address extracted from `sender`.
    pub sender_address: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl Email {
    /// Display name to greet the sender with, falling back to "there"
    /// when the From header carries no usable name.
    pub fn sender_name(&self) -> String {
        extract_display_name(&self.sender).unwrap_or_else(|| "there".to_string())
    }
}

/// Extract bare email from a "From" header like "Name <email@example.com>".
pub fn extract_email_address(from_field: &str) -> String {
    if let Some(start) = from_field.find('<') {
        if let Some(end) = from_field.find('>') {
            if end > start {
                return from_field[start + 1..end].to_lowercase();
            }
        }
    }
    from_field.trim().to_lowercase()
}

/// Extract the display name from a "From" header like
/// `"Jane Doe" <jane@customer.com>`. Returns `None` for bare addresses or
/// single-word handles that are not real names.
pub fn extract_display_name(from_field: &str) -> Option<String> {
    let trimmed = from_field.trim();
    if trimmed.is_empty() {
        return None;
    }

    let angle_start = trimmed.find('<')?;
    if angle_start == 0 {
        return None; // "<email>" with no name prefix
    }

    let name_part = trimmed[..angle_start].trim();
    let name = name_part.trim_matches('"').trim();
    if name.is_empty() || name.contains('@') {
        return None;
    }

    Some(name.to_string())
}

// ============================================================================
// Triage
// ============================================================================

/// Closed triage verdict set. The finer reply/schedule distinction some
/// variants of the drafting prompt emit stays advisory inside the draft
/// JSON; callers of the classifier only ever see these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageVerdict {
    /// Spam, ads, newsletters: mark read, move on.
    Ignore,
    /// Important but needs a human decision; no AI draft is produced.
    NotifyHuman,
    /// Safe for the assistant to draft a reply and/or schedule.
    RespondAct,
}

impl TriageVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::NotifyHuman => "notify_human",
            Self::RespondAct => "respond_act",
        }
    }
}

// ============================================================================
// Calendar
// ============================================================================

/// A half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True if the two half-open intervals intersect. An event ending
    /// exactly at `other.start` does not conflict.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A concrete meeting the drafting engine proposed from the email text.
/// Absent entirely when no scheduling is implicated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventProposal {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EventProposal {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

/// Availability outcome for a proposed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarStatus {
    Free,
    Busy,
    /// The calendar service could not be reached. Treated like busy for
    /// scheduling purposes, and flagged to the human.
    Unverified,
}

/// Decision derived from an `EventProposal` against the live calendar.
/// `alternative_slots` is populated only when `status` is `Busy`.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarDecision {
    pub status: CalendarStatus,
    pub conflicting_event: Option<String>,
    pub alternative_slots: Vec<TimeRange>,
}

impl CalendarDecision {
    pub fn free() -> Self {
        Self {
            status: CalendarStatus::Free,
            conflicting_event: None,
            alternative_slots: Vec::new(),
        }
    }

    pub fn unverified() -> Self {
        Self {
            status: CalendarStatus::Unverified,
            conflicting_event: None,
            alternative_slots: Vec::new(),
        }
    }
}

// ============================================================================
// Draft
// ============================================================================

/// What the drafting engine produced for one attempt. Replaced wholesale
/// if a calendar conflict triggers the single allowed regeneration.
#[derive(Debug, Clone, Serialize)]
pub struct Draft {
    pub reply_text: Option<String>,
    pub event_proposal: Option<EventProposal>,
    /// True when the model's JSON was unusable and this is the generic
    /// fallback, shown to the human so they know not to trust it.
    pub generic_fallback: bool,
    /// Human-visible annotation, e.g. "scheduling could not be verified".
    pub calendar_note: Option<String>,
}

impl Draft {
    /// A draft-less payload for the notify-human route: the human reviews
    /// the raw email with no AI text attached.
    pub fn empty() -> Self {
        Self {
            reply_text: None,
            event_proposal: None,
            generic_fallback: false,
            calendar_note: None,
        }
    }
}

// ============================================================================
// Human decision & outcome
// ============================================================================

/// The one mutation point where a human overrides the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanDecision {
    Approved,
    Edited(String),
    Rejected,
}

/// Terminal state of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Triage said ignore; marked read, nothing else.
    Ignored,
    /// Human reviewed the raw email, nothing was sent.
    Notified,
    /// Reply sent, no event involved.
    Sent,
    /// Event created, no reply sent (approval on an event-only draft).
    Scheduled,
    /// Reply sent and event created.
    SentAndScheduled,
    /// Human rejected the draft; nothing sent, marked read.
    Discarded,
}

impl Outcome {
    /// Action string recorded in the interaction log.
    pub fn action_label(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Notified => "notified",
            Self::Sent => "replied",
            Self::Scheduled => "scheduled",
            Self::SentAndScheduled => "replied_scheduled",
            Self::Discarded => "rejected",
        }
    }
}

/// A row from the per-sender interaction log, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionRecord {
    pub sender: String,
    pub subject: String,
    pub thread_id: String,
    pub action: String,
    pub reply_text: Option<String>,
    pub created_at: DateTime<Utc>,
}
