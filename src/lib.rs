//! Human-in-the-loop email triage core.
//!
//! Polls an inbox, classifies each message, optionally drafts a reply
//! and/or a calendar event with a language model, suspends for a mandatory
//! human checkpoint, then performs the terminal actions (send, schedule,
//! mark read) exactly once per email. Mailbox, calendar, and model
//! providers are injected behind traits; this crate owns only the
//! decision-making in between.

pub mod approval;
pub mod calendar;
pub mod classifier;
pub mod config;
pub mod draft;
pub mod error;
pub mod feedback;
pub mod logging;
pub mod services;
pub mod store;
pub mod types;
pub mod workflow;

pub use approval::{ApprovalChannel, ConsoleApproval, PendingApprovals};
pub use config::{AssistantConfig, RetryPolicy};
pub use error::{AssistantError, StoreError};
pub use services::{Availability, Calendar, LanguageModel, Mailbox, MessageRef};
pub use store::PreferenceStore;
pub use types::{
    CalendarDecision, CalendarStatus, Draft, Email, EventProposal, HumanDecision,
    InteractionRecord, Outcome, TimeRange, TriageVerdict,
};
pub use workflow::{CycleReport, Orchestrator};
