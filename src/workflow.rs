//! Workflow orchestrator.
//!
//! One email at a time: classify, maybe draft (with at most one
//! conflict-driven redraft), suspend at the human checkpoint, then perform
//! the terminal side effects exactly once. Batch cycles never overlap, and
//! one bad email never halts the batch.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::approval::ApprovalChannel;
use crate::calendar::CalendarReasoner;
use crate::classifier::Classifier;
use crate::config::AssistantConfig;
use crate::draft::{format_slot, CalendarContext, DraftingEngine};
use crate::error::AssistantError;
use crate::feedback;
use crate::services::{LanguageModel, Mailbox, MessageRef};
use crate::store::PreferenceStore;
use crate::types::{
    CalendarStatus, Draft, Email, EventProposal, HumanDecision, InteractionRecord, Outcome,
    TriageVerdict,
};

/// What one polling cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub processed: Vec<(String, Outcome)>,
    pub failed: Vec<(String, String)>,
}

pub struct Orchestrator {
    config: AssistantConfig,
    mailbox: Arc<dyn Mailbox>,
    llm: Arc<dyn LanguageModel>,
    classifier: Classifier,
    drafting: DraftingEngine,
    reasoner: CalendarReasoner,
    approval: Arc<dyn ApprovalChannel>,
    /// Short lock scopes only; never held across an await.
    store: Mutex<PreferenceStore>,
    /// Guards against overlapping polling cycles.
    cycle_lock: tokio::sync::Mutex<()>,
    /// Thread ids with a run in flight; a second run for the same thread
    /// is a programming error and is rejected.
    in_flight: Mutex<HashSet<String>>,
}

impl Orchestrator {
    pub fn new(
        config: AssistantConfig,
        mailbox: Arc<dyn Mailbox>,
        calendar: Arc<dyn crate::services::Calendar>,
        llm: Arc<dyn LanguageModel>,
        approval: Arc<dyn ApprovalChannel>,
        store: PreferenceStore,
    ) -> Result<Self, AssistantError> {
        Ok(Self {
            classifier: Classifier::new(llm.clone(), config.retry.clone()),
            drafting: DraftingEngine::new(llm.clone(), &config)?,
            reasoner: CalendarReasoner::new(calendar, &config)?,
            mailbox,
            llm,
            approval,
            store: Mutex::new(store),
            cycle_lock: tokio::sync::Mutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
            config,
        })
    }

    /// Run one polling cycle: list unread, process each email to a
    /// terminal state (or suspension-resolved decision), continue past
    /// per-email failures.
    ///
    /// Cycles are mutually exclusive: a cycle started while another is
    /// running returns `CycleInProgress` instead of interleaving.
    pub async fn run_cycle(&self) -> Result<CycleReport, AssistantError> {
        let _guard = self
            .cycle_lock
            .try_lock()
            .map_err(|_| AssistantError::CycleInProgress)?;

        let refs = self.mailbox.list_unread(self.config.max_per_cycle).await?;
        info!(unread = refs.len(), "polling cycle started");

        let mut report = CycleReport::default();
        for msg in &refs {
            match self.process_message(msg).await {
                Ok(outcome) => {
                    info!(email_id = %msg.id, outcome = ?outcome, "email handled");
                    report.processed.push((msg.id.clone(), outcome));
                }
                Err(err) => {
                    // Email stays unread for the next cycle; the batch goes on.
                    error!(email_id = %msg.id, %err, "email failed, continuing batch");
                    report.failed.push((msg.id.clone(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Process a single email through the full state machine.
    pub async fn process_message(&self, msg: &MessageRef) -> Result<Outcome, AssistantError> {
        let _run = self.begin_run(&msg.thread_id)?;

        let email = self.mailbox.read(&msg.id).await?;

        // History/preference reads are context, not control flow: a store
        // hiccup degrades to empty context rather than aborting the email.
        let history = {
            let store = self.store.lock();
            store
                .history_for(&email.sender_address, self.config.history_limit)
                .unwrap_or_else(|err| {
                    warn!(%err, "history read failed, classifying without context");
                    Vec::new()
                })
        };

        let verdict = self.classifier.classify(&email, &history).await?;

        match verdict {
            TriageVerdict::Ignore => {
                self.mailbox.mark_read(&email.id).await?;
                self.record(&email, Outcome::Ignored, None);
                Ok(Outcome::Ignored)
            }
            TriageVerdict::NotifyHuman => {
                // Human reviews the raw email; no drafting engine call.
                self.finish_with_human(&email, Draft::empty(), None).await
            }
            TriageVerdict::RespondAct => {
                let (draft, schedulable) = self.produce_draft(&email, &history).await?;
                self.finish_with_human(&email, draft, schedulable).await
            }
        }
    }

    /// Draft, resolve the calendar, and redraft at most once on conflict.
    /// Returns the draft to show the human plus the proposal (if any) that
    /// is clear to schedule on approval.
    async fn produce_draft(
        &self,
        email: &Email,
        history: &[InteractionRecord],
    ) -> Result<(Draft, Option<EventProposal>), AssistantError> {
        let preferences = {
            let store = self.store.lock();
            store.all_preferences().unwrap_or_else(|err| {
                warn!(%err, "preference read failed, drafting without them");
                Vec::new()
            })
        };

        let mut draft = self
            .drafting
            .draft(email, history, &preferences, &CalendarContext::None)
            .await?;

        let Some(proposal) = draft.event_proposal.clone() else {
            return Ok((draft, None));
        };

        let decision = self.reasoner.resolve(&proposal).await;
        match decision.status {
            CalendarStatus::Free => Ok((draft, Some(proposal))),
            CalendarStatus::Unverified => {
                draft.event_proposal = None;
                draft.calendar_note = Some(
                    "Calendar could not be reached; availability is unverified.".to_string(),
                );
                Ok((draft, None))
            }
            CalendarStatus::Busy => {
                // One regeneration with alternatives injected; a second
                // conflict falls through to the human.
                let alternatives: Vec<String> = decision
                    .alternative_slots
                    .iter()
                    .map(|slot| format_slot(slot, self.reasoner.tz()))
                    .collect();
                let context = CalendarContext::Busy {
                    conflicting_event: decision.conflicting_event.clone(),
                    alternatives,
                };
                let redraft = self
                    .drafting
                    .draft(email, history, &preferences, &context)
                    .await?;

                let schedulable = match &redraft.event_proposal {
                    Some(new_proposal) => {
                        // Availability query only, never a third draft.
                        let recheck = self.reasoner.resolve(new_proposal).await;
                        (recheck.status == CalendarStatus::Free)
                            .then(|| new_proposal.clone())
                    }
                    None => None,
                };
                Ok((redraft, schedulable))
            }
        }
    }

    /// Suspend at the checkpoint, then perform terminal actions exactly once.
    async fn finish_with_human(
        &self,
        email: &Email,
        draft: Draft,
        schedulable: Option<EventProposal>,
    ) -> Result<Outcome, AssistantError> {
        let decision = self.approval.request_approval(email, &draft).await?;

        let (final_text, edited) = match decision {
            HumanDecision::Rejected => {
                // A rejection is still a human review: mark read, no send,
                // no event, record the rejection.
                self.mailbox.mark_read(&email.id).await?;
                self.record(email, Outcome::Discarded, None);
                return Ok(Outcome::Discarded);
            }
            HumanDecision::Approved => (draft.reply_text.clone(), false),
            HumanDecision::Edited(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    (draft.reply_text.clone(), false)
                } else {
                    (Some(text), true)
                }
            }
        };

        // Learn from the edit before sending; inference runs without the
        // store lock, the write is best-effort.
        if edited {
            if let (Some(original), Some(edited_text)) = (&draft.reply_text, &final_text) {
                let delta =
                    feedback::infer_delta(&self.llm, &self.config.retry, original, edited_text)
                        .await;
                if !delta.is_empty() {
                    feedback::apply_delta(&self.store.lock(), &delta);
                }
            }
        }

        let mut sent = false;
        if let Some(text) = &final_text {
            self.mailbox
                .send(
                    &email.sender_address,
                    &reply_subject(&email.subject),
                    text,
                    &email.thread_id,
                )
                .await
                .map_err(|err| {
                    // Leave unread, record nothing; the next cycle retries.
                    AssistantError::SendFailure(err.to_string())
                })?;
            sent = true;
        }

        let mut scheduled = false;
        if let Some(proposal) = &schedulable {
            match self.reasoner.schedule(proposal).await {
                Ok(()) => scheduled = true,
                Err(err) => {
                    // The reply (if any) is already out; surface loudly but
                    // don't fail the run over the event.
                    error!(email_id = %email.id, %err, "event creation failed");
                }
            }
        }

        let outcome = match (sent, scheduled) {
            (true, true) => Outcome::SentAndScheduled,
            (true, false) => Outcome::Sent,
            (false, true) => Outcome::Scheduled,
            (false, false) => Outcome::Notified,
        };

        if let Err(err) = self.mailbox.mark_read(&email.id).await {
            warn!(email_id = %email.id, %err, "mark_read failed after terminal action");
        }
        self.record(email, outcome, final_text.as_deref());
        Ok(outcome)
    }

    /// Append the interaction record; best-effort by design.
    fn record(&self, email: &Email, outcome: Outcome, reply: Option<&str>) {
        let store = self.store.lock();
        if let Err(err) = store.record_interaction(
            &email.sender_address,
            &email.subject,
            &email.thread_id,
            outcome.action_label(),
            reply,
        ) {
            warn!(email_id = %email.id, %err, "interaction log write failed");
        }
    }

    fn begin_run<'a>(&'a self, thread_id: &str) -> Result<RunGuard<'a>, AssistantError> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(thread_id.to_string()) {
            return Err(AssistantError::DuplicateRun(thread_id.to_string()));
        }
        Ok(RunGuard {
            set: &self.in_flight,
            thread_id: thread_id.to_string(),
        })
    }
}

/// Removes the thread id from the in-flight set when the run ends,
/// including on error paths.
struct RunGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    thread_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.thread_id);
    }
}

/// "Re: " prefix for reply subjects, not doubled when already present.
fn reply_subject(subject: &str) -> String {
    if subject.trim().to_lowercase().starts_with("re:") {
        subject.trim().to_string()
    } else {
        format!("Re: {}", subject.trim())
    }
}
