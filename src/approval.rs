//! Human-in-the-loop checkpoint.
//!
//! Two adapters behind one capability trait: a blocking console prompt for
//! CLI/batch use, and a suspend/resume channel keyed by thread id for UI
//! use. Either way the workflow sees a single async call that completes
//! with the human's decision.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::AssistantError;
use crate::types::{Draft, Email, HumanDecision};

/// The workflow's single suspension point.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Present the draft (or the raw email, when the draft is empty) and
    /// wait for approve/edit/reject. Must never fabricate an approval:
    /// any failure to obtain a decision is an error or a rejection.
    async fn request_approval(
        &self,
        email: &Email,
        draft: &Draft,
    ) -> Result<HumanDecision, AssistantError>;
}

// ============================================================================
// Console adapter
// ============================================================================

/// Blocking stdin prompt: `y` / `n` / `edit`. An edited body is read line
/// by line and terminated by an empty line. EOF on the input stream is
/// treated as REJECTED, never as approval.
pub struct ConsoleApproval;

impl ConsoleApproval {
    /// Same loop as `request_approval`, but over explicit reader/writer so
    /// it is testable without a terminal.
    pub fn prompt<R: BufRead, W: Write>(
        email: &Email,
        draft: &Draft,
        input: &mut R,
        output: &mut W,
    ) -> Result<HumanDecision, AssistantError> {
        let io_err = |e: std::io::Error| AssistantError::Approval(e.to_string());

        writeln!(output, "\nFrom: {}", email.sender).map_err(io_err)?;
        writeln!(output, "Subject: {}", email.subject).map_err(io_err)?;
        match &draft.reply_text {
            Some(reply) => {
                if draft.generic_fallback {
                    writeln!(output, "[generic fallback draft: model output was unusable]")
                        .map_err(io_err)?;
                }
                if let Some(note) = &draft.calendar_note {
                    writeln!(output, "[{note}]").map_err(io_err)?;
                }
                writeln!(output, "--- draft reply ---\n{reply}\n-------------------")
                    .map_err(io_err)?;
            }
            None => writeln!(output, "(no draft; review the email above)").map_err(io_err)?,
        }
        if let Some(event) = &draft.event_proposal {
            writeln!(
                output,
                "Proposed event: {} ({} -> {})",
                event.title, event.start, event.end
            )
            .map_err(io_err)?;
        }

        loop {
            write!(output, "Send? (y / n / edit): ").map_err(io_err)?;
            output.flush().map_err(io_err)?;

            let mut line = String::new();
            let read = input.read_line(&mut line).map_err(io_err)?;
            if read == 0 {
                // EOF: no human available, the safe reading is "no".
                return Ok(HumanDecision::Rejected);
            }

            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return Ok(HumanDecision::Approved),
                "n" | "no" => return Ok(HumanDecision::Rejected),
                "edit" | "e" => {
                    writeln!(output, "Enter edited reply (empty line to finish):")
                        .map_err(io_err)?;
                    let mut lines = Vec::new();
                    loop {
                        let mut edit_line = String::new();
                        let read = input.read_line(&mut edit_line).map_err(io_err)?;
                        if read == 0 || edit_line.trim_end_matches(['\r', '\n']).is_empty() {
                            break;
                        }
                        lines.push(edit_line.trim_end_matches(['\r', '\n']).to_string());
                    }
                    return Ok(HumanDecision::Edited(lines.join("\n")));
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl ApprovalChannel for ConsoleApproval {
    async fn request_approval(
        &self,
        email: &Email,
        draft: &Draft,
    ) -> Result<HumanDecision, AssistantError> {
        let email = email.clone();
        let draft = draft.clone();
        // Stdin blocks; keep it off the async runtime.
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            ConsoleApproval::prompt(&email, &draft, &mut stdin.lock(), &mut stdout.lock())
        })
        .await
        .map_err(|e| AssistantError::Approval(e.to_string()))?
    }
}

// ============================================================================
// Suspend/resume adapter
// ============================================================================

/// Suspend/resume checkpoint for UI front ends.
///
/// `request_approval` parks the run under the email's thread id and awaits;
/// the front end later calls `resume(thread_id, decision)`. One in-flight
/// run per thread id: a second request for the same thread is rejected, and
/// a resume consumes its slot so repeating it cannot re-trigger anything.
#[derive(Default)]
pub struct PendingApprovals {
    pending: Mutex<HashMap<String, oneshot::Sender<HumanDecision>>>,
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Thread ids currently waiting on a human.
    pub fn pending_threads(&self) -> Vec<String> {
        self.pending.lock().keys().cloned().collect()
    }

    /// Deliver a decision for a suspended run. Unknown (or already
    /// resumed) thread ids are an error for the caller, not the run.
    pub fn resume(&self, thread_id: &str, decision: HumanDecision) -> Result<(), AssistantError> {
        let sender = self
            .pending
            .lock()
            .remove(thread_id)
            .ok_or_else(|| AssistantError::Approval(format!("no pending run for {thread_id}")))?;
        sender
            .send(decision)
            .map_err(|_| AssistantError::Approval(format!("run for {thread_id} went away")))
    }
}

#[async_trait]
impl ApprovalChannel for PendingApprovals {
    async fn request_approval(
        &self,
        email: &Email,
        _draft: &Draft,
    ) -> Result<HumanDecision, AssistantError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&email.thread_id) {
                warn!(thread_id = %email.thread_id, "duplicate run for thread rejected");
                return Err(AssistantError::DuplicateRun(email.thread_id.clone()));
            }
            pending.insert(email.thread_id.clone(), tx);
        }
        info!(thread_id = %email.thread_id, "awaiting human decision");

        match rx.await {
            Ok(decision) => Ok(decision),
            Err(_) => {
                // Resume handle dropped without a decision; clean up our slot.
                self.pending.lock().remove(&email.thread_id);
                Err(AssistantError::Approval(format!(
                    "approval channel closed for {}",
                    email.thread_id
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Cursor;
    use std::sync::Arc;

    fn email() -> Email {
        Email {
            id: "m1".into(),
            thread_id: "t1".into(),
            subject: "Project sync".into(),
            sender: "Jane <jane@x.com>".into(),
            sender_address: "jane@x.com".into(),
            body: "Can we meet?".into(),
            received_at: Utc::now(),
        }
    }

    fn draft() -> Draft {
        Draft {
            reply_text: Some("Sounds good.".into()),
            event_proposal: None,
            generic_fallback: false,
            calendar_note: None,
        }
    }

    fn run_console(stdin: &str) -> HumanDecision {
        let mut input = Cursor::new(stdin.as_bytes().to_vec());
        let mut output = Vec::new();
        ConsoleApproval::prompt(&email(), &draft(), &mut input, &mut output).unwrap()
    }

    #[test]
    fn test_console_yes_and_no() {
        assert_eq!(run_console("y\n"), HumanDecision::Approved);
        assert_eq!(run_console("no\n"), HumanDecision::Rejected);
    }

    #[test]
    fn test_console_edit_reads_until_blank_line() {
        let decision = run_console("edit\nHi Jane,\nTuesday works.\n\n");
        assert_eq!(
            decision,
            HumanDecision::Edited("Hi Jane,\nTuesday works.".into())
        );
    }

    #[test]
    fn test_console_eof_is_rejection() {
        assert_eq!(run_console(""), HumanDecision::Rejected);
        // Garbage answers are re-prompted; EOF after them still rejects.
        assert_eq!(run_console("maybe\nwhatever\n"), HumanDecision::Rejected);
    }

    #[test]
    fn test_console_flags_fallback_draft() {
        let mut input = Cursor::new(b"y\n".to_vec());
        let mut output = Vec::new();
        let mut fallback = draft();
        fallback.generic_fallback = true;
        ConsoleApproval::prompt(&email(), &fallback, &mut input, &mut output).unwrap();
        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("generic fallback draft"));
    }

    #[tokio::test]
    async fn test_pending_resume_round_trip() {
        let channel = Arc::new(PendingApprovals::new());
        let waiter = channel.clone();
        let handle =
            tokio::spawn(async move { waiter.request_approval(&email(), &Draft::empty()).await });

        // Wait for the run to park itself.
        while channel.pending_threads().is_empty() {
            tokio::task::yield_now().await;
        }

        channel.resume("t1", HumanDecision::Approved).unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), HumanDecision::Approved);

        // Second resume for the same thread has nothing to deliver to.
        assert!(channel.resume("t1", HumanDecision::Approved).is_err());
    }

    #[tokio::test]
    async fn test_duplicate_thread_is_rejected() {
        let channel = Arc::new(PendingApprovals::new());
        let waiter = channel.clone();
        let _first =
            tokio::spawn(async move { waiter.request_approval(&email(), &Draft::empty()).await });

        while channel.pending_threads().is_empty() {
            tokio::task::yield_now().await;
        }

        let err = channel
            .request_approval(&email(), &Draft::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::DuplicateRun(_)));

        channel.resume("t1", HumanDecision::Rejected).unwrap();
    }

    #[tokio::test]
    async fn test_resume_unknown_thread_errors() {
        let channel = PendingApprovals::new();
        assert!(channel.resume("ghost", HumanDecision::Approved).is_err());
    }
}
