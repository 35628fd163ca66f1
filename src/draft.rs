//! Drafting engine: one JSON-mode model call per attempt.
//!
//! The model is asked for strict JSON `{action, reply, event}`. Parsing is
//! defensive (fences stripped, fields defaulted) and an unusable payload
//! degrades to a clearly-flagged generic draft rather than an error. The
//! `action` the model returns is advisory only; routing belongs to the
//! classifier and scheduling to the calendar reasoner.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AssistantConfig, RetryPolicy};
use crate::error::AssistantError;
use crate::services::{complete_with_retry, LanguageModel};
use crate::types::{Draft, Email, EventProposal, InteractionRecord, TimeRange};

/// What the drafting prompt gets told about the calendar.
#[derive(Debug, Clone)]
pub enum CalendarContext {
    /// No meeting implicated (first draft attempt).
    None,
    /// Proposed slot is free; the reply may confirm it.
    Free,
    /// Proposed slot conflicts; alternatives are pre-formatted local-time
    /// strings (possibly empty, in which case the reply asks the sender for times).
    Busy {
        conflicting_event: Option<String>,
        alternatives: Vec<String>,
    },
    /// Calendar service was unreachable; the reply must not commit to a slot.
    Unverified,
}

/// Raw model response schema. Every field is defaulted so a sparse but
/// valid JSON object still parses.
#[derive(Debug, Deserialize)]
struct ModelDraft {
    #[serde(default)]
    #[allow(dead_code)] // advisory only; routing is the classifier's call
    action: String,
    #[serde(default)]
    reply: String,
    #[serde(default)]
    event: Option<ModelEvent>,
}

#[derive(Debug, Deserialize)]
struct ModelEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
}

pub struct DraftingEngine {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    tz: Tz,
    user_name: String,
    default_meeting_minutes: i64,
    duration_re: Regex,
}

impl DraftingEngine {
    pub fn new(llm: Arc<dyn LanguageModel>, config: &AssistantConfig) -> Result<Self, AssistantError> {
        Ok(Self {
            llm,
            retry: config.retry.clone(),
            tz: config.tz()?,
            user_name: config.user_name.clone(),
            default_meeting_minutes: config.default_meeting_minutes,
            duration_re: Regex::new(r"(?i)(\d+)\s*(hour|hr|hrs|hours|minute|minutes|min|mins)")
                .unwrap(),
        })
    }

    /// Produce one draft. A transport failure after retries propagates (the
    /// orchestrator aborts just this email); a malformed payload does not,
    /// it becomes the generic fallback draft.
    pub async fn draft(
        &self,
        email: &Email,
        history: &[InteractionRecord],
        preferences: &[(String, String)],
        calendar: &CalendarContext,
    ) -> Result<Draft, AssistantError> {
        let prompt = self.build_prompt(email, history, preferences, calendar);
        let raw = complete_with_retry(&self.llm, &prompt, true, &self.retry).await?;

        let draft = match self.parse_response(&raw, email) {
            Ok(draft) => draft,
            Err(err) => {
                warn!(email_id = %email.id, %err, "unusable draft payload, using fallback");
                self.fallback_draft(email)
            }
        };
        Ok(self.annotate(draft, calendar))
    }

    /// Meeting duration stated in the body ("30 min", "1 hour"), or the
    /// configured default.
    pub fn duration_minutes(&self, body: &str) -> i64 {
        if let Some(caps) = self.duration_re.captures(body) {
            let value: i64 = caps[1].parse().unwrap_or(self.default_meeting_minutes);
            let unit = caps[2].to_lowercase();
            if unit.starts_with("hour") || unit.starts_with("hr") {
                return value * 60;
            }
            return value;
        }
        self.default_meeting_minutes
    }

    fn parse_response(&self, raw: &str, email: &Email) -> Result<Draft, AssistantError> {
        let cleaned = strip_code_fences(raw);
        let parsed: ModelDraft = serde_json::from_str(cleaned)
            .map_err(|e| AssistantError::DraftParse(e.to_string()))?;

        let event_proposal = parsed
            .event
            .as_ref()
            .and_then(|ev| self.assemble_event(ev, email));

        let reply_text = if parsed.reply.trim().is_empty() {
            None
        } else {
            Some(parsed.reply.trim().to_string())
        };

        if reply_text.is_none() && event_proposal.is_none() {
            return Err(AssistantError::DraftParse(
                "response carried neither reply nor event".to_string(),
            ));
        }

        debug!(
            email_id = %email.id,
            has_event = event_proposal.is_some(),
            "draft parsed"
        );
        Ok(Draft {
            reply_text,
            event_proposal,
            generic_fallback: false,
            calendar_note: None,
        })
    }

    /// Build a UTC event from the model's local date/time fields. Naive
    /// times are interpreted in the configured zone. Incomplete or
    /// unparseable fields mean no proposal, never a crash.
    fn assemble_event(&self, ev: &ModelEvent, email: &Email) -> Option<EventProposal> {
        let date: NaiveDate = ev.date.as_deref()?.parse().ok()?;
        let start_time: NaiveTime = parse_clock(ev.start_time.as_deref()?)?;

        let start_local = self.tz.from_local_datetime(&date.and_time(start_time)).earliest()?;
        let end_local = match ev.end_time.as_deref().and_then(parse_clock) {
            Some(end) if end > start_time => {
                self.tz.from_local_datetime(&date.and_time(end)).earliest()?
            }
            _ => start_local + Duration::minutes(self.duration_minutes(&email.body)),
        };

        let title = if ev.title.trim().is_empty() {
            format!("Meeting with {}", email.sender_name())
        } else {
            ev.title.trim().to_string()
        };

        Some(EventProposal {
            title,
            description: email.body.clone(),
            start: start_local.with_timezone(&Utc),
            end: end_local.with_timezone(&Utc),
        })
    }

    fn fallback_draft(&self, email: &Email) -> Draft {
        Draft {
            reply_text: Some(format!(
                "Dear {},\n\nThank you for your email. I will review it and get back \
                 to you shortly.\n\nBest regards,\n{}",
                email.sender_name(),
                self.user_name
            )),
            event_proposal: None,
            generic_fallback: true,
            calendar_note: None,
        }
    }

    fn annotate(&self, mut draft: Draft, calendar: &CalendarContext) -> Draft {
        if matches!(calendar, CalendarContext::Unverified) {
            draft.calendar_note =
                Some("Calendar could not be reached; availability is unverified.".to_string());
            // Never commit to a slot we could not check.
            draft.event_proposal = None;
        }
        draft
    }

    fn build_prompt(
        &self,
        email: &Email,
        history: &[InteractionRecord],
        preferences: &[(String, String)],
        calendar: &CalendarContext,
    ) -> String {
        let mut prompt = format!(
            "You are a professional email assistant for {user}. Draft a reply \
             to the email below.\n\n\
             Sender: {sender}\nSubject: {subject}\nBody:\n{body}\n",
            user = self.user_name,
            sender = email.sender,
            subject = email.subject,
            body = email.body,
        );

        match calendar {
            CalendarContext::None => {}
            CalendarContext::Free => {
                prompt.push_str("\nCALENDAR: The proposed time is FREE. You may confirm it.\n");
            }
            CalendarContext::Busy {
                conflicting_event,
                alternatives,
            } => {
                prompt.push_str("\nCALENDAR: The proposed time is BUSY");
                if let Some(event) = conflicting_event {
                    prompt.push_str(&format!(" (conflicts with '{event}')"));
                }
                prompt.push_str(". Do NOT accept the proposed time.\n");
                if alternatives.is_empty() {
                    prompt.push_str(
                        "No alternative slots were found; ask the sender to propose a few times.\n",
                    );
                } else {
                    prompt.push_str("Offer these alternative times instead:\n");
                    for slot in alternatives {
                        prompt.push_str(&format!("- {slot}\n"));
                    }
                }
            }
            CalendarContext::Unverified => {
                prompt.push_str(
                    "\nCALENDAR: Availability could not be verified. Reply without \
                     committing to any specific time.\n",
                );
            }
        }

        if !preferences.is_empty() {
            prompt.push_str("\nUser preferences to follow:\n");
            for (key, value) in preferences {
                prompt.push_str(&format!("- {key}: {value}\n"));
            }
        }

        if !history.is_empty() {
            prompt.push_str("\nPast interactions with this sender (most recent first):\n");
            for record in history {
                prompt.push_str(&format!(
                    "- {} at {}\n",
                    record.action,
                    record.created_at.format("%Y-%m-%d %H:%M")
                ));
            }
        }

        prompt.push_str(&format!(
            "\nGreet the sender as \"Dear {name},\" and sign off as \"Best regards,\\n{user}\".\n\
             Return STRICT JSON only, matching:\n\
             {{\"action\": \"reply|schedule|ignore\", \"reply\": \"...\", \
             \"event\": {{\"title\": \"...\", \"date\": \"YYYY-MM-DD\", \
             \"start_time\": \"HH:MM\", \"end_time\": \"HH:MM\"}}}}\n\
             Set \"event\" to null when no meeting is involved.\n",
            name = email.sender_name(),
            user = self.user_name,
        ));
        prompt
    }
}

/// Strip a Markdown code fence (``` or ```json) wrapping the payload.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse "HH:MM" or "HH:MM:SS".
fn parse_clock(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .ok()
}

/// Format a UTC range as a local human-readable slot, e.g.
/// "Friday, Feb 06 at 02:00 PM".
pub fn format_slot(range: &TimeRange, tz: Tz) -> String {
    range
        .start
        .with_timezone(&tz)
        .format("%A, %b %d at %I:%M %p")
        .to_string()
}
