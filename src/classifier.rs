//! Email triage: rule pass first, then one language-model call.
//!
//! The rule pass catches messages that must never reach the drafting
//! engine regardless of what a model thinks (verification codes, OTPs).
//! The model pass produces a raw string that is normalized into the closed
//! `TriageVerdict` set; callers never see the raw model output.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::AssistantError;
use crate::services::{complete_with_retry, LanguageModel};
use crate::types::{Email, InteractionRecord, TriageVerdict};

/// Patterns that short-circuit to notify_human with no model call.
/// OTPs and verification codes are security-sensitive: a human looks at
/// them, the assistant never replies to them.
const SENSITIVE_PATTERN: &str =
    r"(?i)\b(otp|one[\s-]?time\s+(password|code|pin)|verification\s+code|security\s+code)\b";

pub struct Classifier {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    sensitive: Regex,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self {
            llm,
            retry,
            // Static pattern, exercised by every classifier test.
            sensitive: Regex::new(SENSITIVE_PATTERN).unwrap(),
        }
    }

    /// Triage one email. History is the sender's recent interaction log,
    /// injected into the prompt as free-text context.
    ///
    /// A model transport failure after retries surfaces as
    /// `ClassifierUnavailable`; triage never guesses a verdict.
    pub async fn classify(
        &self,
        email: &Email,
        history: &[InteractionRecord],
    ) -> Result<TriageVerdict, AssistantError> {
        if self.sensitive.is_match(&email.subject) || self.sensitive.is_match(&email.body) {
            debug!(email_id = %email.id, "rule pass: verification code, routing to human");
            return Ok(TriageVerdict::NotifyHuman);
        }

        let prompt = build_triage_prompt(email, history);
        let raw = complete_with_retry(&self.llm, &prompt, false, &self.retry)
            .await
            .map_err(|e| AssistantError::ClassifierUnavailable(e.to_string()))?;

        let verdict = normalize_verdict(&raw);
        debug!(email_id = %email.id, verdict = verdict.label(), "triage");
        Ok(verdict)
    }
}

/// Map raw model output onto the closed verdict set.
///
/// Exact keyword match wins; otherwise a substring salvage pass; anything
/// still ambiguous defaults to notify_human, the safe direction, since a
/// wrong respond_act risks sending unwanted mail and a wrong ignore
/// silently drops real mail.
pub fn normalize_verdict(raw: &str) -> TriageVerdict {
    let cleaned = raw.trim().trim_matches(['"', '\'', '.', '`']).to_lowercase();

    match cleaned.as_str() {
        "ignore" => return TriageVerdict::Ignore,
        "notify_human" | "notify" => return TriageVerdict::NotifyHuman,
        "respond_act" | "respond" | "reply" => return TriageVerdict::RespondAct,
        _ => {}
    }

    if cleaned.contains("respond") || cleaned.contains("reply") || cleaned.contains("schedule") {
        TriageVerdict::RespondAct
    } else if cleaned.contains("notify") {
        TriageVerdict::NotifyHuman
    } else if cleaned.contains("ignore") {
        TriageVerdict::Ignore
    } else {
        warn!(raw = %raw.trim(), "unrecognized triage output, defaulting to notify_human");
        TriageVerdict::NotifyHuman
    }
}

fn build_triage_prompt(email: &Email, history: &[InteractionRecord]) -> String {
    let mut prompt = format!(
        "You are an email assistant. Classify the following email into \
         ONLY ONE category:\n\n\
         1. ignore - spam, ads, newsletters, promotions\n\
         2. notify_human - important but needs a human decision\n\
         3. respond_act - safe for the assistant to reply or schedule\n\n\
         Subject: {}\nBody:\n{}\n",
        email.subject, email.body
    );

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

    prompt.push_str("\nRespond with ONLY ONE WORD: ignore OR notify_human OR respond_act\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    struct CannedModel(&'static str);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _p: &str, _j: bool) -> Result<String, AssistantError> {
            Ok(self.0.to_string())
        }
    }

    struct DownModel;

    #[async_trait]
    impl LanguageModel for DownModel {
        async fn complete(&self, _p: &str, _j: bool) -> Result<String, AssistantError> {
            Err(AssistantError::LanguageModel {
                message: "quota exhausted".into(),
                transient: false,
            })
        }
    }

    fn email(subject: &str, body: &str) -> Email {
        Email {
            id: "m1".into(),
            thread_id: "t1".into(),
            subject: subject.into(),
            sender: "Jane <jane@x.com>".into(),
            sender_address: "jane@x.com".into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_exact_keywords() {
        assert_eq!(normalize_verdict("ignore"), TriageVerdict::Ignore);
        assert_eq!(normalize_verdict(" Notify_Human "), TriageVerdict::NotifyHuman);
        assert_eq!(normalize_verdict("respond_act"), TriageVerdict::RespondAct);
        assert_eq!(normalize_verdict("\"reply\""), TriageVerdict::RespondAct);
    }

    #[test]
    fn test_normalize_salvages_substrings() {
        assert_eq!(
            normalize_verdict("I would respond_act to this one."),
            TriageVerdict::RespondAct
        );
        assert_eq!(
            normalize_verdict("category: notify_human (needs review)"),
            TriageVerdict::NotifyHuman
        );
        assert_eq!(
            normalize_verdict("this is spam, ignore it"),
            TriageVerdict::Ignore
        );
    }

    #[test]
    fn test_gibberish_defaults_to_notify_human() {
        assert_eq!(normalize_verdict(""), TriageVerdict::NotifyHuman);
        assert_eq!(normalize_verdict("🤖 beep boop"), TriageVerdict::NotifyHuman);
        assert_eq!(
            normalize_verdict("as an AI I cannot classify this"),
            TriageVerdict::NotifyHuman
        );
    }

    #[tokio::test]
    async fn test_otp_rule_pass_skips_model() {
        // DownModel would error if called; the rule pass must win first.
        let classifier = Classifier::new(Arc::new(DownModel), RetryPolicy::default());
        let verdict = classifier
            .classify(&email("Login code", "Your OTP is 482913"), &[])
            .await
            .unwrap();
        assert_eq!(verdict, TriageVerdict::NotifyHuman);

        let verdict = classifier
            .classify(&email("Security", "Use this verification code: 9921"), &[])
            .await
            .unwrap();
        assert_eq!(verdict, TriageVerdict::NotifyHuman);
    }

    #[tokio::test]
    async fn test_model_failure_surfaces_classifier_unavailable() {
        let classifier = Classifier::new(Arc::new(DownModel), RetryPolicy::default());
        let err = classifier
            .classify(&email("Project sync", "Can we meet?"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ClassifierUnavailable(_)));
    }

    #[tokio::test]
    async fn test_history_lands_in_prompt() {
        let history = vec![crate::types::InteractionRecord {
            sender: "jane@x.com".into(),
            subject: "old".into(),
            thread_id: "t0".into(),
            action: "replied".into(),
            reply_text: None,
            created_at: Utc::now(),
        }];
        let prompt = build_triage_prompt(&email("s", "b"), &history);
        assert!(prompt.contains("Past interactions"));
        assert!(prompt.contains("- replied at"));

        let classifier = Classifier::new(Arc::new(CannedModel("ignore")), RetryPolicy::default());
        let verdict = classifier.classify(&email("s", "b"), &history).await.unwrap();
        assert_eq!(verdict, TriageVerdict::Ignore);
    }
}
