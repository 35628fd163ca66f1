//! Preference learning from human edits.
//!
//! When a human edits a draft before sending, one model call compares the
//! original and edited text and emits a `{tone?, verbosity?}` delta, which
//! is then upserted into the preference store. The whole step is
//! best-effort: personalization must never block a send that was already
//! approved, so every failure here is logged and swallowed.
//!
//! Inference (async, model call) and application (sync, store write) are
//! separate so callers never hold a store lock across an await.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::services::{complete_with_retry, LanguageModel};
use crate::store::PreferenceStore;

#[derive(Debug, Deserialize, Default)]
struct PreferenceDelta {
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    verbosity: Option<String>,
}

/// Infer tone/verbosity preferences from an edit diff.
/// Returns key/value pairs to upsert; empty on any failure.
pub async fn infer_delta(
    llm: &Arc<dyn LanguageModel>,
    retry: &RetryPolicy,
    original: &str,
    edited: &str,
) -> Vec<(String, String)> {
    if original.trim() == edited.trim() {
        return Vec::new();
    }

    let prompt = format!(
        "A user edited an email draft before sending. Compare the two \
         versions and infer stable writing preferences.\n\n\
         ORIGINAL DRAFT:\n{original}\n\nEDITED VERSION:\n{edited}\n\n\
         Return STRICT JSON: {{\"tone\": \"...\" or null, \
         \"verbosity\": \"...\" or null}}\n\
         Use null for any dimension the edit does not clearly change."
    );

    let raw = match complete_with_retry(llm, &prompt, true, retry).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, "preference inference call failed, skipping");
            return Vec::new();
        }
    };

    let delta: PreferenceDelta = match serde_json::from_str(raw.trim()) {
        Ok(delta) => delta,
        Err(err) => {
            warn!(%err, "preference inference returned non-JSON, skipping");
            return Vec::new();
        }
    };

    [("tone", delta.tone), ("verbosity", delta.verbosity)]
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value?;
            let value = value.trim();
            (!value.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// Upsert an inferred delta. Write failures are logged and swallowed.
/// Returns the number of preferences actually written.
pub fn apply_delta(store: &PreferenceStore, delta: &[(String, String)]) -> usize {
    let mut written = 0;
    for (key, value) in delta {
        match store.set_preference(key, value) {
            Ok(()) => written += 1,
            Err(err) => warn!(%err, key, "preference write failed, continuing"),
        }
    }
    if written > 0 {
        debug!(written, "preferences learned from edit");
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssistantError;
    use async_trait::async_trait;

    struct CannedModel(&'static str);

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, _p: &str, _j: bool) -> Result<String, AssistantError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_delta_is_inferred_and_upserted() {
        let store = PreferenceStore::open_in_memory().unwrap();
        let llm: Arc<dyn LanguageModel> =
            Arc::new(CannedModel(r#"{"tone": "casual", "verbosity": null}"#));

        let delta = infer_delta(
            &llm,
            &RetryPolicy::default(),
            "Dear Sir, kindly find attached",
            "Hey! here you go",
        )
        .await;
        assert_eq!(delta, vec![("tone".to_string(), "casual".to_string())]);

        assert_eq!(apply_delta(&store, &delta), 1);
        assert_eq!(store.get_preference("tone").unwrap().as_deref(), Some("casual"));
        assert!(store.get_preference("verbosity").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identical_text_skips_model() {
        let llm: Arc<dyn LanguageModel> = Arc::new(CannedModel("should never be parsed"));
        assert!(infer_delta(&llm, &RetryPolicy::default(), "same", "same")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_bad_json_yields_empty_delta() {
        let llm: Arc<dyn LanguageModel> = Arc::new(CannedModel("the user prefers brevity"));
        assert!(infer_delta(&llm, &RetryPolicy::default(), "a", "b")
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_blank_values_are_dropped() {
        let llm: Arc<dyn LanguageModel> =
            Arc::new(CannedModel(r#"{"tone": "  ", "verbosity": "terse"}"#));
        let delta = infer_delta(&llm, &RetryPolicy::default(), "a", "b").await;
        assert_eq!(delta, vec![("verbosity".to_string(), "terse".to_string())]);
    }
}
