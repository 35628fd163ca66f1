//! Assistant configuration.
//!
//! All fields have working defaults so an empty config deserializes to a
//! usable setup. The timezone is the single configured zone naive times in
//! emails are interpreted in; everything crosses the Calendar boundary as
//! UTC (see calendar.rs).

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::AssistantError;

/// Retry policy for language-model calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    2_000
}

/// Top-level assistant configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// IANA zone naive email/meeting times are assumed to be in.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Display name used to sign drafted replies.
    #[serde(default = "default_user_name")]
    pub user_name: String,

    /// Max unread messages pulled per polling cycle.
    #[serde(default = "default_max_per_cycle")]
    pub max_per_cycle: u32,

    /// Default meeting length when the email doesn't state one.
    #[serde(default = "default_meeting_minutes")]
    pub default_meeting_minutes: i64,

    /// Business-hours window for alternative-slot search (local time).
    #[serde(default = "default_business_start")]
    pub business_start: NaiveTime,
    #[serde(default = "default_business_end")]
    pub business_end: NaiveTime,

    /// How many days forward to search for alternative slots.
    #[serde(default = "default_search_window_days")]
    pub search_window_days: i64,

    /// How many alternative slots to offer on a conflict.
    #[serde(default = "default_alternative_slots")]
    pub alternative_slots: usize,

    /// How many prior interactions with a sender to feed the prompts.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            user_name: default_user_name(),
            max_per_cycle: default_max_per_cycle(),
            default_meeting_minutes: default_meeting_minutes(),
            business_start: default_business_start(),
            business_end: default_business_end(),
            search_window_days: default_search_window_days(),
            alternative_slots: default_alternative_slots(),
            history_limit: default_history_limit(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AssistantConfig {
    /// Parse the configured zone name. Invalid names are a configuration
    /// error, not a fallback: silently assuming UTC would shift meetings.
    pub fn tz(&self) -> Result<Tz, AssistantError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| AssistantError::Config(format!("unknown timezone: {}", self.timezone)))
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_user_name() -> String {
    "Me".to_string()
}
fn default_max_per_cycle() -> u32 {
    10
}
fn default_meeting_minutes() -> i64 {
    60
}
fn default_business_start() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).unwrap()
}
fn default_business_end() -> NaiveTime {
    NaiveTime::from_hms_opt(18, 0, 0).unwrap()
}
fn default_search_window_days() -> i64 {
    3
}
fn default_alternative_slots() -> usize {
    3
}
fn default_history_limit() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_deserializes_with_defaults() {
        let config: AssistantConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.max_per_cycle, 10);
        assert_eq!(config.alternative_slots, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.tz().is_ok());
    }

    #[test]
    fn test_invalid_timezone_is_config_error() {
        let config = AssistantConfig {
            timezone: "Mars/Olympus_Mons".into(),
            ..Default::default()
        };
        assert!(config.tz().is_err());
    }

    #[test]
    fn test_named_zone_parses() {
        let config = AssistantConfig {
            timezone: "Asia/Kolkata".into(),
            ..Default::default()
        };
        assert_eq!(config.tz().unwrap(), chrono_tz::Asia::Kolkata);
    }
}
