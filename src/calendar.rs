//! Calendar reasoner: availability resolution and alternative-slot search.
//!
//! All queries cross the Calendar boundary in UTC; slots are reasoned about
//! and displayed in the configured local zone. Conflict semantics are
//! half-open `[start, end)`: a meeting ending exactly when the proposal
//! starts is not a conflict (the service contract, restated here because
//! the fakes in tests must honor it too).

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::AssistantConfig;
use crate::error::AssistantError;
use crate::services::{Availability, Calendar};
use crate::types::{CalendarDecision, CalendarStatus, EventProposal, TimeRange};

pub struct CalendarReasoner {
    calendar: Arc<dyn Calendar>,
    tz: Tz,
    business_start: chrono::NaiveTime,
    business_end: chrono::NaiveTime,
    search_window_days: i64,
    alternative_slots: usize,
}

impl CalendarReasoner {
    pub fn new(calendar: Arc<dyn Calendar>, config: &AssistantConfig) -> Result<Self, AssistantError> {
        Ok(Self {
            calendar,
            tz: config.tz()?,
            business_start: config.business_start,
            business_end: config.business_end,
            search_window_days: config.search_window_days,
            alternative_slots: config.alternative_slots,
        })
    }

    /// Resolve a proposal against the live calendar.
    ///
    /// Service failures degrade to `Unverified`; availability is never
    /// silently assumed free. Alternatives are searched forward from the
    /// proposed time, business hours only, across the configured window;
    /// fewer than the requested count (possibly zero) is returned as-is.
    pub async fn resolve(&self, proposal: &EventProposal) -> CalendarDecision {
        let duration = (proposal.end - proposal.start).num_minutes();

        let availability = match self
            .calendar
            .check_availability(proposal.start, duration)
            .await
        {
            Ok(availability) => availability,
            Err(err) => {
                warn!(%err, "availability check failed, treating as unverified");
                return CalendarDecision::unverified();
            }
        };

        match availability {
            Availability::Free => CalendarDecision::free(),
            Availability::Busy { conflicting_event } => {
                let alternative_slots = self.find_alternatives(proposal.start, duration).await;
                debug!(
                    conflict = %conflicting_event,
                    alternatives = alternative_slots.len(),
                    "proposed slot busy"
                );
                CalendarDecision {
                    status: CalendarStatus::Busy,
                    conflicting_event: Some(conflicting_event),
                    alternative_slots,
                }
            }
        }
    }

    /// Create the event for a confirmed proposal.
    pub async fn schedule(&self, proposal: &EventProposal) -> Result<(), AssistantError> {
        self.calendar
            .create_event(
                &proposal.title,
                &proposal.description,
                proposal.start,
                proposal.end,
            )
            .await
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Up to `alternative_slots` free ranges, searched day by day starting
    /// at the proposed time. First-day slots that precede the proposal are
    /// skipped; later days start from business opening.
    async fn find_alternatives(&self, from: DateTime<Utc>, duration: i64) -> Vec<TimeRange> {
        let from_local = from.with_timezone(&self.tz);
        let mut slots = Vec::new();

        for day_offset in 0..self.search_window_days {
            let date = (from_local + Duration::days(day_offset)).date_naive();
            let remaining = self.alternative_slots - slots.len();

            // Ask for extra slots so business-hours/forward filtering
            // still leaves enough.
            let day_slots = match self
                .calendar
                .find_free_slots(date, duration, remaining + self.alternative_slots)
                .await
            {
                Ok(day_slots) => day_slots,
                Err(err) => {
                    warn!(%err, %date, "free-slot query failed, stopping search");
                    break;
                }
            };

            for start_time in day_slots {
                if start_time < self.business_start {
                    continue;
                }
                // NaiveTime addition is modular; a slot whose end wraps
                // past midnight must not slip through the closing check.
                let (end_time, wrapped) =
                    start_time.overflowing_add_signed(Duration::minutes(duration));
                if wrapped != 0 || end_time > self.business_end {
                    continue;
                }
                let Some(start_local) =
                    self.tz.from_local_datetime(&date.and_time(start_time)).earliest()
                else {
                    continue;
                };
                // Don't offer slots earlier than what the sender proposed.
                if day_offset == 0 && start_local.with_timezone(&Utc) < from {
                    continue;
                }
                slots.push(TimeRange::new(
                    start_local.with_timezone(&Utc),
                    (start_local + Duration::minutes(duration)).with_timezone(&Utc),
                ));
                if slots.len() == self.alternative_slots {
                    return slots;
                }
            }
        }

        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};

    struct FakeCalendar {
        busy: bool,
        /// Free slot starts returned for every queried day.
        day_slots: Vec<NaiveTime>,
        fail_availability: bool,
    }

    #[async_trait]
    impl Calendar for FakeCalendar {
        async fn check_availability(
            &self,
            _start: DateTime<Utc>,
            _duration: i64,
        ) -> Result<Availability, AssistantError> {
            if self.fail_availability {
                return Err(AssistantError::CalendarUnavailable("api down".into()));
            }
            if self.busy {
                Ok(Availability::Busy {
                    conflicting_event: "Board Review".into(),
                })
            } else {
                Ok(Availability::Free)
            }
        }

        async fn create_event(
            &self,
            _t: &str,
            _d: &str,
            _s: DateTime<Utc>,
            _e: DateTime<Utc>,
        ) -> Result<(), AssistantError> {
            Ok(())
        }

        async fn find_free_slots(
            &self,
            _date: NaiveDate,
            _duration: i64,
            count: usize,
        ) -> Result<Vec<NaiveTime>, AssistantError> {
            Ok(self.day_slots.iter().copied().take(count).collect())
        }
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn reasoner(calendar: FakeCalendar) -> CalendarReasoner {
        let config = AssistantConfig {
            timezone: "UTC".into(),
            ..Default::default()
        };
        CalendarReasoner::new(Arc::new(calendar), &config).unwrap()
    }

    fn proposal() -> EventProposal {
        EventProposal {
            title: "Sync".into(),
            description: "catch up".into(),
            start: Utc.with_ymd_and_hms(2026, 9, 1, 14, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 9, 1, 14, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_free_slot_resolves_free() {
        let decision = reasoner(FakeCalendar {
            busy: false,
            day_slots: vec![],
            fail_availability: false,
        })
        .resolve(&proposal())
        .await;
        assert_eq!(decision.status, CalendarStatus::Free);
        assert!(decision.alternative_slots.is_empty());
    }

    #[tokio::test]
    async fn test_busy_collects_at_most_three_alternatives() {
        let decision = reasoner(FakeCalendar {
            busy: true,
            day_slots: vec![time(15, 0), time(16, 0), time(17, 0), time(17, 30)],
            fail_availability: false,
        })
        .resolve(&proposal())
        .await;

        assert_eq!(decision.status, CalendarStatus::Busy);
        assert_eq!(decision.conflicting_event.as_deref(), Some("Board Review"));
        assert_eq!(decision.alternative_slots.len(), 3);
        // All forward of the 14:00 proposal.
        assert!(decision
            .alternative_slots
            .iter()
            .all(|s| s.start >= proposal().start));
    }

    #[tokio::test]
    async fn test_first_day_slots_before_proposal_are_skipped() {
        let decision = reasoner(FakeCalendar {
            busy: true,
            day_slots: vec![time(9, 0), time(10, 0)],
            fail_availability: false,
        })
        .resolve(&proposal())
        .await;

        // Day 0 morning slots skipped; same clock times accepted on later days.
        assert!(!decision.alternative_slots.is_empty());
        assert!(decision
            .alternative_slots
            .iter()
            .all(|s| s.start > proposal().start));
    }

    #[tokio::test]
    async fn test_slots_outside_business_hours_are_filtered() {
        let decision = reasoner(FakeCalendar {
            busy: true,
            day_slots: vec![time(7, 0), time(17, 45), time(20, 0)],
            fail_availability: false,
        })
        .resolve(&proposal())
        .await;

        // 07:00 before opening, 17:45+30min crosses 18:00, 20:00 after close.
        assert!(decision.alternative_slots.is_empty());
    }

    #[tokio::test]
    async fn test_slot_ending_past_midnight_is_filtered() {
        // A two-hour meeting starting at 23:00 wraps to 01:00; the wrapped
        // end must not pass the closing-time check on any searched day.
        let reasoner = reasoner(FakeCalendar {
            busy: true,
            day_slots: vec![time(23, 0)],
            fail_availability: false,
        });
        let decision = reasoner
            .resolve(&EventProposal {
                title: "Workshop".into(),
                description: "deep dive".into(),
                start: Utc.with_ymd_and_hms(2026, 9, 1, 14, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 9, 1, 16, 0, 0).unwrap(),
            })
            .await;

        assert_eq!(decision.status, CalendarStatus::Busy);
        assert!(decision.alternative_slots.is_empty());
    }

    #[tokio::test]
    async fn test_service_failure_degrades_to_unverified() {
        let decision = reasoner(FakeCalendar {
            busy: false,
            day_slots: vec![],
            fail_availability: true,
        })
        .resolve(&proposal())
        .await;
        assert_eq!(decision.status, CalendarStatus::Unverified);
    }

    #[tokio::test]
    async fn test_fully_booked_window_returns_empty_alternatives() {
        let decision = reasoner(FakeCalendar {
            busy: true,
            day_slots: vec![],
            fail_availability: false,
        })
        .resolve(&proposal())
        .await;
        assert_eq!(decision.status, CalendarStatus::Busy);
        assert!(decision.alternative_slots.is_empty());
    }
}
