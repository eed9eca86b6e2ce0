//! Season schedule

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionIdentifier;

/// Weekend format as reported by the upstream schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFormat {
    Conventional,
    Sprint,
    SprintShootout,
    SprintQualifying,
    Testing,
    #[serde(other)]
    Unknown,
}

/// One session slot of a weekend.
///
/// Slots 4 and 5 are absent for testing events and some historic formats; the
/// upstream reports those with a placeholder kind and no start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduledSession {
    pub kind: Option<SessionIdentifier>,
    pub start_utc: Option<DateTime<Utc>>,
}

impl ScheduledSession {
    pub fn new(kind: SessionIdentifier, start_utc: DateTime<Utc>) -> Self {
        Self { kind: Some(kind), start_utc: Some(start_utc) }
    }

    /// Whether the session is scheduled and has started by `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.start_utc.is_some_and(|start| start <= now)
    }
}

/// One event weekend of a season schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub round_number: u32,
    #[serde(default)]
    pub country: String,
    pub event_name: String,
    #[serde(default)]
    pub official_event_name: String,
    pub event_format: EventFormat,
    /// Up to five session slots in weekend order.
    #[serde(default)]
    pub sessions: Vec<ScheduledSession>,
}

impl ScheduledEvent {
    pub fn is_testing(&self) -> bool {
        self.event_format == EventFormat::Testing
    }

    /// Start of the first session of the weekend.
    pub fn first_session_start(&self) -> Option<DateTime<Utc>> {
        self.sessions.first().and_then(|session| session.start_utc)
    }

    /// Whether the weekend's first session has started by `now`.
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.first_session_start().is_some_and(|start| start <= now)
    }
}
