//! Session addressing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, SessionError};

/// First championship season.
pub const MIN_YEAR: i32 = 1950;

/// Pre-season tests run for at most three days.
pub const MAX_TESTING_DAY: u8 = 3;

/// Kind of a competitive session within an event weekend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionIdentifier {
    #[serde(rename = "Race")]
    Race,
    #[serde(rename = "Qualifying")]
    Qualifying,
    #[serde(rename = "Sprint")]
    Sprint,
    #[serde(rename = "Sprint Qualifying")]
    SprintQualifying,
    #[serde(rename = "Sprint Shootout")]
    SprintShootout,
    #[serde(rename = "Practice 1")]
    Practice1,
    #[serde(rename = "Practice 2")]
    Practice2,
    #[serde(rename = "Practice 3")]
    Practice3,
}

impl SessionIdentifier {
    pub const ALL: [SessionIdentifier; 8] = [
        SessionIdentifier::Race,
        SessionIdentifier::Qualifying,
        SessionIdentifier::Sprint,
        SessionIdentifier::SprintQualifying,
        SessionIdentifier::SprintShootout,
        SessionIdentifier::Practice1,
        SessionIdentifier::Practice2,
        SessionIdentifier::Practice3,
    ];

    /// Upstream display name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionIdentifier::Race => "Race",
            SessionIdentifier::Qualifying => "Qualifying",
            SessionIdentifier::Sprint => "Sprint",
            SessionIdentifier::SprintQualifying => "Sprint Qualifying",
            SessionIdentifier::SprintShootout => "Sprint Shootout",
            SessionIdentifier::Practice1 => "Practice 1",
            SessionIdentifier::Practice2 => "Practice 2",
            SessionIdentifier::Practice3 => "Practice 3",
        }
    }

    /// Short form used in file names and log lines.
    pub fn abbreviation(self) -> &'static str {
        match self {
            SessionIdentifier::Race => "R",
            SessionIdentifier::Qualifying => "Q",
            SessionIdentifier::Sprint => "S",
            SessionIdentifier::SprintQualifying => "SQ",
            SessionIdentifier::SprintShootout => "SS",
            SessionIdentifier::Practice1 => "FP1",
            SessionIdentifier::Practice2 => "FP2",
            SessionIdentifier::Practice3 => "FP3",
        }
    }
}

impl fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionIdentifier {
    type Err = SessionError;

    /// Accepts display names and abbreviations, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        SessionIdentifier::ALL
            .into_iter()
            .find(|ident| {
                ident.as_str().eq_ignore_ascii_case(trimmed)
                    || ident.abbreviation().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| SessionError::invalid_key(format!("unknown session identifier '{}'", s)))
    }
}

/// How an event is addressed: by championship round or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventRef {
    Round(u32),
    Name(String),
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRef::Round(round) => write!(f, "round {}", round),
            EventRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<u32> for EventRef {
    fn from(round: u32) -> Self {
        EventRef::Round(round)
    }
}

impl From<&str> for EventRef {
    fn from(name: &str) -> Self {
        EventRef::Name(name.to_string())
    }
}

impl From<String> for EventRef {
    fn from(name: String) -> Self {
        EventRef::Name(name)
    }
}

/// Session within an event: a named kind, or a numbered day of a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionSlot {
    Named(SessionIdentifier),
    TestingDay(u8),
}

impl SessionSlot {
    pub fn identifier(self) -> Option<SessionIdentifier> {
        match self {
            SessionSlot::Named(ident) => Some(ident),
            SessionSlot::TestingDay(_) => None,
        }
    }
}

impl fmt::Display for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionSlot::Named(ident) => write!(f, "{}", ident),
            SessionSlot::TestingDay(day) => write!(f, "day {}", day),
        }
    }
}

impl From<SessionIdentifier> for SessionSlot {
    fn from(ident: SessionIdentifier) -> Self {
        SessionSlot::Named(ident)
    }
}

/// Identifies one session and keys the loader registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub year: i32,
    pub event: EventRef,
    pub session: SessionSlot,
    pub is_testing: bool,
}

impl SessionKey {
    /// Key for a championship session.
    pub fn new(year: i32, event: impl Into<EventRef>, session: SessionIdentifier) -> Self {
        Self { year, event: event.into(), session: SessionSlot::Named(session), is_testing: false }
    }

    /// Key for one day of a pre-season test.
    pub fn testing(year: i32, test_number: u32, day: u8) -> Self {
        Self {
            year,
            event: EventRef::Round(test_number),
            session: SessionSlot::TestingDay(day),
            is_testing: true,
        }
    }

    /// Whether a (year, round) pair from a request denotes pre-season testing.
    ///
    /// Round 0 is always testing. A few seasons number their first test as
    /// round 1 in the upstream schedule.
    pub fn infer_testing(year: i32, round: u32) -> bool {
        match round {
            0 => true,
            1 => matches!(year, 2018 | 2019 | 2022),
            _ => false,
        }
    }

    /// Reject malformed keys before any remote call is made.
    pub fn validate(&self) -> Result<()> {
        if self.year < MIN_YEAR {
            return Err(SessionError::invalid_key(format!(
                "year {} predates the championship ({})",
                self.year, MIN_YEAR
            )));
        }

        match (&self.event, self.is_testing) {
            (EventRef::Name(name), _) if name.trim().is_empty() => {
                return Err(SessionError::invalid_key("event name is empty"));
            }
            (EventRef::Name(name), true) => {
                return Err(SessionError::invalid_key(format!(
                    "testing sessions are addressed by test number, not by name ('{}')",
                    name
                )));
            }
            (EventRef::Round(0), _) => {
                return Err(SessionError::invalid_key(if self.is_testing {
                    "test numbers start at 1"
                } else {
                    "round 0 is reserved for testing"
                }));
            }
            _ => {}
        }

        match (self.session, self.is_testing) {
            (SessionSlot::Named(ident), true) => Err(SessionError::invalid_key(format!(
                "testing sessions are addressed by day number, got '{}'",
                ident
            ))),
            (SessionSlot::TestingDay(day), false) => Err(SessionError::invalid_key(format!(
                "day {} given for a non-testing event",
                day
            ))),
            (SessionSlot::TestingDay(day), true) if day == 0 || day > MAX_TESTING_DAY => {
                Err(SessionError::invalid_key(format!(
                    "testing day {} is outside 1..={}",
                    day, MAX_TESTING_DAY
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_testing {
            write!(f, "{} test {} {}", self.year, self.event, self.session)
        } else {
            write!(f, "{} {} {}", self.year, self.event, self.session)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identifiers_parse_names_and_abbreviations() {
        assert_eq!("Race".parse::<SessionIdentifier>().unwrap(), SessionIdentifier::Race);
        assert_eq!(
            "sprint qualifying".parse::<SessionIdentifier>().unwrap(),
            SessionIdentifier::SprintQualifying
        );
        assert_eq!("fp2".parse::<SessionIdentifier>().unwrap(), SessionIdentifier::Practice2);
        assert_eq!(" SS ".parse::<SessionIdentifier>().unwrap(), SessionIdentifier::SprintShootout);
        assert!("Warmup".parse::<SessionIdentifier>().is_err());
    }

    #[test]
    fn identifier_serde_uses_display_names() {
        let yaml = serde_yaml_ng::to_string(&SessionIdentifier::Practice3).unwrap();
        assert_eq!(yaml.trim(), "Practice 3");
        let back: SessionIdentifier = serde_yaml_ng::from_str("Sprint Shootout").unwrap();
        assert_eq!(back, SessionIdentifier::SprintShootout);
    }

    #[test]
    fn testing_inference_follows_season_quirks() {
        assert!(SessionKey::infer_testing(2024, 0));
        assert!(SessionKey::infer_testing(2022, 1));
        assert!(SessionKey::infer_testing(2019, 1));
        assert!(!SessionKey::infer_testing(2024, 1));
        assert!(!SessionKey::infer_testing(2022, 2));
    }

    #[test]
    fn keys_differing_in_any_field_are_distinct() {
        let base = SessionKey::new(2024, 3, SessionIdentifier::Race);
        let mut variants = vec![base.clone()];
        variants.push(SessionKey::new(2023, 3, SessionIdentifier::Race));
        variants.push(SessionKey::new(2024, 4, SessionIdentifier::Race));
        variants.push(SessionKey::new(2024, "Australian Grand Prix", SessionIdentifier::Race));
        variants.push(SessionKey::new(2024, 3, SessionIdentifier::Qualifying));
        variants.push(SessionKey { is_testing: true, ..base.clone() });

        let unique: HashSet<_> = variants.iter().cloned().collect();
        assert_eq!(unique.len(), variants.len());
        assert!(unique.contains(&SessionKey::new(2024, 3, SessionIdentifier::Race)));
    }

    #[test]
    fn validation_rejects_malformed_keys() {
        assert!(SessionKey::new(2024, 1, SessionIdentifier::Race).validate().is_ok());
        assert!(SessionKey::testing(2024, 1, 3).validate().is_ok());

        assert!(SessionKey::new(1949, 1, SessionIdentifier::Race).validate().is_err());
        assert!(SessionKey::new(2024, 0, SessionIdentifier::Race).validate().is_err());
        assert!(SessionKey::new(2024, "  ", SessionIdentifier::Race).validate().is_err());
        assert!(SessionKey::testing(2024, 0, 1).validate().is_err());
        assert!(SessionKey::testing(2024, 1, 0).validate().is_err());
        assert!(SessionKey::testing(2024, 1, 4).validate().is_err());

        let named_test =
            SessionKey { is_testing: true, ..SessionKey::new(2024, 1, SessionIdentifier::Race) };
        assert!(named_test.validate().is_err());

        let day_without_test = SessionKey { is_testing: false, ..SessionKey::testing(2024, 1, 1) };
        assert!(day_without_test.validate().is_err());
    }

    #[test]
    fn display_is_log_friendly() {
        assert_eq!(
            SessionKey::new(2024, 6, SessionIdentifier::SprintQualifying).to_string(),
            "2024 round 6 Sprint Qualifying"
        );
        assert_eq!(SessionKey::testing(2024, 1, 2).to_string(), "2024 test round 1 day 2");
    }
}
