//! Core types for addressing sessions and describing their data.
//!
//! - [`SessionKey`] identifies one session and is the registry cache key
//! - [`SessionIdentifier`] names the kind of a session within a race weekend
//! - [`Category`] and [`LoadRequest`] describe what a remote load fetches
//! - [`Table`] and its row types carry the loaded data
//! - [`ScheduledEvent`] describes one weekend of a season schedule
//!
//! ## Usage Example
//!
//! ```rust
//! use paddock::types::{SessionIdentifier, SessionKey, SessionSlot};
//!
//! let race = SessionKey::new(2024, 5, SessionIdentifier::Race);
//! assert!(race.validate().is_ok());
//!
//! let test_day = SessionKey::testing(2024, 1, 2);
//! assert_eq!(test_day.session, SessionSlot::TestingDay(2));
//! assert_ne!(race, test_day);
//!
//! let sq: SessionIdentifier = "SQ".parse().unwrap();
//! assert_eq!(sq.as_str(), "Sprint Qualifying");
//! ```

mod category;
mod key;
mod schedule;
mod tables;

pub use category::{Category, LoadRequest};
pub use key::{EventRef, MAX_TESTING_DAY, MIN_YEAR, SessionIdentifier, SessionKey, SessionSlot};
pub use schedule::{EventFormat, ScheduledEvent, ScheduledSession};
pub use tables::{
    CircuitGeometry, Corner, DriverResult, Lap, LapsTable, ResultsTable, SessionInfo, Table,
    TelemetrySample, TelemetryTable, WeatherSample, WeatherTable,
};
