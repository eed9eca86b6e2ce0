//! Load categories and remote load requests

use serde::{Deserialize, Serialize};
use std::fmt;

/// Independently loaded data category of a session.
///
/// The declaration order is the global lock order: any code path holding
/// more than one category lock acquires them in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Laps,
    Telemetry,
    Weather,
    /// Results and session info, fetched by the same remote load.
    Essentials,
}

impl Category {
    pub const ALL: [Category; 4] =
        [Category::Laps, Category::Telemetry, Category::Weather, Category::Essentials];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Laps => "laps",
            Category::Telemetry => "telemetry",
            Category::Weather => "weather",
            Category::Essentials => "essentials",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories requested from the upstream in a single `load` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadRequest {
    pub laps: bool,
    pub telemetry: bool,
    pub weather: bool,
    /// Race control messages. Result classification depends on them.
    pub messages: bool,
}

impl LoadRequest {
    /// Session essentials only (results and session info come with every load).
    pub const NONE: LoadRequest =
        LoadRequest { laps: false, telemetry: false, weather: false, messages: false };

    pub const fn laps_only() -> Self {
        LoadRequest { laps: true, ..Self::NONE }
    }

    pub const fn telemetry_only() -> Self {
        LoadRequest { telemetry: true, ..Self::NONE }
    }

    pub const fn weather_only() -> Self {
        LoadRequest { weather: true, ..Self::NONE }
    }

    pub const fn messages_only() -> Self {
        LoadRequest { messages: true, ..Self::NONE }
    }

    pub const fn with_laps(self) -> Self {
        LoadRequest { laps: true, ..self }
    }

    pub const fn with_telemetry(self) -> Self {
        LoadRequest { telemetry: true, ..self }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "laps={} telemetry={} weather={} messages={}",
            self.laps, self.telemetry, self.weather, self.messages
        )
    }
}
