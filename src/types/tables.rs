//! Tabular session data returned by the upstream provider
//!
//! The loading layer treats these as opaque: it only needs to know whether a
//! table is present. Field names follow the upstream columns so recordings can
//! be deserialized directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered collection of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table<R> {
    rows: Vec<R>,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R> Table<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<R> {
        self.rows
    }
}

impl<R> FromIterator<R> for Table<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self { rows: iter.into_iter().collect() }
    }
}

impl<'a, R> IntoIterator for &'a Table<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

pub type LapsTable = Table<Lap>;
pub type ResultsTable = Table<DriverResult>;
pub type WeatherTable = Table<WeatherSample>;
pub type TelemetryTable = Table<TelemetrySample>;

/// One circuit traversal by one driver. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Lap {
    pub driver: String,
    pub driver_number: String,
    pub team: Option<String>,
    pub lap_number: u32,
    pub lap_time: Option<f64>,
    pub sector1_time: Option<f64>,
    pub sector2_time: Option<f64>,
    pub sector3_time: Option<f64>,
    #[serde(rename = "SpeedI1")]
    pub speed_i1: Option<f64>,
    #[serde(rename = "SpeedI2")]
    pub speed_i2: Option<f64>,
    #[serde(rename = "SpeedFL")]
    pub speed_fl: Option<f64>,
    pub compound: Option<String>,
    pub stint: Option<u32>,
    pub pit_in_time: Option<f64>,
    pub pit_out_time: Option<f64>,
    /// Per-sample car data, attached once telemetry has been loaded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub telemetry: Vec<TelemetrySample>,
}

/// High-frequency car data sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TelemetrySample {
    pub driver_number: String,
    pub lap_number: u32,
    /// Seconds since the start of the lap.
    pub time: f64,
    pub distance: f64,
    pub speed: f64,
    #[serde(rename = "RPM")]
    pub rpm: f64,
    pub throttle: f64,
    pub brake: bool,
    #[serde(rename = "nGear")]
    pub gear: u8,
    #[serde(rename = "DRS")]
    pub drs: u8,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

/// Classification row for one driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DriverResult {
    pub driver_number: String,
    pub abbreviation: String,
    pub full_name: String,
    pub team_name: String,
    pub team_id: Option<String>,
    pub country_code: Option<String>,
    pub position: Option<u32>,
    pub grid_position: Option<u32>,
    #[serde(rename = "Q1")]
    pub q1: Option<f64>,
    #[serde(rename = "Q2")]
    pub q2: Option<f64>,
    #[serde(rename = "Q3")]
    pub q3: Option<f64>,
    pub time: Option<f64>,
    pub status: Option<String>,
    pub points: Option<f64>,
}

/// Trackside weather reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WeatherSample {
    /// Seconds since the session started.
    pub time: f64,
    pub air_temp: f64,
    pub track_temp: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub rainfall: bool,
    pub wind_speed: f64,
    pub wind_direction: f64,
}

/// Session metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    pub meeting_name: String,
    pub official_name: String,
    #[serde(rename = "Type")]
    pub session_type: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Track layout derived from position telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CircuitGeometry {
    /// Rotation in degrees that aligns the track map with the broadcast view.
    pub rotation: f64,
    pub corners: Vec<Corner>,
}

impl CircuitGeometry {
    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Corner {
    pub number: u32,
    pub letter: Option<String>,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    pub angle: f64,
    pub distance: f64,
}

impl LapsTable {
    /// Whether any lap carries telemetry samples.
    pub fn has_telemetry(&self) -> bool {
        self.rows.iter().any(|lap| !lap.telemetry.is_empty())
    }

    /// Copy of the laps with matching car data samples attached.
    pub fn with_telemetry(&self, car_data: &TelemetryTable) -> LapsTable {
        self.rows
            .iter()
            .map(|lap| {
                let mut lap = lap.clone();
                lap.telemetry = car_data
                    .iter()
                    .filter(|s| {
                        s.driver_number == lap.driver_number && s.lap_number == lap.lap_number
                    })
                    .cloned()
                    .collect();
                lap
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lap(driver_number: &str, lap_number: u32) -> Lap {
        Lap { driver_number: driver_number.to_string(), lap_number, ..Default::default() }
    }

    fn sample(driver_number: &str, lap_number: u32, speed: f64) -> TelemetrySample {
        TelemetrySample {
            driver_number: driver_number.to_string(),
            lap_number,
            speed,
            ..Default::default()
        }
    }

    #[test]
    fn telemetry_attaches_to_matching_laps_only() {
        let laps: LapsTable = vec![lap("1", 1), lap("1", 2), lap("44", 1)].into_iter().collect();
        let car_data: TelemetryTable =
            vec![sample("1", 1, 280.0), sample("1", 1, 301.5), sample("44", 1, 295.0)]
                .into_iter()
                .collect();

        assert!(!laps.has_telemetry());
        let enriched = laps.with_telemetry(&car_data);

        assert!(enriched.has_telemetry());
        assert_eq!(enriched.rows()[0].telemetry.len(), 2);
        assert!(enriched.rows()[1].telemetry.is_empty());
        assert_eq!(enriched.rows()[2].telemetry[0].speed, 295.0);
    }

    #[test]
    fn rows_deserialize_from_upstream_columns() {
        let yaml =
            "- Driver: VER\n  DriverNumber: '1'\n  LapNumber: 3\n  LapTime: 92.5\n  SpeedFL: 310.0\n";
        let laps: LapsTable = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(laps.len(), 1);
        assert_eq!(laps.rows()[0].driver, "VER");
        assert_eq!(laps.rows()[0].lap_time, Some(92.5));
        assert_eq!(laps.rows()[0].speed_fl, Some(310.0));
        assert!(laps.rows()[0].telemetry.is_empty());
    }

    #[test]
    fn circuit_without_corners_is_empty() {
        assert!(CircuitGeometry::default().is_empty());
        let geometry = CircuitGeometry { rotation: 92.0, corners: vec![Corner::default()] };
        assert!(!geometry.is_empty());
    }
}
