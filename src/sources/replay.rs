//! Replay source backed by recorded sessions on disk
//!
//! Recordings are laid out per season:
//!
//! ```text
//! <root>/2024/schedule.yaml            season schedule
//! <root>/2024/round_05/race.yaml       championship session
//! <root>/2024/round_05/sprint_qualifying.yaml
//! <root>/2024/testing_1/day_2.yaml     pre-season test day
//! ```
//!
//! A recording holds every table of the session. Loading makes the requested
//! categories visible after `ready_after`, which mimics an upstream that
//! fills its caches in the background.

use anyhow::{Context, Result as AnyResult, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::source::{Readiness, RemoteSession, SessionSource};
use crate::types::{
    CircuitGeometry, EventRef, LapsTable, LoadRequest, ResultsTable, ScheduledEvent,
    SessionIdentifier, SessionInfo, SessionKey, SessionSlot, TelemetryTable, WeatherTable,
};
use crate::{Result, SessionError};

/// On-disk format of one recorded session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Recording {
    pub session_info: Option<SessionInfo>,
    pub laps: Option<LapsTable>,
    pub car_data: Option<TelemetryTable>,
    pub results: Option<ResultsTable>,
    pub weather: Option<WeatherTable>,
    pub circuit: Option<CircuitGeometry>,
}

/// Parsed recording with shareable tables.
struct Tables {
    session_info: Option<Arc<SessionInfo>>,
    laps: Option<Arc<LapsTable>>,
    lap_telemetry: Option<Arc<LapsTable>>,
    car_data: Option<Arc<TelemetryTable>>,
    results: Option<Arc<ResultsTable>>,
    weather: Option<Arc<WeatherTable>>,
    circuit: Option<Arc<CircuitGeometry>>,
}

impl From<Recording> for Tables {
    fn from(recording: Recording) -> Self {
        let lap_telemetry = match (&recording.laps, &recording.car_data) {
            (Some(laps), Some(car_data)) => Some(Arc::new(laps.with_telemetry(car_data))),
            _ => None,
        };
        Self {
            session_info: recording.session_info.map(Arc::new),
            laps: recording.laps.map(Arc::new),
            lap_telemetry,
            car_data: recording.car_data.map(Arc::new),
            results: recording.results.map(Arc::new),
            weather: recording.weather.map(Arc::new),
            circuit: recording.circuit.map(Arc::new),
        }
    }
}

/// Serves sessions recorded under a root directory.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    root: PathBuf,
    ready_after: Duration,
}

impl ReplaySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ready_after: Duration::ZERO }
    }

    /// Delay between a load finishing and its categories reading as ready.
    pub fn with_ready_after(mut self, ready_after: Duration) -> Self {
        self.ready_after = ready_after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session(&self, key: SessionKey) -> Arc<dyn RemoteSession> {
        Arc::new(ReplaySession {
            root: self.root.clone(),
            key,
            ready_after: self.ready_after,
            state: Mutex::new(ReplayState::default()),
        })
    }
}

#[async_trait::async_trait]
impl SessionSource for ReplaySource {
    fn get_session(
        &self,
        year: i32,
        event: &EventRef,
        identifier: SessionIdentifier,
    ) -> Result<Arc<dyn RemoteSession>> {
        Ok(self.session(SessionKey::new(year, event.clone(), identifier)))
    }

    fn get_testing_session(
        &self,
        year: i32,
        test_number: u32,
        day: u8,
    ) -> Result<Arc<dyn RemoteSession>> {
        Ok(self.session(SessionKey::testing(year, test_number, day)))
    }

    async fn event_schedule(&self, year: i32) -> Result<Vec<ScheduledEvent>> {
        read_schedule(&self.root, year)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| upstream(format!("schedule for {} is unreadable", year), e))
    }
}

#[derive(Default)]
struct ReplayState {
    tables: Option<Arc<Tables>>,
    loaded: LoadRequest,
    ready_at: Option<Instant>,
}

/// One recorded session. Nothing is read until the first `load`.
pub struct ReplaySession {
    root: PathBuf,
    key: SessionKey,
    ready_after: Duration,
    state: Mutex<ReplayState>,
}

impl ReplaySession {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn recording_path(&self) -> AnyResult<PathBuf> {
        let season = self.root.join(self.key.year.to_string());
        let ident = match (self.key.session, &self.key.event) {
            (SessionSlot::Named(ident), _) => ident,
            (SessionSlot::TestingDay(day), EventRef::Round(test_number)) => {
                return Ok(season
                    .join(format!("testing_{}", test_number))
                    .join(format!("day_{}.yaml", day)));
            }
            (SessionSlot::TestingDay(_), EventRef::Name(name)) => {
                bail!("test '{}' must be addressed by number", name)
            }
        };

        let round = match &self.key.event {
            EventRef::Round(round) => *round,
            EventRef::Name(name) => {
                let schedule = read_schedule(&self.root, self.key.year)
                    .await?
                    .ok_or_else(|| anyhow!("no schedule to resolve event '{}'", name))?;
                schedule
                    .iter()
                    .find(|event| {
                        event.event_name.eq_ignore_ascii_case(name)
                            || event.country.eq_ignore_ascii_case(name)
                    })
                    .map(|event| event.round_number)
                    .ok_or_else(|| {
                        anyhow!("event '{}' is not in the {} schedule", name, self.key.year)
                    })?
            }
        };

        Ok(season.join(format!("round_{:02}", round)).join(format!("{}.yaml", file_stem(ident))))
    }

    async fn read_tables(&self) -> AnyResult<Arc<Tables>> {
        let cached = self.state().tables.clone();
        if let Some(tables) = cached {
            return Ok(tables);
        }

        let path = self.recording_path().await?;
        let yaml = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading recording {}", path.display()))?;
        let recording: Recording = serde_yaml_ng::from_str(&yaml)
            .with_context(|| format!("parsing recording {}", path.display()))?;
        debug!(session = %self.key, path = %path.display(), "Recording parsed");

        let tables = Arc::new(Tables::from(recording));
        Ok(Arc::clone(self.state().tables.get_or_insert(tables)))
    }

    /// Tables once `category_loaded` holds and the readiness delay has passed.
    fn visible(&self, category_loaded: impl Fn(&LoadRequest) -> bool) -> Option<Arc<Tables>> {
        let state = self.state();
        let ready = state.ready_at.is_some_and(|at| Instant::now() >= at);
        if ready && category_loaded(&state.loaded) { state.tables.clone() } else { None }
    }

    fn read<T>(
        &self,
        what: &str,
        category_loaded: impl Fn(&LoadRequest) -> bool,
        column: impl Fn(&Tables) -> Option<Arc<T>>,
    ) -> Result<Readiness<Arc<T>>> {
        match self.visible(category_loaded) {
            None => Ok(Readiness::NotReady),
            Some(tables) => column(&tables)
                .map(Readiness::Ready)
                .ok_or_else(|| {
                    SessionError::absent(format!("{} in the {} recording", what, self.key))
                }),
        }
    }
}

#[async_trait::async_trait]
impl RemoteSession for ReplaySession {
    async fn load(&self, request: LoadRequest) -> Result<()> {
        self.read_tables()
            .await
            .map_err(|e| upstream(format!("no recording for {}", self.key), e))?;

        let mut state = self.state();
        state.loaded.laps |= request.laps;
        state.loaded.telemetry |= request.telemetry;
        state.loaded.weather |= request.weather;
        state.loaded.messages |= request.messages;
        state.ready_at = Some(Instant::now() + self.ready_after);
        info!(session = %self.key, %request, ready_after = ?self.ready_after, "Replay load");
        Ok(())
    }

    fn laps(&self) -> Result<Readiness<Arc<LapsTable>>> {
        let with_telemetry = self.state().loaded.telemetry;
        self.read("laps", |loaded| loaded.laps, |tables| {
            let enriched = tables.lap_telemetry.clone().filter(|_| with_telemetry);
            enriched.or_else(|| tables.laps.clone())
        })
    }

    fn results(&self) -> Result<Readiness<Arc<ResultsTable>>> {
        self.read("results", |_| true, |tables| tables.results.clone())
    }

    fn car_data(&self) -> Result<Readiness<Arc<TelemetryTable>>> {
        self.read("car data", |loaded| loaded.telemetry, |tables| tables.car_data.clone())
    }

    fn weather_data(&self) -> Result<Readiness<Arc<WeatherTable>>> {
        self.read("weather", |loaded| loaded.weather, |tables| tables.weather.clone())
    }

    fn session_info(&self) -> Result<Readiness<Arc<SessionInfo>>> {
        self.read("session info", |_| true, |tables| tables.session_info.clone())
    }

    fn circuit_info(&self) -> Result<Option<Arc<CircuitGeometry>>> {
        Ok(self
            .visible(|loaded| loaded.laps && loaded.telemetry)
            .and_then(|tables| tables.circuit.clone()))
    }
}

/// `Sprint Qualifying` -> `sprint_qualifying`.
fn file_stem(ident: SessionIdentifier) -> String {
    ident.as_str().to_ascii_lowercase().replace(' ', "_")
}

/// Schedule of `year`, or `None` when the season has no schedule file.
async fn read_schedule(root: &Path, year: i32) -> AnyResult<Option<Vec<ScheduledEvent>>> {
    let path = root.join(year.to_string()).join("schedule.yaml");
    let yaml = match tokio::fs::read_to_string(&path).await {
        Ok(yaml) => yaml,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(year, path = %path.display(), "No schedule recorded");
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let schedule = serde_yaml_ng::from_str(&yaml)
        .with_context(|| format!("parsing schedule {}", path.display()))?;
    Ok(Some(schedule))
}

fn upstream(reason: String, error: anyhow::Error) -> SessionError {
    SessionError::upstream_with_source(reason, error.into())
}
