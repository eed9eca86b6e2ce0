//! Instrumented in-memory session source for tests and benchmarks
//!
//! [`MockSource`] hands out [`MockSession`]s that record every `load` call,
//! can delay or fail loads, and can answer not-ready for a number of reads
//! after the data has been loaded.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::source::{Readiness, RemoteSession, SessionSource};
use crate::types::{
    Category, CircuitGeometry, Corner, DriverResult, EventRef, Lap, LapsTable, LoadRequest,
    ResultsTable, ScheduledEvent, SessionIdentifier, SessionInfo, SessionKey, SessionSlot,
    TelemetrySample, TelemetryTable, WeatherSample, WeatherTable,
};
use crate::{Result, SessionError};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Data served by a mock session once loaded.
#[derive(Debug, Clone)]
pub struct SessionFixture {
    pub laps: Arc<LapsTable>,
    pub lap_telemetry: Arc<LapsTable>,
    pub car_data: Arc<TelemetryTable>,
    pub results: Arc<ResultsTable>,
    pub weather: Arc<WeatherTable>,
    pub info: Arc<SessionInfo>,
    pub circuit: Option<Arc<CircuitGeometry>>,
}

impl SessionFixture {
    /// Fixture with `lap_count` laps spread over two drivers.
    pub fn with_laps(lap_count: usize) -> Self {
        let drivers = [("VER", "1"), ("NOR", "4")];
        let laps: LapsTable = (0..lap_count)
            .map(|i| {
                let (driver, number) = drivers[i % drivers.len()];
                Lap {
                    driver: driver.to_string(),
                    driver_number: number.to_string(),
                    lap_number: (i / drivers.len()) as u32 + 1,
                    lap_time: Some(90.0 + i as f64 * 0.1),
                    sector1_time: Some(30.0),
                    sector2_time: Some(30.0),
                    sector3_time: Some(30.0 + i as f64 * 0.1),
                    ..Default::default()
                }
            })
            .collect();

        let car_data: TelemetryTable = laps
            .iter()
            .flat_map(|lap| {
                (0..3).map(move |n| TelemetrySample {
                    driver_number: lap.driver_number.clone(),
                    lap_number: lap.lap_number,
                    time: n as f64,
                    distance: n as f64 * 80.0,
                    speed: 280.0 + n as f64,
                    gear: 7,
                    ..Default::default()
                })
            })
            .collect();

        let lap_telemetry = laps.with_telemetry(&car_data);
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).single().unwrap_or_default();

        Self {
            laps: Arc::new(laps),
            lap_telemetry: Arc::new(lap_telemetry),
            car_data: Arc::new(car_data),
            results: Arc::new(
                drivers
                    .iter()
                    .enumerate()
                    .map(|(i, (abbreviation, number))| DriverResult {
                        driver_number: number.to_string(),
                        abbreviation: abbreviation.to_string(),
                        position: Some(i as u32 + 1),
                        ..Default::default()
                    })
                    .collect(),
            ),
            weather: Arc::new(
                (0..3)
                    .map(|i| WeatherSample {
                        time: i as f64 * 60.0,
                        air_temp: 24.0 + i as f64,
                        track_temp: 38.0,
                        humidity: 40.0,
                        ..Default::default()
                    })
                    .collect(),
            ),
            info: Arc::new(SessionInfo {
                meeting_name: "Bahrain Grand Prix".to_string(),
                official_name: "FORMULA 1 GULF AIR BAHRAIN GRAND PRIX 2024".to_string(),
                session_type: "Race".to_string(),
                start_date: start,
                end_date: start + ChronoDuration::hours(2),
            }),
            circuit: Some(Arc::new(CircuitGeometry {
                rotation: 92.0,
                corners: vec![
                    Corner { number: 1, distance: 650.0, ..Default::default() },
                    Corner { number: 2, distance: 780.0, ..Default::default() },
                ],
            })),
        }
    }

    pub fn without_circuit(mut self) -> Self {
        self.circuit = None;
        self
    }
}

impl Default for SessionFixture {
    fn default() -> Self {
        Self::with_laps(20)
    }
}

/// How a mock session behaves when loaded and read.
#[derive(Debug, Clone, Default)]
pub struct MockBehaviour {
    /// Time each `load` call takes.
    pub load_delay: Duration,
    /// Number of not-ready answers per category after it has been loaded.
    pub not_ready_reads: HashMap<Category, u32>,
    /// Every `load` call fails with an upstream error.
    pub fail_loads: bool,
    pub fixture: Option<SessionFixture>,
}

impl MockBehaviour {
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_not_ready_reads(mut self, category: Category, reads: u32) -> Self {
        self.not_ready_reads.insert(category, reads);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_loads = true;
        self
    }

    pub fn with_fixture(mut self, fixture: SessionFixture) -> Self {
        self.fixture = Some(fixture);
        self
    }
}

#[derive(Debug, Default)]
struct Loaded {
    laps: bool,
    telemetry: bool,
    weather: bool,
    essentials: bool,
}

/// Remote session double that records its load calls.
pub struct MockSession {
    key: SessionKey,
    fixture: SessionFixture,
    load_delay: Duration,
    fail_loads: bool,
    loaded: Mutex<Loaded>,
    not_ready_reads: Mutex<HashMap<Category, u32>>,
    loads: Mutex<Vec<LoadRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSession {
    pub fn new(key: SessionKey, behaviour: MockBehaviour) -> Self {
        Self {
            key,
            fixture: behaviour.fixture.unwrap_or_default(),
            load_delay: behaviour.load_delay,
            fail_loads: behaviour.fail_loads,
            loaded: Mutex::new(Loaded::default()),
            not_ready_reads: Mutex::new(behaviour.not_ready_reads),
            loads: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn fixture(&self) -> &SessionFixture {
        &self.fixture
    }

    /// Every request passed to `load`, in call order.
    pub fn loads(&self) -> Vec<LoadRequest> {
        locked(&self.loads).clone()
    }

    pub fn load_count(&self) -> usize {
        locked(&self.loads).len()
    }

    /// Number of `load` calls that requested laps.
    pub fn laps_loads(&self) -> usize {
        locked(&self.loads).iter().filter(|request| request.laps).count()
    }

    /// Highest number of `load` calls that overlapped in time.
    pub fn max_concurrent_loads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn check(&self, category: Category, loaded: bool) -> bool {
        if !loaded {
            return false;
        }
        let mut reads = locked(&self.not_ready_reads);
        match reads.get_mut(&category) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                false
            }
            _ => true,
        }
    }

    fn ready<T: Clone>(&self, category: Category, loaded: bool, value: &T) -> Readiness<T> {
        if self.check(category, loaded) {
            Readiness::Ready(value.clone())
        } else {
            Readiness::NotReady
        }
    }
}

#[async_trait::async_trait]
impl RemoteSession for MockSession {
    async fn load(&self, request: LoadRequest) -> Result<()> {
        locked(&self.loads).push(request);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_loads {
            return Err(SessionError::upstream(format!("no data published for {}", self.key)));
        }

        let mut loaded = locked(&self.loaded);
        loaded.laps |= request.laps;
        loaded.telemetry |= request.telemetry;
        loaded.weather |= request.weather;
        loaded.essentials = true;
        Ok(())
    }

    fn laps(&self) -> Result<Readiness<Arc<LapsTable>>> {
        let (laps, telemetry) = {
            let loaded = locked(&self.loaded);
            (loaded.laps, loaded.telemetry)
        };
        let table = if telemetry { &self.fixture.lap_telemetry } else { &self.fixture.laps };
        Ok(self.ready(Category::Laps, laps, table))
    }

    fn results(&self) -> Result<Readiness<Arc<ResultsTable>>> {
        let loaded = locked(&self.loaded).essentials;
        Ok(self.ready(Category::Essentials, loaded, &self.fixture.results))
    }

    fn car_data(&self) -> Result<Readiness<Arc<TelemetryTable>>> {
        let loaded = locked(&self.loaded).telemetry;
        Ok(self.ready(Category::Telemetry, loaded, &self.fixture.car_data))
    }

    fn weather_data(&self) -> Result<Readiness<Arc<WeatherTable>>> {
        let loaded = locked(&self.loaded).weather;
        Ok(self.ready(Category::Weather, loaded, &self.fixture.weather))
    }

    fn session_info(&self) -> Result<Readiness<Arc<SessionInfo>>> {
        let loaded = locked(&self.loaded).essentials;
        Ok(if loaded {
            Readiness::Ready(Arc::clone(&self.fixture.info))
        } else {
            Readiness::NotReady
        })
    }

    fn circuit_info(&self) -> Result<Option<Arc<CircuitGeometry>>> {
        let loaded = locked(&self.loaded);
        if loaded.laps && loaded.telemetry { Ok(self.fixture.circuit.clone()) } else { Ok(None) }
    }
}

/// Source double that creates one [`MockSession`] per key.
#[derive(Default)]
pub struct MockSource {
    default_behaviour: MockBehaviour,
    behaviours: Mutex<HashMap<SessionKey, MockBehaviour>>,
    sessions: Mutex<HashMap<SessionKey, Arc<MockSession>>>,
    schedules: Mutex<HashMap<i32, Vec<ScheduledEvent>>>,
    opened: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviour for sessions without a key-specific override.
    pub fn with_behaviour(mut self, behaviour: MockBehaviour) -> Self {
        self.default_behaviour = behaviour;
        self
    }

    /// Behaviour for one key. Must be set before the session is opened.
    pub fn set_behaviour(&self, key: SessionKey, behaviour: MockBehaviour) {
        locked(&self.behaviours).insert(key, behaviour);
    }

    pub fn set_schedule(&self, year: i32, events: Vec<ScheduledEvent>) {
        locked(&self.schedules).insert(year, events);
    }

    /// Session previously opened for `key`.
    pub fn session(&self, key: &SessionKey) -> Option<Arc<MockSession>> {
        locked(&self.sessions).get(key).cloned()
    }

    /// Number of `get_session`/`get_testing_session` calls.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn open_key(&self, key: SessionKey) -> Arc<dyn RemoteSession> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let behaviour = locked(&self.behaviours)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default_behaviour.clone());
        let session = Arc::new(MockSession::new(key.clone(), behaviour));
        locked(&self.sessions).insert(key, Arc::clone(&session));
        session
    }
}

#[async_trait::async_trait]
impl SessionSource for MockSource {
    fn get_session(
        &self,
        year: i32,
        event: &EventRef,
        identifier: SessionIdentifier,
    ) -> Result<Arc<dyn RemoteSession>> {
        Ok(self.open_key(SessionKey {
            year,
            event: event.clone(),
            session: SessionSlot::Named(identifier),
            is_testing: false,
        }))
    }

    fn get_testing_session(
        &self,
        year: i32,
        test_number: u32,
        day: u8,
    ) -> Result<Arc<dyn RemoteSession>> {
        Ok(self.open_key(SessionKey::testing(year, test_number, day)))
    }

    async fn event_schedule(&self, year: i32) -> Result<Vec<ScheduledEvent>> {
        Ok(locked(&self.schedules).get(&year).cloned().unwrap_or_default())
    }
}

/// Fixed instant used as "now" in schedule-driven tests.
pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).single().unwrap_or_default()
}
