//! Remote session source traits
//!
//! Sources abstract over the upstream data provider (recordings on disk, a
//! live timing backend, test doubles). A source hands out [`RemoteSession`]s,
//! which hold nothing until `load` is called for a set of categories.

use std::sync::Arc;

use crate::types::{
    Category, CircuitGeometry, EventRef, LapsTable, LoadRequest, ResultsTable, ScheduledEvent,
    SessionIdentifier, SessionInfo, SessionKey, SessionSlot, TelemetryTable, WeatherTable,
};
use crate::{Result, SessionError};

/// Outcome of reading a remote accessor.
///
/// `NotReady` means the category has not been populated yet, either because
/// no load requested it or because the upstream is still fetching it.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness<T> {
    Ready(T),
    NotReady,
}

impl<T> Readiness<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Readiness<U> {
        match self {
            Readiness::Ready(value) => Readiness::Ready(f(value)),
            Readiness::NotReady => Readiness::NotReady,
        }
    }

    /// Convert into the transient error the poll loop swallows.
    pub fn into_result(self, category: Category) -> Result<T> {
        match self {
            Readiness::Ready(value) => Ok(value),
            Readiness::NotReady => Err(SessionError::not_ready(category)),
        }
    }
}

impl<T> From<Option<T>> for Readiness<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Readiness::Ready(value),
            None => Readiness::NotReady,
        }
    }
}

/// One upstream session.
///
/// `load` populates the requested categories; accessors report `NotReady`
/// until the matching load has completed. Implementations must tolerate
/// concurrent accessor calls while a load is running.
#[async_trait::async_trait]
pub trait RemoteSession: Send + Sync + 'static {
    /// Fetch the requested categories.
    ///
    /// Results and session info are populated by every load; `messages` is
    /// needed for a complete classification.
    async fn load(&self, request: LoadRequest) -> Result<()>;

    /// Lap table. Laps carry telemetry samples once telemetry has been loaded.
    fn laps(&self) -> Result<Readiness<Arc<LapsTable>>>;

    fn results(&self) -> Result<Readiness<Arc<ResultsTable>>>;

    fn car_data(&self) -> Result<Readiness<Arc<TelemetryTable>>>;

    fn weather_data(&self) -> Result<Readiness<Arc<WeatherTable>>>;

    fn session_info(&self) -> Result<Readiness<Arc<SessionInfo>>>;

    /// Circuit geometry derived from position data.
    ///
    /// Only meaningful after laps and telemetry are loaded. `None` means the
    /// upstream has no geometry for this session.
    fn circuit_info(&self) -> Result<Option<Arc<CircuitGeometry>>>;
}

/// Factory for remote sessions plus season metadata.
#[async_trait::async_trait]
pub trait SessionSource: Send + Sync + 'static {
    /// Address a championship session. Must not perform I/O.
    fn get_session(
        &self,
        year: i32,
        event: &EventRef,
        identifier: SessionIdentifier,
    ) -> Result<Arc<dyn RemoteSession>>;

    /// Address one day of a pre-season test. Must not perform I/O.
    fn get_testing_session(
        &self,
        year: i32,
        test_number: u32,
        day: u8,
    ) -> Result<Arc<dyn RemoteSession>>;

    /// Season schedule in round order.
    async fn event_schedule(&self, year: i32) -> Result<Vec<ScheduledEvent>>;

    /// Address the session a validated key refers to.
    fn open(&self, key: &SessionKey) -> Result<Arc<dyn RemoteSession>> {
        match (&key.event, key.session) {
            (EventRef::Round(test_number), SessionSlot::TestingDay(day)) if key.is_testing => {
                self.get_testing_session(key.year, *test_number, day)
            }
            (event, SessionSlot::Named(identifier)) if !key.is_testing => {
                self.get_session(key.year, event, identifier)
            }
            _ => Err(SessionError::invalid_key(format!("cannot address session {}", key))),
        }
    }
}
