//! Lazy, de-duplicated loading of one upstream session
//!
//! A [`SessionLoader`] wraps one [`RemoteSession`] and fetches each data
//! category the first time it is asked for. Concurrent callers of the same
//! category share a single remote load and receive the same `Arc`.
//!
//! Loads run in a spawned task, so dropping a caller's future does not abort
//! a load other callers may be waiting on. Locks are taken in [`Category`]
//! order (laps, telemetry, weather, essentials); only [`SessionLoader::circuit_info`]
//! and [`SessionLoader::load_all`] wait for more than one. Telemetry and
//! results loads may also take the laps lock, but only with a non-blocking
//! `try_lock`.

mod slot;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::LoaderSettings;
use crate::retry::{self, RetryPolicy};
use crate::source::{Readiness, RemoteSession};
use crate::types::{
    Category, CircuitGeometry, LapsTable, LoadRequest, ResultsTable, SessionInfo, SessionKey,
    WeatherTable,
};
use crate::{ErrorKind, Result, SessionError};
use slot::{CategorySlot, SlotGuard};

/// Results and session info arrive with the same remote load.
#[derive(Clone)]
struct Essentials {
    results: Arc<ResultsTable>,
    info: Arc<SessionInfo>,
}

struct LoaderInner {
    key: SessionKey,
    session: Arc<dyn RemoteSession>,
    settings: Arc<LoaderSettings>,
    laps: CategorySlot<Arc<LapsTable>>,
    /// Laps with telemetry samples attached.
    telemetry: CategorySlot<Arc<LapsTable>>,
    weather: CategorySlot<Arc<WeatherTable>>,
    essentials: CategorySlot<Essentials>,
    circuit: OnceLock<Arc<CircuitGeometry>>,
}

/// Handle to the cached state of one session. Cheap to clone.
#[derive(Clone)]
pub struct SessionLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for SessionLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLoader")
            .field("key", &self.inner.key)
            .field("loaded", &self.loaded_categories())
            .finish()
    }
}

impl SessionLoader {
    /// Wrap a remote session. Performs no I/O.
    pub fn new(
        key: SessionKey,
        session: Arc<dyn RemoteSession>,
        settings: Arc<LoaderSettings>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                key,
                session,
                settings,
                laps: CategorySlot::new(Category::Laps),
                telemetry: CategorySlot::new(Category::Telemetry),
                weather: CategorySlot::new(Category::Weather),
                essentials: CategorySlot::new(Category::Essentials),
                circuit: OnceLock::new(),
            }),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.inner.key
    }

    pub fn is_loaded(&self, category: Category) -> bool {
        match category {
            Category::Laps => self.inner.laps.is_loaded(),
            Category::Telemetry => self.inner.telemetry.is_loaded(),
            Category::Weather => self.inner.weather.is_loaded(),
            Category::Essentials => self.inner.essentials.is_loaded(),
        }
    }

    /// Categories that have been published, in lock order.
    pub fn loaded_categories(&self) -> Vec<Category> {
        Category::ALL.into_iter().filter(|category| self.is_loaded(*category)).collect()
    }

    /// Whether both handles refer to the same cached session.
    pub fn ptr_eq(&self, other: &SessionLoader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles, including in-flight load tasks.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub async fn laps(&self) -> Result<Arc<LapsTable>> {
        if let Some(laps) = self.inner.laps.get() {
            debug!(session = %self.inner.key, "laps cache hit");
            return Ok(laps);
        }
        self.detached(|inner| async move { inner.load_laps().await }).await
    }

    /// Laps with per-lap car data attached.
    pub async fn lap_telemetry(&self) -> Result<Arc<LapsTable>> {
        if let Some(laps) = self.inner.telemetry.get() {
            debug!(session = %self.inner.key, "telemetry cache hit");
            return Ok(laps);
        }
        self.detached(|inner| async move { inner.load_lap_telemetry().await }).await
    }

    pub async fn weather(&self) -> Result<Arc<WeatherTable>> {
        if let Some(weather) = self.inner.weather.get() {
            debug!(session = %self.inner.key, "weather cache hit");
            return Ok(weather);
        }
        self.detached(|inner| async move { inner.load_weather().await }).await
    }

    /// Classification. Loads session info as well.
    pub async fn results(&self) -> Result<Arc<ResultsTable>> {
        Ok(self.essentials().await?.results)
    }

    /// Session metadata. Loads results as well.
    pub async fn session_info(&self) -> Result<Arc<SessionInfo>> {
        Ok(self.essentials().await?.info)
    }

    /// Track geometry. Loads laps and telemetry first if needed.
    ///
    /// Fails with [`SessionError::UpstreamDataAbsent`] when the upstream has
    /// no usable geometry for the session.
    pub async fn circuit_info(&self) -> Result<Arc<CircuitGeometry>> {
        if let Some(circuit) = self.inner.circuit.get() {
            return Ok(Arc::clone(circuit));
        }
        self.detached(|inner| async move { inner.load_circuit_info().await }).await
    }

    /// Load laps, telemetry and weather with a single remote call.
    ///
    /// Categories that are already loaded are left out of the request. Polls
    /// with the background budget.
    pub async fn load_all(&self) -> Result<()> {
        self.detached(|inner| async move { inner.load_all().await }).await
    }

    async fn essentials(&self) -> Result<Essentials> {
        if let Some(essentials) = self.inner.essentials.get() {
            debug!(session = %self.inner.key, "results cache hit");
            return Ok(essentials);
        }
        self.detached(|inner| async move { inner.load_essentials().await }).await
    }

    async fn detached<T, F, Fut>(&self, task: F) -> Result<T>
    where
        F: FnOnce(Arc<LoaderInner>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        tokio::spawn(task(Arc::clone(&self.inner))).await?
    }
}

impl LoaderInner {
    async fn load_laps(&self) -> Result<Arc<LapsTable>> {
        self.laps
            .get_or_load(|| async {
                self.remote_load(LoadRequest::laps_only()).await?;
                self.poll(Category::Laps, &self.settings.laps, || self.session.laps()).await
            })
            .await
    }

    async fn load_weather(&self) -> Result<Arc<WeatherTable>> {
        self.weather
            .get_or_load(|| async {
                self.remote_load(LoadRequest::weather_only()).await?;
                self.poll(Category::Weather, &self.settings.weather, || self.session.weather_data())
                    .await
            })
            .await
    }

    async fn load_essentials(&self) -> Result<Essentials> {
        self.essentials
            .get_or_load(|| async {
                let request = self.settings.results_loads.request_for(self.key.session);
                // Laps fetched for the classification are kept if no laps load is running.
                let laps = if request.laps && !self.laps.is_loaded() {
                    self.laps.try_acquire()
                } else {
                    None
                };

                self.remote_load(request).await?;
                let essentials = self
                    .poll(Category::Essentials, &self.settings.results, || self.read_essentials())
                    .await?;

                if let Some(guard) = laps.filter(|guard| guard.get().is_none()) {
                    match self.session.laps() {
                        Ok(Readiness::Ready(table)) => {
                            guard.publish(table);
                        }
                        Ok(Readiness::NotReady) => {
                            debug!(session = %self.key, "Laps not ready after results load");
                        }
                        Err(e) => {
                            debug!(session = %self.key, error = %e, "Laps unreadable");
                        }
                    }
                }
                Ok(essentials)
            })
            .await
    }

    async fn load_lap_telemetry(&self) -> Result<Arc<LapsTable>> {
        loop {
            if let Some(enriched) = self.telemetry.get() {
                return Ok(enriched);
            }
            if !self.laps.is_loaded() {
                // Let a running laps load finish so laps are not requested twice.
                drop(self.laps.acquire().await);
            }

            let telemetry = self.telemetry.acquire().await;
            if let Some(enriched) = telemetry.get() {
                return Ok(enriched);
            }
            let laps = if self.laps.is_loaded() {
                None
            } else {
                match self.laps.try_acquire() {
                    Some(guard) => Some(guard),
                    None => {
                        debug!(session = %self.key, "Laps load started concurrently, waiting");
                        continue;
                    }
                }
            };

            let enriched = self.fetch_lap_telemetry(laps.as_ref()).await?;
            return Ok(telemetry.publish(enriched));
        }
    }

    /// Load telemetry. The caller holds the telemetry lock, and the laps lock
    /// as `held_laps` unless laps are already loaded.
    async fn fetch_lap_telemetry(
        &self,
        held_laps: Option<&SlotGuard<'_, Arc<LapsTable>>>,
    ) -> Result<Arc<LapsTable>> {
        let laps_loaded = self.laps.is_loaded();
        let request = if laps_loaded {
            LoadRequest::telemetry_only()
        } else {
            LoadRequest::laps_only().with_telemetry()
        };

        self.remote_load(request).await?;
        let laps = self
            .poll(Category::Telemetry, &self.settings.telemetry, || self.read_lap_telemetry())
            .await?;

        if let Some(guard) = held_laps.filter(|_| !laps_loaded) {
            guard.publish(Arc::clone(&laps));
        }
        Ok(laps)
    }

    async fn load_circuit_info(&self) -> Result<Arc<CircuitGeometry>> {
        let laps = self.laps.acquire().await;
        let telemetry = self.telemetry.acquire().await;
        if let Some(circuit) = self.circuit.get() {
            return Ok(Arc::clone(circuit));
        }

        match telemetry.get() {
            Some(enriched) => {
                if laps.get().is_none() {
                    laps.publish(enriched);
                }
            }
            None => {
                let enriched = self.fetch_lap_telemetry(Some(&laps)).await?;
                telemetry.publish(enriched);
            }
        }

        match self.session.circuit_info()? {
            Some(geometry) if !geometry.is_empty() => {
                Ok(Arc::clone(self.circuit.get_or_init(|| geometry)))
            }
            _ => Err(SessionError::absent(format!("circuit geometry for {}", self.key))),
        }
    }

    async fn load_all(&self) -> Result<()> {
        let laps = self.laps.acquire().await;
        let telemetry = self.telemetry.acquire().await;
        let weather = self.weather.acquire().await;

        // Enriched laps imply plain laps.
        if laps.get().is_none() {
            if let Some(enriched) = telemetry.get() {
                laps.publish(enriched);
            }
        }

        let request = LoadRequest {
            laps: laps.get().is_none(),
            telemetry: telemetry.get().is_none(),
            weather: weather.get().is_none(),
            messages: false,
        };
        if request.is_empty() {
            debug!(session = %self.key, "All categories already loaded");
            return Ok(());
        }

        self.remote_load(request).await?;
        let policy = &self.settings.full_load;

        // Laps are only missing when telemetry is too, so one poll covers both.
        if request.telemetry {
            let enriched =
                self.poll(Category::Telemetry, policy, || self.read_lap_telemetry()).await?;
            telemetry.publish(Arc::clone(&enriched));
            if request.laps {
                laps.publish(enriched);
            }
        }

        if request.weather {
            let table =
                self.poll(Category::Weather, policy, || self.session.weather_data()).await?;
            weather.publish(table);
        }
        Ok(())
    }

    fn read_lap_telemetry(&self) -> Result<Readiness<Arc<LapsTable>>> {
        if !self.session.car_data()?.is_ready() {
            return Ok(Readiness::NotReady);
        }
        self.session.laps()
    }

    fn read_essentials(&self) -> Result<Readiness<Essentials>> {
        let results = match self.session.results()? {
            Readiness::Ready(results) => results,
            Readiness::NotReady => return Ok(Readiness::NotReady),
        };
        Ok(self.session.session_info()?.map(|info| Essentials { results, info }))
    }

    async fn remote_load(&self, request: LoadRequest) -> Result<()> {
        info!(
            year = self.key.year,
            event = %self.key.event,
            session = %self.key.session,
            %request,
            "Loading session data"
        );
        let start = Instant::now();
        self.session.load(request).await?;
        debug!(
            session = %self.key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Remote load finished"
        );
        Ok(())
    }

    /// Poll `read` until the category is ready or the budget runs out.
    async fn poll<T>(
        &self,
        category: Category,
        policy: &RetryPolicy,
        read: impl Fn() -> Result<Readiness<T>>,
    ) -> Result<T> {
        let operation = format!("{} for {}", category, self.key);
        retry::poll_ignoring(&operation, policy, &[ErrorKind::DataNotReady], || {
            std::future::ready(read().and_then(|readiness| readiness.into_result(category)))
        })
        .await
    }
}
