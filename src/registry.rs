//! Process-wide map from session key to loader
//!
//! Every caller asking for the same [`SessionKey`] gets a handle to the same
//! [`SessionLoader`], so data loaded for one request is reused by the next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{Config, LoaderSettings, RegistrySettings};
use crate::loader::SessionLoader;
use crate::source::SessionSource;
use crate::types::SessionKey;

/// Lookup counters since the registry was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Entry {
    loader: SessionLoader,
    last_used: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<SessionKey, Entry>,
    clock: u64,
    stats: RegistryStats,
}

/// Cache of session loaders keyed by [`SessionKey`].
///
/// With `max_entries` set, least recently used loaders are dropped when a new
/// one is inserted. Loaders that are still referenced outside the registry
/// are skipped, so the map can exceed its bound until those handles go away.
pub struct SessionRegistry {
    source: Arc<dyn SessionSource>,
    settings: Arc<LoaderSettings>,
    max_entries: Option<usize>,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(source: Arc<dyn SessionSource>, config: &Config) -> Self {
        Self::with_settings(source, config.loader.clone(), &config.registry)
    }

    pub fn with_settings(
        source: Arc<dyn SessionSource>,
        loader: LoaderSettings,
        registry: &RegistrySettings,
    ) -> Self {
        Self {
            source,
            settings: Arc::new(loader),
            max_entries: registry.max_entries,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn source(&self) -> &Arc<dyn SessionSource> {
        &self.source
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the loader for `key`, creating it on first use.
    ///
    /// The key is validated before the source is consulted. Creating a loader
    /// performs no I/O.
    pub fn get_or_create(&self, key: &SessionKey) -> Result<SessionLoader> {
        key.validate()?;

        let mut state = self.state();
        state.clock += 1;
        let now = state.clock;

        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_used = now;
            let loader = entry.loader.clone();
            state.stats.hits += 1;
            debug!(session = %key, "Registry hit");
            return Ok(loader);
        }

        let session = self.source.open(key)?;
        let loader = SessionLoader::new(key.clone(), session, Arc::clone(&self.settings));
        state.entries.insert(key.clone(), Entry { loader: loader.clone(), last_used: now });
        state.stats.misses += 1;
        debug!(session = %key, entries = state.entries.len(), "Registry miss, created loader");

        if let Some(max) = self.max_entries {
            Self::evict_idle(&mut state, max, key);
        }
        Ok(loader)
    }

    /// Loader for `key` if one is cached. Does not count as a lookup.
    pub fn get(&self, key: &SessionKey) -> Option<SessionLoader> {
        self.state().entries.get(key).map(|entry| entry.loader.clone())
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.state().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        self.state().stats
    }

    /// Keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<SessionKey> {
        self.state().entries.keys().cloned().collect()
    }

    /// Warm the lap telemetry of `key` in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn preload_telemetry(&self, key: &SessionKey) -> Result<JoinHandle<Result<()>>> {
        let loader = self.get_or_create(key)?;
        info!(session = %key, "Preloading lap telemetry");
        Ok(tokio::spawn(async move {
            match loader.lap_telemetry().await {
                Ok(laps) => {
                    debug!(session = %loader.key(), laps = laps.len(), "Telemetry preloaded");
                    Ok(())
                }
                Err(e) => {
                    warn!(session = %loader.key(), "Telemetry preload failed: {}", e);
                    Err(e)
                }
            }
        }))
    }

    fn evict_idle(state: &mut RegistryState, max: usize, keep: &SessionKey) {
        while state.entries.len() > max {
            // A handle count of one means only the registry holds the loader.
            let victim = state
                .entries
                .iter()
                .filter(|(key, entry)| *key != keep && entry.loader.handle_count() == 1)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else {
                debug!(
                    entries = state.entries.len(),
                    max, "Registry over bound, all other loaders in use"
                );
                break;
            };
            state.entries.remove(&victim);
            state.stats.evictions += 1;
            debug!(session = %victim, "Evicted idle loader");
        }
    }
}
