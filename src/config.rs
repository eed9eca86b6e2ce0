//! Runtime configuration
//!
//! Configuration is read from YAML. Every section and field is optional;
//! missing values fall back to the defaults below.
//!
//! ```yaml
//! loader:
//!   laps: { poll_interval_ms: 200, timeout_ms: 30000 }
//!   weather: { poll_interval_ms: 100, timeout_ms: 10000 }
//!   results_loads:
//!     default: { messages: true }
//!     overrides:
//!       Sprint Qualifying: { laps: true, messages: true }
//! registry:
//!   max_entries: 64
//! prefetch:
//!   on_startup: true
//!   refresh_interval_ms: 3600000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::{LoadRequest, SessionIdentifier, SessionSlot};
use crate::{Result, SessionError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub loader: LoaderSettings,
    pub registry: RegistrySettings,
    pub prefetch: PrefetchSettings,
}

impl Config {
    /// Parse and validate YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(yaml).map_err(|e| {
            SessionError::config_with_source("configuration YAML is invalid", Box::new(e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML configuration file.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            SessionError::config_with_source(
                format!("cannot read configuration file {}", path.display()),
                Box::new(e),
            )
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        self.loader.validate()?;
        if self.registry.max_entries == Some(0) {
            return Err(SessionError::config("registry.max_entries must be at least 1"));
        }
        if self.prefetch.refresh_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(SessionError::config("prefetch.refresh_interval_ms must be non-zero"));
        }
        Ok(())
    }
}

/// Poll budgets per category and the results load matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSettings {
    pub laps: RetryPolicy,
    /// Used for both results and session info.
    pub results: RetryPolicy,
    pub telemetry: RetryPolicy,
    pub weather: RetryPolicy,
    /// Used by `load_all`, which only the prefetcher calls.
    pub full_load: RetryPolicy,
    pub results_loads: ResultsLoadPlan,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            laps: RetryPolicy::interactive(),
            results: RetryPolicy::interactive(),
            telemetry: RetryPolicy::interactive(),
            weather: RetryPolicy::new(Duration::from_millis(200), Duration::from_secs(10)),
            full_load: RetryPolicy::background(),
            results_loads: ResultsLoadPlan::default(),
        }
    }
}

impl LoaderSettings {
    pub fn validate(&self) -> Result<()> {
        let policies = [
            ("laps", &self.laps),
            ("results", &self.results),
            ("telemetry", &self.telemetry),
            ("weather", &self.weather),
            ("full_load", &self.full_load),
        ];
        for (name, policy) in policies {
            if policy.poll_interval.is_zero() {
                return Err(SessionError::config(format!(
                    "loader.{}.poll_interval_ms must be non-zero",
                    name
                )));
            }
            if policy.timeout.is_zero() {
                return Err(SessionError::config(format!(
                    "loader.{}.timeout_ms must be non-zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Which remote categories a results load requests, per session kind.
///
/// The upstream only classifies some session kinds correctly when extra
/// categories are loaded alongside the results. Testing days use `default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultsLoadPlan {
    pub default: LoadRequest,
    pub overrides: HashMap<SessionIdentifier, LoadRequest>,
}

impl Default for ResultsLoadPlan {
    fn default() -> Self {
        let mut overrides = HashMap::new();
        // Sprint Qualifying results are derived from lap data upstream.
        overrides
            .insert(SessionIdentifier::SprintQualifying, LoadRequest::messages_only().with_laps());
        Self { default: LoadRequest::messages_only(), overrides }
    }
}

impl ResultsLoadPlan {
    pub fn request_for(&self, session: SessionSlot) -> LoadRequest {
        session
            .identifier()
            .and_then(|ident| self.overrides.get(&ident).copied())
            .unwrap_or(self.default)
    }
}

/// Loader registry bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySettings {
    /// Maximum number of cached loaders. Unbounded when absent.
    pub max_entries: Option<usize>,
}

/// Recent-event prefetch behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrefetchSettings {
    /// Run a prefetch pass when the service starts.
    pub on_startup: bool,
    /// Repeat the pass on this interval. Runs once when absent.
    #[serde(rename = "refresh_interval_ms", with = "optional_duration_ms")]
    pub refresh_interval: Option<Duration>,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self { on_startup: true, refresh_interval: None }
    }
}

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serialize an `Option<Duration>` as whole milliseconds or null.
pub mod optional_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
