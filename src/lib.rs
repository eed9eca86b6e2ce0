//! Session data loading and caching for a Formula 1 data API.
//!
//! Paddock sits between request handlers and an upstream session provider.
//! It loads each session's data categories lazily, de-duplicates concurrent
//! loads, and keeps one loader per session alive for the whole process.
//!
//! # Features
//!
//! - **Lazy loading**: laps, telemetry, weather and results are fetched on first use
//! - **De-duplication**: concurrent callers share one upstream load per category
//! - **Bounded polling**: data the upstream is still populating is polled within a budget
//! - **Warm cache**: the latest race weekend is prefetched in the background
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use paddock::{Config, Paddock, SessionIdentifier, SessionKey};
//!
//! #[tokio::main]
//! async fn main() -> paddock::Result<()> {
//!     let paddock = Paddock::open("/var/lib/paddock/recordings", Config::default());
//!
//!     let key = SessionKey::new(2024, 5, SessionIdentifier::Race);
//!     let laps = paddock.session(&key)?.laps().await?;
//!     println!("{} laps", laps.len());
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod loader;
pub mod logging;
pub mod prefetch;
pub mod registry;
pub mod retry;
pub mod source;
pub mod sources;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub use config::Config;
pub use error::*;
pub use loader::SessionLoader;
pub use prefetch::{PrefetchReport, Prefetcher};
pub use registry::{RegistryStats, SessionRegistry};
pub use source::{Readiness, RemoteSession, SessionSource};
pub use sources::ReplaySource;
pub use types::*;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Entry point wiring a source, the loader registry and the prefetcher.
///
/// Build one per process and share it; all methods take `&self`.
pub struct Paddock {
    config: Config,
    registry: Arc<SessionRegistry>,
    prefetcher: Arc<Prefetcher>,
}

impl Paddock {
    pub fn new(source: Arc<dyn SessionSource>, config: Config) -> Self {
        let registry = Arc::new(SessionRegistry::new(source, &config));
        let prefetcher = Arc::new(Prefetcher::new(Arc::clone(&registry)));
        Self { config, registry, prefetcher }
    }

    /// Serve recorded sessions from `root`.
    pub fn open(root: impl Into<PathBuf>, config: Config) -> Self {
        Self::new(Arc::new(ReplaySource::new(root)), config)
    }

    /// Loader for `key`. Invalid keys are rejected before any upstream call.
    pub fn session(&self, key: &SessionKey) -> Result<SessionLoader> {
        self.registry.get_or_create(key)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn prefetcher(&self) -> &Arc<Prefetcher> {
        &self.prefetcher
    }

    /// Start background prefetching as configured.
    ///
    /// The task stops when `cancel` fires.
    pub fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.prefetcher.spawn(&self.config.prefetch, cancel)
    }
}
