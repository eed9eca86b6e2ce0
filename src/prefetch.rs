//! Warm the cache with the most recent race weekend
//!
//! On startup (and optionally on a fixed interval) the prefetcher looks up the
//! latest weekend that has begun and runs [`SessionLoader::load_all`] for each
//! of its sessions that has already started. One failing session never stops
//! the others.
//!
//! [`SessionLoader::load_all`]: crate::loader::SessionLoader::load_all

use chrono::{DateTime, Datelike, Utc};
use futures::{Stream, StreamExt, future::join_all};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::PrefetchSettings;
use crate::registry::SessionRegistry;
use crate::types::{MAX_TESTING_DAY, ScheduledEvent, SessionKey, SessionSlot};

/// Sessions chosen for one prefetch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchPlan {
    pub year: i32,
    pub event_name: String,
    pub keys: Vec<SessionKey>,
}

/// A session whose prefetch failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchFailure {
    pub key: SessionKey,
    pub reason: String,
}

/// Outcome of one prefetch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchReport {
    pub started_at: DateTime<Utc>,
    /// Event that was prefetched, if any weekend had begun.
    pub event: Option<String>,
    pub loaded: Vec<SessionKey>,
    pub failed: Vec<PrefetchFailure>,
}

impl PrefetchReport {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self { started_at, event: None, loaded: Vec::new(), failed: Vec::new() }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Choose the sessions of the latest weekend that began before `now`.
///
/// Testing events are numbered one past their schedule round and their
/// sessions are addressed by day. Returns `None` when no weekend has begun.
pub fn plan(year: i32, schedule: &[ScheduledEvent], now: DateTime<Utc>) -> Option<PrefetchPlan> {
    let event = schedule.iter().rev().find(|event| event.has_started(now))?;
    let testing = event.is_testing();

    let keys = event
        .sessions
        .iter()
        .enumerate()
        .filter(|(_, session)| session.has_started(now))
        .filter_map(|(index, session)| {
            if testing {
                let day = u8::try_from(index + 1).ok().filter(|day| *day <= MAX_TESTING_DAY)?;
                Some(SessionKey::testing(year, event.round_number + 1, day))
            } else {
                session.kind.map(|kind| SessionKey::new(year, event.round_number, kind))
            }
        })
        .collect();

    Some(PrefetchPlan { year, event_name: event.event_name.clone(), keys })
}

/// Loads recent sessions into a shared registry.
pub struct Prefetcher {
    registry: Arc<SessionRegistry>,
    reports: watch::Sender<Option<Arc<PrefetchReport>>>,
}

impl Prefetcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let (reports, _) = watch::channel(None);
        Self { registry, reports }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Report of the most recent completed pass.
    pub fn last_report(&self) -> Option<Arc<PrefetchReport>> {
        self.reports.borrow().clone()
    }

    /// Stream of reports, starting with the latest one if a pass has run.
    pub fn reports(&self) -> impl Stream<Item = Arc<PrefetchReport>> + use<> {
        WatchStream::new(self.reports.subscribe()).filter_map(|report| async move { report })
    }

    /// Find the latest weekend as of `now` and load all of its started sessions.
    ///
    /// Falls back to the previous season when nothing has started yet this
    /// year. Only schedule lookups fail the pass; session failures are
    /// recorded in the report.
    pub async fn prefetch_recent(&self, now: DateTime<Utc>) -> Result<PrefetchReport> {
        let Some(plan) = self.find_plan(now).await? else {
            info!("No event has started yet, nothing to prefetch");
            return Ok(self.publish(PrefetchReport::empty(now)));
        };

        info!(
            year = plan.year,
            event = %plan.event_name,
            sessions = plan.keys.len(),
            "Prefetching recent event"
        );

        let outcomes = join_all(plan.keys.iter().map(|key| self.load_session(key))).await;

        let mut report = PrefetchReport::empty(now);
        report.event = Some(plan.event_name.clone());
        for (key, outcome) in plan.keys.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.loaded.push(key),
                Err(e) => {
                    warn!(session = %key, "Prefetch failed: {}", e);
                    report.failed.push(PrefetchFailure { key, reason: e.to_string() });
                }
            }
        }

        info!(
            event = %plan.event_name,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Prefetch finished"
        );
        Ok(self.publish(report))
    }

    /// Run passes in the background until `cancel` fires.
    ///
    /// The first pass runs immediately when `on_startup` is set; further
    /// passes follow every `refresh_interval`.
    pub fn spawn(
        self: &Arc<Self>,
        settings: &PrefetchSettings,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let prefetcher = Arc::clone(self);
        let run_now = settings.on_startup;
        let interval = settings.refresh_interval;

        tokio::spawn(async move {
            info!(on_startup = run_now, ?interval, "Prefetch task started");
            let mut first = true;

            loop {
                if !first || run_now {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Prefetch cancelled during pass");
                            break;
                        }
                        result = prefetcher.prefetch_recent(Utc::now()) => {
                            if let Err(e) = result {
                                warn!("Prefetch pass failed: {}", e);
                            }
                        }
                    }
                }
                first = false;

                let Some(interval) = interval else { break };
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Prefetch cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }

            info!("Prefetch task ended");
        })
    }

    async fn find_plan(&self, now: DateTime<Utc>) -> Result<Option<PrefetchPlan>> {
        let source = self.registry.source();
        for year in [now.year(), now.year() - 1] {
            let schedule = source.event_schedule(year).await?;
            if let Some(plan) = plan(year, &schedule, now) {
                return Ok(Some(plan));
            }
            debug!(year, events = schedule.len(), "No started event in season");
        }
        Ok(None)
    }

    async fn load_session(&self, key: &SessionKey) -> Result<()> {
        let loader = self.registry.get_or_create(key)?;
        loader.load_all().await?;
        if let SessionSlot::Named(_) = key.session {
            // Classification is what most callers ask for first.
            loader.results().await?;
        }
        debug!(session = %key, "Session prefetched");
        Ok(())
    }

    fn publish(&self, report: PrefetchReport) -> PrefetchReport {
        self.reports.send_replace(Some(Arc::new(report.clone())));
        report
    }
}
