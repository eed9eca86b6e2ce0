//! Loader behaviour against the instrumented mock session
//!
//! These tests check load de-duplication, the requests issued per accessor
//! and how failures leave the cache.

use super::*;
use crate::test_utils::{MockBehaviour, MockSession, SessionFixture};
use crate::types::SessionIdentifier;
use std::time::Duration;

fn loader_for(
    ident: SessionIdentifier,
    behaviour: MockBehaviour,
) -> (SessionLoader, Arc<MockSession>) {
    loader_with_settings(ident, behaviour, LoaderSettings::default())
}

fn loader_with_settings(
    ident: SessionIdentifier,
    behaviour: MockBehaviour,
    settings: LoaderSettings,
) -> (SessionLoader, Arc<MockSession>) {
    let _ = tracing_subscriber::fmt::try_init();
    let key = SessionKey::new(2024, 1, ident);
    let session = Arc::new(MockSession::new(key.clone(), behaviour));
    let loader = SessionLoader::new(key, session.clone(), Arc::new(settings));
    (loader, session)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_laps_calls_share_one_load() {
    let behaviour = MockBehaviour::default().with_load_delay(Duration::from_millis(50));
    let (loader, session) = loader_for(SessionIdentifier::Race, behaviour);

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let loader = loader.clone();
            tokio::spawn(async move { loader.laps().await })
        })
        .collect();

    let mut tables = Vec::new();
    for task in tasks {
        tables.push(task.await.unwrap().unwrap());
    }

    assert_eq!(session.load_count(), 1);
    assert_eq!(session.loads(), vec![LoadRequest::laps_only()]);
    assert_eq!(session.max_concurrent_loads(), 1);
    assert!(tables.iter().all(|table| Arc::ptr_eq(table, &tables[0])));
}

#[tokio::test(start_paused = true)]
async fn cold_laps_fetch_polls_until_ready() {
    let interval = Duration::from_millis(200);
    let mut settings = LoaderSettings::default();
    settings.laps = RetryPolicy::new(interval, 10 * interval);
    let behaviour = MockBehaviour::default()
        .with_fixture(SessionFixture::with_laps(20))
        .with_not_ready_reads(Category::Laps, 2);
    let (loader, session) = loader_with_settings(SessionIdentifier::Race, behaviour, settings);
    let start = Instant::now();

    let laps = loader.laps().await.unwrap();

    assert_eq!(laps.len(), 20);
    assert_eq!(session.load_count(), 1);
    // Two not-ready answers, then ready well inside the budget.
    let elapsed = start.elapsed();
    assert!(elapsed >= 2 * interval, "{elapsed:?}");
    assert!(elapsed < 3 * interval, "{elapsed:?}");
    assert!(loader.is_loaded(Category::Laps));

    // Cached afterwards.
    let again = loader.laps().await.unwrap();
    assert!(Arc::ptr_eq(&laps, &again));
    assert_eq!(session.load_count(), 1);
}

#[tokio::test]
async fn only_sprint_qualifying_results_request_laps() {
    for ident in SessionIdentifier::ALL {
        let (loader, session) = loader_for(ident, MockBehaviour::default());
        let results = loader.results().await.unwrap();
        assert!(!results.is_empty());

        let loads = session.loads();
        assert_eq!(loads.len(), 1, "{ident}");
        assert!(loads[0].messages, "{ident}");
        assert_eq!(loads[0].laps, ident == SessionIdentifier::SprintQualifying, "{ident}");
        assert!(!loads[0].telemetry && !loads[0].weather, "{ident}");
    }
}

#[tokio::test]
async fn sprint_qualifying_results_keep_the_laps_they_load() {
    let (loader, session) =
        loader_for(SessionIdentifier::SprintQualifying, MockBehaviour::default());

    loader.results().await.unwrap();
    assert_eq!(loader.loaded_categories(), vec![Category::Laps, Category::Essentials]);

    let laps = loader.laps().await.unwrap();
    assert_eq!(laps.len(), 20);
    assert_eq!(session.load_count(), 1);
}

#[tokio::test]
async fn results_and_session_info_share_one_load() {
    let behaviour = MockBehaviour::default().with_load_delay(Duration::from_millis(20));
    let (loader, session) = loader_for(SessionIdentifier::Qualifying, behaviour);

    let (results, info) = tokio::join!(loader.results(), loader.session_info());

    assert_eq!(results.unwrap().len(), 2);
    assert_eq!(info.unwrap().meeting_name, "Bahrain Grand Prix");
    assert_eq!(session.load_count(), 1);
    assert_eq!(loader.loaded_categories(), vec![Category::Essentials]);
}

#[tokio::test]
async fn telemetry_after_laps_only_requests_telemetry() {
    let (loader, session) = loader_for(SessionIdentifier::Race, MockBehaviour::default());

    let laps = loader.laps().await.unwrap();
    assert!(!laps.has_telemetry());

    let enriched = loader.lap_telemetry().await.unwrap();
    assert!(enriched.has_telemetry());
    assert_eq!(session.loads(), vec![LoadRequest::laps_only(), LoadRequest::telemetry_only()]);

    // The plain laps stay cached as they were.
    assert!(Arc::ptr_eq(&loader.laps().await.unwrap(), &laps));
}

#[tokio::test]
async fn cold_telemetry_loads_and_publishes_laps() {
    let (loader, session) = loader_for(SessionIdentifier::Race, MockBehaviour::default());

    let enriched = loader.lap_telemetry().await.unwrap();

    assert_eq!(session.loads(), vec![LoadRequest::laps_only().with_telemetry()]);
    assert_eq!(loader.loaded_categories(), vec![Category::Laps, Category::Telemetry]);
    assert!(Arc::ptr_eq(&loader.laps().await.unwrap(), &enriched));
    assert_eq!(session.load_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_laps_and_telemetry_fetch_laps_once() {
    let behaviour = MockBehaviour::default().with_load_delay(Duration::from_millis(50));
    let (loader, session) = loader_for(SessionIdentifier::Race, behaviour);

    let (laps, enriched) = tokio::join!(loader.laps(), loader.lap_telemetry());

    assert_eq!(laps.unwrap().len(), 20);
    assert!(enriched.unwrap().has_telemetry());
    assert_eq!(session.laps_loads(), 1);
    assert_eq!(session.max_concurrent_loads(), 1);
    assert_eq!(loader.loaded_categories(), vec![Category::Laps, Category::Telemetry]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_telemetry_callers_fetch_laps_once() {
    let behaviour = MockBehaviour::default().with_load_delay(Duration::from_millis(20));
    let (loader, session) = loader_for(SessionIdentifier::Race, behaviour);

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let loader = loader.clone();
            tokio::spawn(async move {
                if i % 2 == 0 { loader.laps().await } else { loader.lap_telemetry().await }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(session.laps_loads(), 1);
    assert!(loader.is_loaded(Category::Telemetry));
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_reports_timeout_and_keeps_slot_empty() {
    let mut settings = LoaderSettings::default();
    settings.weather = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
    let behaviour = MockBehaviour::default().with_not_ready_reads(Category::Weather, u32::MAX);
    let (loader, session) = loader_with_settings(SessionIdentifier::Race, behaviour, settings);

    let err = loader.weather().await.unwrap_err();

    match &err {
        SessionError::LoadTimeout { operation, attempts, .. } => {
            assert!(operation.starts_with("weather"));
            assert_eq!(*attempts, 11);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!err.is_retryable());
    assert!(!loader.is_loaded(Category::Weather));
    assert_eq!(session.load_count(), 1);
}

#[tokio::test]
async fn failed_load_leaves_category_unloaded() {
    let (loader, session) = loader_for(SessionIdentifier::Race, MockBehaviour::default().failing());

    let err = loader.laps().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(loader.loaded_categories().is_empty());

    // The next caller tries again instead of seeing a cached failure.
    assert!(loader.laps().await.is_err());
    assert_eq!(session.load_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_cancel_the_shared_load() {
    let behaviour = MockBehaviour::default().with_load_delay(Duration::from_secs(1));
    let (loader, session) = loader_for(SessionIdentifier::Race, behaviour);

    let abandoned = tokio::time::timeout(Duration::from_millis(100), loader.laps()).await;
    assert!(abandoned.is_err());

    let laps = loader.laps().await.unwrap();
    assert_eq!(laps.len(), 20);
    assert_eq!(session.load_count(), 1);
}

#[tokio::test]
async fn circuit_info_loads_telemetry_once_and_memoises() {
    let (loader, session) = loader_for(SessionIdentifier::Qualifying, MockBehaviour::default());

    let circuit = loader.circuit_info().await.unwrap();
    assert_eq!(circuit.corners.len(), 2);
    assert_eq!(session.loads(), vec![LoadRequest::laps_only().with_telemetry()]);
    assert!(loader.is_loaded(Category::Laps));
    assert!(loader.is_loaded(Category::Telemetry));

    let again = loader.circuit_info().await.unwrap();
    assert!(Arc::ptr_eq(&circuit, &again));
    assert_eq!(session.load_count(), 1);
}

#[tokio::test]
async fn missing_circuit_geometry_is_reported_as_absent() {
    let behaviour =
        MockBehaviour::default().with_fixture(SessionFixture::default().without_circuit());
    let (loader, _session) = loader_for(SessionIdentifier::Race, behaviour);

    let err = loader.circuit_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamDataAbsent);
    assert!(!err.is_retryable());
    // Telemetry loaded along the way stays cached.
    assert!(loader.is_loaded(Category::Telemetry));
}

#[tokio::test]
async fn load_all_requests_only_missing_categories() {
    let (loader, session) = loader_for(SessionIdentifier::Race, MockBehaviour::default());

    loader.laps().await.unwrap();
    loader.load_all().await.unwrap();

    let loads = session.loads();
    assert_eq!(loads.len(), 2);
    assert_eq!(
        loads[1],
        LoadRequest { laps: false, telemetry: true, weather: true, messages: false }
    );
    assert_eq!(
        loader.loaded_categories(),
        vec![Category::Laps, Category::Telemetry, Category::Weather]
    );

    loader.load_all().await.unwrap();
    assert_eq!(session.load_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_accessors_do_not_deadlock() {
    let behaviour = MockBehaviour::default().with_load_delay(Duration::from_millis(10));
    let (loader, session) = loader_for(SessionIdentifier::Sprint, behaviour);

    let (laps, telemetry, weather, circuit, all, results) = tokio::join!(
        loader.laps(),
        loader.lap_telemetry(),
        loader.weather(),
        loader.circuit_info(),
        loader.load_all(),
        loader.results(),
    );

    laps.unwrap();
    telemetry.unwrap();
    weather.unwrap();
    circuit.unwrap();
    all.unwrap();
    results.unwrap();
    assert_eq!(loader.loaded_categories(), Category::ALL.to_vec());
    assert_eq!(session.laps_loads(), 1);
}
