//! End-to-end loading of recorded sessions through the public API

use chrono::{TimeZone, Utc};
use paddock::{
    Category, Config, ErrorKind, Paddock, ReplaySource, SessionError, SessionIdentifier, SessionKey,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn recordings() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/recordings")
}

fn paddock() -> Paddock {
    let _ = tracing_subscriber::fmt::try_init();
    Paddock::open(recordings(), Config::default())
}

#[tokio::test]
async fn race_recording_serves_every_category() {
    let paddock = paddock();
    let loader = paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Race)).unwrap();

    let laps = loader.laps().await.unwrap();
    assert_eq!(laps.len(), 4);
    assert!(!laps.has_telemetry());

    let results = loader.results().await.unwrap();
    assert_eq!(results.rows()[0].abbreviation, "VER");
    assert_eq!(results.rows()[1].points, Some(18.0));

    let info = loader.session_info().await.unwrap();
    assert_eq!(info.meeting_name, "Bahrain Grand Prix");
    assert_eq!(info.session_type, "Race");

    let weather = loader.weather().await.unwrap();
    assert_eq!(weather.len(), 2);

    let telemetry = loader.lap_telemetry().await.unwrap();
    assert!(telemetry.has_telemetry());
    assert_eq!(telemetry.rows()[0].telemetry.len(), 2);

    let circuit = loader.circuit_info().await.unwrap();
    assert_eq!(circuit.corners.len(), 3);
    assert_eq!(circuit.rotation, 92.0);

    assert_eq!(loader.loaded_categories(), Category::ALL.to_vec());
}

#[tokio::test]
async fn events_resolve_by_name_through_the_schedule() {
    let paddock = paddock();
    let by_name = paddock
        .session(&SessionKey::new(2024, "bahrain grand prix", SessionIdentifier::Qualifying))
        .unwrap();
    let by_round =
        paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Qualifying)).unwrap();

    // Distinct keys, distinct loaders, same recording.
    assert!(!by_name.ptr_eq(&by_round));
    assert_eq!(by_name.laps().await.unwrap(), by_round.laps().await.unwrap());
}

#[tokio::test]
async fn missing_recordings_are_upstream_errors() {
    let paddock = paddock();
    let loader = paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Sprint)).unwrap();

    let err = loader.laps().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("2024"));

    let unknown =
        paddock.session(&SessionKey::new(2024, "Atlantis", SessionIdentifier::Race)).unwrap();
    assert!(matches!(unknown.results().await, Err(SessionError::Upstream { .. })));
}

#[tokio::test]
async fn absent_geometry_is_not_a_timeout() {
    let paddock = paddock();
    let loader = paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Qualifying)).unwrap();

    let err = loader.circuit_info().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamDataAbsent);
}

#[tokio::test]
async fn testing_days_load_by_day_number() {
    let paddock = paddock();
    let loader = paddock.session(&SessionKey::testing(2024, 1, 1)).unwrap();

    assert_eq!(loader.laps().await.unwrap().len(), 3);
    assert_eq!(loader.results().await.unwrap().len(), 2);

    let err = paddock.session(&SessionKey::testing(2024, 1, 4)).unwrap_err();
    assert!(err.is_caller_error());
}

#[tokio::test(start_paused = true)]
async fn readiness_delay_is_polled_through() {
    let source = ReplaySource::new(recordings()).with_ready_after(Duration::from_secs(2));
    let paddock = Paddock::new(Arc::new(source), Config::default());
    let loader = paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Race)).unwrap();

    let start = tokio::time::Instant::now();
    let weather = loader.weather().await.unwrap();

    assert_eq!(weather.len(), 2);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn readiness_delay_beyond_the_budget_times_out() {
    let source = ReplaySource::new(recordings()).with_ready_after(Duration::from_secs(60));
    let config =
        Config::from_yaml_str("loader:\n  laps: { poll_interval_ms: 100, timeout_ms: 1000 }\n")
            .unwrap();
    let paddock = Paddock::new(Arc::new(source), config);
    let loader = paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Race)).unwrap();

    let err = loader.laps().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LoadTimeout);
    assert!(!loader.is_loaded(Category::Laps));
}

#[tokio::test]
async fn prefetch_loads_the_latest_weekend() {
    let paddock = paddock();
    let now = Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap();

    let report = paddock.prefetcher().prefetch_recent(now).await.unwrap();

    assert_eq!(report.event.as_deref(), Some("Bahrain Grand Prix"));
    assert_eq!(
        report.loaded,
        vec![
            SessionKey::new(2024, 1, SessionIdentifier::Qualifying),
            SessionKey::new(2024, 1, SessionIdentifier::Race),
        ]
    );
    // Practice sessions have no recordings.
    assert_eq!(report.failed.len(), 3);

    let race = paddock.registry().get(&report.loaded[1]).unwrap();
    assert_eq!(race.loaded_categories(), Category::ALL.to_vec());
    assert_eq!(paddock.prefetcher().last_report().as_deref(), Some(&report));
}

#[tokio::test]
async fn configuration_files_drive_the_registry() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/paddock.yaml");
    let config = Config::from_file(path).await.unwrap();
    assert_eq!(config.registry.max_entries, Some(32));
    assert!(!config.prefetch.on_startup);

    let paddock = Paddock::open(recordings(), config);
    paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Race)).unwrap();
    paddock.session(&SessionKey::new(2024, 1, SessionIdentifier::Race)).unwrap();

    let stats = paddock.registry().stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}
