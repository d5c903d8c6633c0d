//! Geofence escalation, stickiness and batch accounting.

use std::sync::Arc;

use tracewire_common::{Config, RiskLevel, TracewireError};
use tracewire_engine::testing::{
    delhi_geo, investigation_id, ping_at, suspect, suspect_id, MemoryGraphStore, AIRPORT_TERMINAL,
    AIRPORT_ZONE, KAROL_BAGH,
};
use tracewire_engine::{GeofenceMonitor, GraphStore, RiskState};

fn seeded(graph: MemoryGraphStore) -> Arc<MemoryGraphStore> {
    let inv = investigation_id("I1");
    graph.seed_suspect(&inv, suspect("S1", "+919810000001", RiskLevel::Medium));
    graph.seed_suspect(&inv, suspect("S2", "+919810000002", RiskLevel::Low));
    Arc::new(graph)
}

fn monitor(graph: Arc<MemoryGraphStore>) -> GeofenceMonitor {
    GeofenceMonitor::new(graph, delhi_geo(), Config::offline())
}

#[tokio::test]
async fn airport_ping_escalates_medium_suspect() {
    let graph = seeded(MemoryGraphStore::new());
    let outcome = monitor(graph.clone())
        .ingest_movement(&ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z"))
        .await
        .unwrap();

    assert!(outcome.accepted);
    let alert = outcome.alert.expect("alert");
    assert_eq!(alert.previous_risk, RiskLevel::Medium);
    assert_eq!(alert.new_risk, RiskLevel::Critical);
    assert_eq!(alert.zones, vec![AIRPORT_ZONE.to_string()]);

    assert_eq!(graph.risk_of(&suspect_id("S1")), Some(RiskLevel::Critical));
    assert_eq!(graph.alerts().len(), 1);
    assert_eq!(graph.breach_ping_count(), 1);
    let meta = graph.last_breach(&suspect_id("S1")).expect("breach metadata");
    assert_eq!(meta.zones, vec![AIRPORT_ZONE.to_string()]);
}

#[tokio::test]
async fn clear_ping_leaves_risk_untouched() {
    let graph = seeded(MemoryGraphStore::new());
    let outcome = monitor(graph.clone())
        .ingest_movement(&ping_at("S2", KAROL_BAGH, "2024-03-01T10:00:00Z"))
        .await
        .unwrap();

    assert!(outcome.accepted);
    assert!(outcome.alert.is_none());
    assert_eq!(graph.risk_of(&suspect_id("S2")), Some(RiskLevel::Low));
    assert!(graph.risk_writes().is_empty());
    assert_eq!(graph.ping_count(), 1);
}

#[tokio::test]
async fn critical_is_sticky_across_clear_pings() {
    let graph = seeded(MemoryGraphStore::new());
    let monitor = monitor(graph.clone());
    monitor
        .ingest_movement(&ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z"))
        .await
        .unwrap();
    for minute in 1..5 {
        monitor
            .ingest_movement(&ping_at("S1", KAROL_BAGH, &format!("2024-03-01T10:{minute:02}:00Z")))
            .await
            .unwrap();
    }
    assert_eq!(graph.risk_of(&suspect_id("S1")), Some(RiskLevel::Critical));
}

#[tokio::test]
async fn later_breach_in_batch_sees_earlier_escalation() {
    let graph = seeded(MemoryGraphStore::new());
    let report = monitor(graph.clone())
        .ingest_batch(vec![
            ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z"),
            ping_at("S2", KAROL_BAGH, "2024-03-01T10:01:00Z"),
            ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:05:00Z"),
        ])
        .await
        .unwrap();

    assert_eq!(report.success, 3);
    assert_eq!(report.alerts.len(), 2);
    assert_eq!(report.alerts[0].previous_risk, RiskLevel::Medium);
    assert_eq!(report.alerts[1].previous_risk, RiskLevel::Critical);
}

#[tokio::test]
async fn failing_events_are_counted_not_raised() {
    let graph = seeded(MemoryGraphStore::new().fail_for(&suspect_id("S2")));
    let pings = vec![
        ping_at("S1", KAROL_BAGH, "2024-03-01T10:00:00Z"),
        ping_at("S2", KAROL_BAGH, "2024-03-01T10:00:00Z"),
        ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:01:00Z"),
        ping_at("S2", AIRPORT_TERMINAL, "2024-03-01T10:01:00Z"),
        ping_at("GHOST", KAROL_BAGH, "2024-03-01T10:02:00Z"),
    ];
    let n = pings.len();

    let report = monitor(graph.clone()).ingest_batch(pings).await.unwrap();

    assert_eq!(report.failures, 3);
    assert_eq!(report.success, n - 3);
    let failed: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
    assert_eq!(failed, vec![1, 3, 4]);
    assert!(report.errors[2].message.contains("GHOST"));
    assert_eq!(report.alerts.len(), 1);
}

#[tokio::test]
async fn unreachable_graph_fails_the_whole_batch() {
    let graph = seeded(MemoryGraphStore::new());
    graph.set_unavailable(true);

    let err = monitor(graph.clone())
        .ingest_batch(vec![ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z")])
        .await
        .unwrap_err();

    assert!(matches!(err, TracewireError::StoreUnavailable(_)));
    assert_eq!(graph.ping_count(), 0);
}

#[tokio::test]
async fn out_of_range_ping_is_rejected() {
    let graph = seeded(MemoryGraphStore::new());
    let err = monitor(graph)
        .ingest_movement(&ping_at("S1", (95.0, 77.0), "2024-03-01T10:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, TracewireError::Validation(_)));
}

#[tokio::test]
async fn audit_log_replays_to_stored_risk() {
    let graph = seeded(MemoryGraphStore::new());
    let monitor = monitor(graph.clone());
    monitor
        .ingest_batch(vec![
            ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z"),
            ping_at("S1", KAROL_BAGH, "2024-03-01T10:10:00Z"),
            ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:20:00Z"),
        ])
        .await
        .unwrap();

    let alerts = graph.find_alerts(&suspect_id("S1")).await.unwrap();
    let state = RiskState::replay(RiskLevel::Medium, &alerts);
    assert_eq!(Some(state.current()), graph.risk_of(&suspect_id("S1")));
    assert_eq!(state.history().len(), 2);
}

#[tokio::test]
async fn replayed_breach_ping_raises_no_second_alert() {
    let graph = seeded(MemoryGraphStore::new());
    let monitor = monitor(graph.clone());
    let ping = ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z");

    let first = monitor.ingest_movement(&ping).await.unwrap();
    let second = monitor.ingest_movement(&ping).await.unwrap();

    assert!(first.alert.is_some());
    assert!(second.accepted);
    assert!(second.alert.is_none());
    assert_eq!(graph.alerts().len(), 1);
    assert_eq!(graph.ping_count(), 1);
    assert_eq!(graph.risk_of(&suspect_id("S1")), Some(RiskLevel::Critical));
}

#[tokio::test]
async fn failed_breach_write_leaves_no_partial_state() {
    let graph = seeded(MemoryGraphStore::new().fail_breaches());
    let result = monitor(graph.clone())
        .ingest_movement(&ping_at("S1", AIRPORT_TERMINAL, "2024-03-01T10:00:00Z"))
        .await;

    assert!(result.is_err());
    assert_eq!(graph.risk_of(&suspect_id("S1")), Some(RiskLevel::Medium));
    assert!(graph.alerts().is_empty());
    assert!(graph.risk_writes().is_empty());
    assert_eq!(graph.ping_count(), 0);
}
