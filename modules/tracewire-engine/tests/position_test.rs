//! Position resolution against the Delhi reference towers.

use std::sync::Arc;
use std::time::Duration;

use tracewire_common::{ConfidenceTier, Config, PartyRef, PositionOutcome, RiskLevel};
use tracewire_engine::testing::{
    call, delhi_geo, investigation_id, suspect, suspect_id, tower_id, victim, victim_id,
    MemoryGraphStore, SlowGeoStore,
};
use tracewire_engine::{PositionResolver, ReferenceGeoStore};

fn resolver_with(geo: Arc<dyn tracewire_engine::GeoStore>, config: Config) -> PositionResolver {
    PositionResolver::new(Arc::new(MemoryGraphStore::new()), geo, config)
}

fn resolver() -> PositionResolver {
    resolver_with(delhi_geo(), Config::offline())
}

#[tokio::test]
async fn three_known_towers_give_high_confidence() {
    let outcome = resolver()
        .resolve_position(&[tower_id("A"), tower_id("B"), tower_id("C")])
        .await
        .unwrap();

    let estimate = outcome.estimate().expect("estimate");
    assert_eq!(estimate.confidence, ConfidenceTier::High);
    assert_eq!(estimate.tower_count, 3);
    assert!(estimate.phantom_towers.is_empty());
    assert!(estimate.accuracy_meters > 0.0);
}

#[tokio::test]
async fn phantom_tower_is_reported_not_used() {
    let outcome = resolver()
        .resolve_position(&[tower_id("A"), tower_id("X")])
        .await
        .unwrap();

    let estimate = outcome.estimate().expect("estimate");
    assert_eq!(estimate.confidence, ConfidenceTier::Low);
    assert_eq!(estimate.towers_used, vec![tower_id("A")]);
    assert_eq!(estimate.phantom_towers, vec![tower_id("X")]);
    assert!((estimate.lat - 28.6315).abs() < 1e-9);
}

#[tokio::test]
async fn two_towers_are_medium_confidence() {
    let outcome = resolver()
        .resolve_position(&[tower_id("A"), tower_id("C")])
        .await
        .unwrap();
    assert_eq!(outcome.estimate().unwrap().confidence, ConfidenceTier::Medium);
}

#[tokio::test]
async fn no_valid_towers_is_no_estimate() {
    let outcome = resolver()
        .resolve_position(&[tower_id("X"), tower_id("Y")])
        .await
        .unwrap();
    assert!(matches!(outcome, PositionOutcome::NoEstimate { .. }));
    assert_eq!(outcome.phantom_towers(), &[tower_id("X"), tower_id("Y")]);

    let empty = resolver().resolve_position(&[]).await.unwrap();
    assert!(empty.estimate().is_none());
}

#[tokio::test]
async fn duplicates_collapse_before_partitioning() {
    let outcome = resolver()
        .resolve_position(&[tower_id("A"), tower_id("A"), tower_id("X"), tower_id("X")])
        .await
        .unwrap();
    let estimate = outcome.estimate().unwrap();
    assert_eq!(estimate.towers_used.len() + estimate.phantom_towers.len(), 2);
}

#[tokio::test]
async fn outputs_are_sorted_by_tower_id() {
    let outcome = resolver()
        .resolve_position(&[tower_id("Y"), tower_id("C"), tower_id("X"), tower_id("A")])
        .await
        .unwrap();
    let estimate = outcome.estimate().unwrap();
    assert_eq!(estimate.towers_used, vec![tower_id("A"), tower_id("C")]);
    assert_eq!(estimate.phantom_towers, vec![tower_id("X"), tower_id("Y")]);
}

#[tokio::test]
async fn slow_lookup_treats_every_id_as_phantom() {
    let geo = SlowGeoStore::new(ReferenceGeoStore::new(tracewire_engine::testing::delhi_reference()))
        .slow_lookups(Duration::from_millis(300));
    let config = Config::offline().with_store_timeout(Duration::from_millis(30));

    let outcome = resolver_with(Arc::new(geo), config)
        .resolve_position(&[tower_id("A"), tower_id("B")])
        .await
        .unwrap();

    assert!(outcome.estimate().is_none());
    assert_eq!(outcome.phantom_towers().len(), 2);
}

#[tokio::test]
async fn slow_triangulation_falls_back_to_local_centroid() {
    let geo = SlowGeoStore::new(ReferenceGeoStore::new(tracewire_engine::testing::delhi_reference()))
        .slow_triangulation(Duration::from_millis(300));
    let config = Config::offline().with_store_timeout(Duration::from_millis(30));

    let outcome = resolver_with(Arc::new(geo), config)
        .resolve_position(&[tower_id("A"), tower_id("B")])
        .await
        .unwrap();

    let estimate = outcome.estimate().expect("estimate");
    assert_eq!(estimate.confidence, ConfidenceTier::Medium);
    assert_eq!(estimate.accuracy_meters, 5000.0);
    assert!(estimate.lat > 28.6315 && estimate.lat < 28.6519);
}

#[tokio::test]
async fn suspect_position_uses_towers_from_the_graph() {
    let graph = MemoryGraphStore::new();
    let inv = investigation_id("I1");
    graph.seed_suspect(&inv, suspect("S1", "+919810000001", RiskLevel::Medium));
    graph.seed_victim(&inv, victim("V1", "+919810000009"));
    let v1 = PartyRef::Victim(victim_id("V1"));
    graph.seed_call(call("S1", v1.clone(), "2024-03-01T10:00:00Z", Some("A"), Some("C")));
    graph.seed_call(call("S1", v1, "2024-03-01T11:00:00Z", Some("X"), None));

    let resolver = PositionResolver::new(Arc::new(graph), delhi_geo(), Config::offline());
    let outcome = resolver
        .resolve_suspect_position(&suspect_id("S1"))
        .await
        .unwrap();

    // The receiver's tower C belongs to the victim's end and is not counted.
    let estimate = outcome.estimate().expect("estimate");
    assert_eq!(estimate.towers_used, vec![tower_id("A")]);
    assert_eq!(estimate.phantom_towers, vec![tower_id("X")]);
}
