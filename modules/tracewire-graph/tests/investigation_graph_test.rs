//! Integration tests for the Neo4j-backed investigation graph.
//!
//! Requirements: Docker (for Neo4j via testcontainers)
//!
//! Run with: cargo test -p tracewire-graph --features test-utils --test investigation_graph_test

#![cfg(feature = "test-utils")]

use chrono::{DateTime, Utc};

use tracewire_common::{
    parse_timestamp, CallEdge, GeofenceAlert, InvestigationId, InvestigationNode,
    InvestigationScope, MovementPing, NetworkRole, PartyRef, Proximity, RiskLevel, SuspectId,
    SuspectNode, TowerId, VictimId, VictimNode,
};
use tracewire_graph::{query, GraphClient, InvestigationGraph};

async fn setup() -> (impl std::any::Any, InvestigationGraph) {
    tracewire_graph::testutil::investigation_graph().await
}

fn at(s: &str) -> DateTime<Utc> {
    parse_timestamp(s).unwrap()
}

fn inv() -> InvestigationId {
    InvestigationId::parse("INV-1").unwrap()
}

fn suspect(id: &str, phone: &str) -> SuspectNode {
    SuspectNode {
        id: SuspectId::parse(id).unwrap(),
        phone: phone.to_string(),
        name: format!("Suspect {id}"),
        risk: RiskLevel::Medium,
        role: NetworkRole::Associate,
    }
}

fn call(caller: &str, victim: &str, when: &str, tower: &str) -> CallEdge {
    CallEdge {
        caller: SuspectId::parse(caller).unwrap(),
        receiver: PartyRef::Victim(VictimId::parse(victim).unwrap()),
        timestamp: at(when),
        duration_secs: 60,
        caller_tower: Some(TowerId::parse(tower).unwrap()),
        receiver_tower: None,
        proximity: Proximity::Unknown,
    }
}

async fn count(client: &GraphClient, cypher: &str) -> i64 {
    let mut stream = client.inner().execute(query(cypher)).await.unwrap();
    let row = stream.next().await.unwrap().expect("No result row");
    row.get("n").unwrap()
}

async fn seed(graph: &InvestigationGraph) {
    graph
        .merge_investigation(&InvestigationNode {
            id: inv(),
            title: "Harassment case".to_string(),
        })
        .await
        .unwrap();
    graph
        .merge_suspect(&suspect("S1", "5550001"), Some(&inv()))
        .await
        .unwrap();
    graph
        .merge_suspect(&suspect("S2", "5550002"), Some(&inv()))
        .await
        .unwrap();
    graph
        .merge_victim(
            &VictimNode {
                id: VictimId::parse("V1").unwrap(),
                phone: "5559999".to_string(),
                name: "Victim".to_string(),
            },
            Some(&inv()),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn suspect_merge_is_idempotent_by_phone() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    seed(&graph).await;

    let suspects = count(graph.client(), "MATCH (s:Suspect) RETURN count(s) AS n").await;
    let contains = count(
        graph.client(),
        "MATCH (:Investigation)-[r:CONTAINS]->() RETURN count(r) AS n",
    )
    .await;
    assert_eq!(suspects, 2);
    assert_eq!(contains, 3);
}

#[tokio::test]
async fn call_replay_does_not_duplicate_edges() {
    let (_container, graph) = setup().await;
    seed(&graph).await;

    let edge = call("S1", "V1", "2024-03-01T10:00:00Z", "T1");
    graph.merge_call(&edge).await.unwrap();
    graph.merge_call(&edge).await.unwrap();

    let edges = graph
        .find_call_edges(&InvestigationScope::new(inv()))
        .await
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0], edge);
}

#[tokio::test]
async fn call_to_unknown_victim_writes_nothing() {
    let (_container, graph) = setup().await;
    seed(&graph).await;

    let result = graph
        .merge_call(&call("S1", "V404", "2024-03-01T10:00:00Z", "T1"))
        .await;
    assert!(result.is_err());
    let edges = count(graph.client(), "MATCH ()-[c:CALLED]->() RETURN count(c) AS n").await;
    assert_eq!(edges, 0);
}

#[tokio::test]
async fn scope_window_filters_calls() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    graph
        .merge_call(&call("S1", "V1", "2024-03-01T10:00:00Z", "T1"))
        .await
        .unwrap();
    graph
        .merge_call(&call("S2", "V1", "2024-03-05T10:00:00Z", "T1"))
        .await
        .unwrap();

    let scope = InvestigationScope::new(inv())
        .between(at("2024-03-04T00:00:00Z"), at("2024-03-06T00:00:00Z"));
    let edges = graph.find_call_edges(&scope).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].caller.as_str(), "S2");
}

#[tokio::test]
async fn tower_ids_include_calls_and_pings() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    graph
        .merge_call(&call("S1", "V1", "2024-03-01T10:00:00Z", "T1"))
        .await
        .unwrap();
    let ping = MovementPing {
        suspect_id: SuspectId::parse("S1").unwrap(),
        lat: 28.55,
        lng: 77.10,
        timestamp: at("2024-03-01T11:00:00Z"),
        tower_id: Some(TowerId::parse("T9").unwrap()),
        zone_hits: vec![],
    };
    graph.record_ping(&ping, false).await.unwrap();

    let towers = graph
        .find_tower_ids_for_suspect(&SuspectId::parse("S1").unwrap())
        .await
        .unwrap();
    let names: Vec<&str> = towers.iter().map(|t| t.as_str()).collect();
    assert_eq!(names, vec!["T1", "T9"]);
}

fn breach_ping(suspect: &SuspectId, when: &str) -> MovementPing {
    MovementPing {
        suspect_id: suspect.clone(),
        lat: 28.55,
        lng: 77.10,
        timestamp: at(when),
        tower_id: None,
        zone_hits: vec!["Airport Zone".to_string()],
    }
}

fn alert_for(ping: &MovementPing) -> GeofenceAlert {
    GeofenceAlert {
        id: uuid::Uuid::new_v4(),
        suspect_id: ping.suspect_id.clone(),
        zones: ping.zone_hits.clone(),
        previous_risk: RiskLevel::Medium,
        new_risk: RiskLevel::Critical,
        timestamp: ping.timestamp,
    }
}

#[tokio::test]
async fn breaches_are_counted_and_risk_persisted() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    let s1 = SuspectId::parse("S1").unwrap();

    let mut previous = Vec::new();
    for minute in 0..3 {
        let ping = breach_ping(&s1, &format!("2024-03-01T11:0{minute}:00Z"));
        previous.push(graph.record_breach(&ping, &alert_for(&ping)).await.unwrap());
    }

    assert_eq!(
        previous,
        vec![
            Some(RiskLevel::Medium),
            Some(RiskLevel::Critical),
            Some(RiskLevel::Critical)
        ]
    );
    let counts = graph
        .find_breach_counts(&InvestigationScope::new(inv()))
        .await
        .unwrap();
    assert_eq!(counts, vec![(s1.clone(), 3)]);
    assert_eq!(
        graph.get_suspect(&s1).await.unwrap().unwrap().risk,
        RiskLevel::Critical
    );
    let alerts = graph.find_alerts(&s1).await.unwrap();
    assert_eq!(alerts.len(), 3);
    assert_eq!(alerts[0].previous_risk, RiskLevel::Medium);
}

#[tokio::test]
async fn replayed_breach_writes_nothing_new() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    let s1 = SuspectId::parse("S1").unwrap();
    let ping = breach_ping(&s1, "2024-03-01T11:00:00Z");

    let first = graph.record_breach(&ping, &alert_for(&ping)).await.unwrap();
    let replay = graph.record_breach(&ping, &alert_for(&ping)).await.unwrap();

    assert_eq!(first, Some(RiskLevel::Medium));
    assert_eq!(replay, None);
    assert_eq!(graph.find_alerts(&s1).await.unwrap().len(), 1);
    let pings = count(graph.client(), "MATCH (p:Ping) RETURN count(p) AS n").await;
    assert_eq!(pings, 1);
}

#[tokio::test]
async fn breach_for_unknown_suspect_writes_nothing() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    let ghost = SuspectId::parse("GHOST").unwrap();
    let ping = breach_ping(&ghost, "2024-03-01T11:00:00Z");

    assert!(graph.record_breach(&ping, &alert_for(&ping)).await.is_err());
    let written = count(
        graph.client(),
        "MATCH (n) WHERE n:Ping OR n:GeofenceAlert RETURN count(n) AS n",
    )
    .await;
    assert_eq!(written, 0);
}

#[tokio::test]
async fn classification_write_never_lowers_critical() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    let s1 = SuspectId::parse("S1").unwrap();
    let s2 = SuspectId::parse("S2").unwrap();
    let ping = breach_ping(&s1, "2024-03-01T11:00:00Z");
    graph.record_breach(&ping, &alert_for(&ping)).await.unwrap();

    assert!(!graph.set_risk_unless_critical(&s1, RiskLevel::Low).await.unwrap());
    assert!(graph.set_risk_unless_critical(&s2, RiskLevel::High).await.unwrap());

    assert_eq!(
        graph.get_suspect(&s1).await.unwrap().unwrap().risk,
        RiskLevel::Critical
    );
    assert_eq!(
        graph.get_suspect(&s2).await.unwrap().unwrap().risk,
        RiskLevel::High
    );
    assert!(graph
        .set_risk_unless_critical(&SuspectId::parse("GHOST").unwrap(), RiskLevel::Low)
        .await
        .is_err());
}

#[tokio::test]
async fn suspect_id_cannot_fork_under_a_new_phone() {
    let (_container, graph) = setup().await;
    seed(&graph).await;

    let result = graph.merge_suspect(&suspect("S1", "5550077"), Some(&inv())).await;
    assert!(result.is_err());

    let suspects = count(
        graph.client(),
        "MATCH (s:Suspect {id: 'S1'}) RETURN count(s) AS n",
    )
    .await;
    assert_eq!(suspects, 1);
}

#[tokio::test]
async fn location_history_appends_without_duplicates() {
    let (_container, graph) = setup().await;
    seed(&graph).await;
    let s1 = SuspectId::parse("S1").unwrap();

    graph.append_location_history(&s1, "28.61,77.20").await.unwrap();
    graph.append_location_history(&s1, "28.61,77.20").await.unwrap();
    graph.append_location_history(&s1, "(28.70, 77.10)").await.unwrap();

    let history = graph.find_location_history(&s1).await.unwrap();
    assert_eq!(history, vec!["28.61,77.20", "(28.70, 77.10)"]);
}

#[tokio::test]
async fn migrations_rerun_cleanly_on_a_cleared_graph() {
    let (_container, graph) = setup().await;
    seed(&graph).await;

    tracewire_graph::testutil::clear(graph.client()).await;
    tracewire_graph::migrate::migrate(graph.client()).await.unwrap();
    seed(&graph).await;

    let suspects = count(graph.client(), "MATCH (s:Suspect) RETURN count(s) AS n").await;
    assert_eq!(suspects, 2);
}
