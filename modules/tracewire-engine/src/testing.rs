// Test doubles for the engine.
//
// - MemoryGraphStore (GraphStore): stateful in-memory graph with the same merge
//   semantics as the Neo4j adapter, plus failure and latency injection
// - SlowGeoStore (GeoStore): wraps another GeoStore, delaying or failing calls
//
// Plus fixtures: three Delhi towers, an airport restricted zone, id helpers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tracewire_common::{
    parse_timestamp, BreachMeta, CallEdge, CellTower, Coord, GeofenceAlert, InvestigationId,
    InvestigationNode, InvestigationScope, MovementPing, NetworkRole, PartyRef, RestrictedZone,
    RiskLevel, SuspectId, SuspectNode, TowerId, TriangulationFix, VictimId, VictimNode,
};

use crate::reference_geo::{GeoReference, ReferenceGeoStore};
use crate::traits::{EdgeUpsert, GeoStore, GraphStore, NodeUpsert};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Connaught Place, New Delhi.
pub const CONNAUGHT_PLACE: (f64, f64) = (28.6315, 77.2167);
/// Inside the airport zone.
pub const AIRPORT_TERMINAL: (f64, f64) = (28.5562, 77.1000);
/// Karol Bagh, well clear of the airport.
pub const KAROL_BAGH: (f64, f64) = (28.6519, 77.1909);

pub const AIRPORT_ZONE: &str = "Airport Zone";

pub fn suspect_id(raw: &str) -> SuspectId {
    SuspectId::parse(raw).expect("valid suspect id")
}

pub fn victim_id(raw: &str) -> VictimId {
    VictimId::parse(raw).expect("valid victim id")
}

pub fn tower_id(raw: &str) -> TowerId {
    TowerId::parse(raw).expect("valid tower id")
}

pub fn investigation_id(raw: &str) -> InvestigationId {
    InvestigationId::parse(raw).expect("valid investigation id")
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).expect("valid timestamp")
}

pub fn tower(id: &str, lat: f64, lng: f64, coverage_radius_km: f64) -> CellTower {
    CellTower {
        id: tower_id(id),
        lat,
        lng,
        coverage_radius_km,
        name: format!("Tower {id}"),
    }
}

pub fn airport_zone() -> RestrictedZone {
    RestrictedZone {
        name: AIRPORT_ZONE.to_string(),
        polygon: vec![
            Coord::new(28.54, 77.08),
            Coord::new(28.54, 77.12),
            Coord::new(28.57, 77.12),
            Coord::new(28.57, 77.08),
        ],
    }
}

/// Towers A, B and C around central Delhi plus the airport zone.
pub fn delhi_reference() -> GeoReference {
    GeoReference {
        towers: vec![
            tower("A", 28.6315, 77.2167, 1.0),
            tower("B", 28.6519, 77.1909, 1.5),
            tower("C", 28.6129, 77.2295, 2.0),
        ],
        zones: vec![airport_zone()],
    }
}

pub fn delhi_geo() -> Arc<ReferenceGeoStore> {
    Arc::new(ReferenceGeoStore::new(delhi_reference()))
}

pub fn suspect(id: &str, phone: &str, risk: RiskLevel) -> SuspectNode {
    SuspectNode {
        id: suspect_id(id),
        phone: phone.to_string(),
        name: format!("Suspect {id}"),
        risk,
        role: NetworkRole::Unknown,
    }
}

pub fn victim(id: &str, phone: &str) -> VictimNode {
    VictimNode {
        id: victim_id(id),
        phone: phone.to_string(),
        name: format!("Victim {id}"),
    }
}

pub fn ping_at(suspect: &str, (lat, lng): (f64, f64), at: &str) -> MovementPing {
    MovementPing {
        suspect_id: suspect_id(suspect),
        lat,
        lng,
        timestamp: ts(at),
        tower_id: None,
        zone_hits: Vec::new(),
    }
}

pub fn call(
    caller: &str,
    receiver: PartyRef,
    at: &str,
    caller_tower: Option<&str>,
    receiver_tower: Option<&str>,
) -> CallEdge {
    CallEdge {
        caller: suspect_id(caller),
        receiver,
        timestamp: ts(at),
        duration_secs: 60,
        caller_tower: caller_tower.map(tower_id),
        receiver_tower: receiver_tower.map(tower_id),
        proximity: tracewire_common::Proximity::Unknown,
    }
}

// ---------------------------------------------------------------------------
// MemoryGraphStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryGraphInner {
    investigations: BTreeMap<InvestigationId, InvestigationNode>,
    suspects: BTreeMap<SuspectId, SuspectNode>,
    victims: BTreeMap<VictimId, VictimNode>,
    /// phone → id, the natural key index
    suspect_phones: HashMap<String, SuspectId>,
    victim_phones: HashMap<String, VictimId>,
    members: BTreeSet<(InvestigationId, PartyRef)>,
    /// (caller, receiver, at) → edge
    calls: BTreeMap<(SuspectId, PartyRef, DateTime<Utc>), CallEdge>,
    /// ping key → (ping, breach)
    pings: BTreeMap<(SuspectId, DateTime<Utc>), (MovementPing, bool)>,
    history: HashMap<SuspectId, Vec<String>>,
    alerts: Vec<GeofenceAlert>,
    breach_meta: HashMap<SuspectId, BreachMeta>,
    risk_writes: Vec<(SuspectId, RiskLevel)>,
    failing_suspects: HashSet<SuspectId>,
    failing_breaches: bool,
    escalate_after_list: Option<SuspectId>,
    unavailable: bool,
}

/// Stateful in-memory graph. Thread-safe via interior Mutex.
///
/// Merges follow the Neo4j adapter: people merge on phone and reject a known id
/// under a new phone, risk is set on create only, calls merge on
/// `(caller, receiver, at)` and fail when an endpoint is missing. A breach
/// writes ping, risk and alert under one lock.
pub struct MemoryGraphStore {
    inner: Mutex<MemoryGraphInner>,
    latency: Option<Duration>,
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryGraphInner::default()),
            latency: None,
        }
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Pings recorded for this suspect fail.
    pub fn fail_for(self, suspect: &SuspectId) -> Self {
        self.inner
            .lock()
            .unwrap()
            .failing_suspects
            .insert(suspect.clone());
        self
    }

    /// Breach writes fail before anything is stored.
    pub fn fail_breaches(self) -> Self {
        self.inner.lock().unwrap().failing_breaches = true;
        self
    }

    /// Right after `list_suspects` answers, this suspect is escalated to
    /// CRITICAL, as if a breach landed between a read and a later write.
    pub fn escalate_after_list(self, suspect: &SuspectId) -> Self {
        self.inner.lock().unwrap().escalate_after_list = Some(suspect.clone());
        self
    }

    /// `ping` fails, as if the graph were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Seed a suspect and its investigation membership.
    pub fn seed_suspect(&self, investigation: &InvestigationId, node: SuspectNode) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .members
            .insert((investigation.clone(), PartyRef::Suspect(node.id.clone())));
        inner.suspect_phones.insert(node.phone.clone(), node.id.clone());
        inner.suspects.insert(node.id.clone(), node);
    }

    pub fn seed_victim(&self, investigation: &InvestigationId, node: VictimNode) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .members
            .insert((investigation.clone(), PartyRef::Victim(node.id.clone())));
        inner.victim_phones.insert(node.phone.clone(), node.id.clone());
        inner.victims.insert(node.id.clone(), node);
    }

    pub fn seed_call(&self, edge: CallEdge) {
        let mut inner = self.inner.lock().unwrap();
        let key = (edge.caller.clone(), edge.receiver.clone(), edge.timestamp);
        inner.calls.insert(key, edge);
    }

    pub fn seed_history(&self, suspect: &SuspectId, coordinates: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .history
            .entry(suspect.clone())
            .or_default()
            .push(coordinates.to_string());
    }

    // --- Assertion helpers ---

    pub fn risk_of(&self, id: &SuspectId) -> Option<RiskLevel> {
        self.inner.lock().unwrap().suspects.get(id).map(|s| s.risk)
    }

    pub fn suspect_count(&self) -> usize {
        self.inner.lock().unwrap().suspects.len()
    }

    pub fn victim_count(&self) -> usize {
        self.inner.lock().unwrap().victims.len()
    }

    pub fn call_count(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    pub fn ping_count(&self) -> usize {
        self.inner.lock().unwrap().pings.len()
    }

    pub fn breach_ping_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .pings
            .values()
            .filter(|(_, breach)| *breach)
            .count()
    }

    pub fn alerts(&self) -> Vec<GeofenceAlert> {
        self.inner.lock().unwrap().alerts.clone()
    }

    pub fn risk_writes(&self) -> Vec<(SuspectId, RiskLevel)> {
        self.inner.lock().unwrap().risk_writes.clone()
    }

    pub fn last_breach(&self, id: &SuspectId) -> Option<BreachMeta> {
        self.inner.lock().unwrap().breach_meta.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<CallEdge> {
        self.inner.lock().unwrap().calls.values().cloned().collect()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn party_exists(inner: &MemoryGraphInner, party: &PartyRef) -> bool {
    match party {
        PartyRef::Suspect(id) => inner.suspects.contains_key(id),
        PartyRef::Victim(id) => inner.victims.contains_key(id),
    }
}

fn in_investigation(inner: &MemoryGraphInner, scope: &InvestigationScope, suspect: &SuspectId) -> bool {
    inner
        .members
        .contains(&(scope.investigation_id.clone(), PartyRef::Suspect(suspect.clone())))
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ping(&self) -> Result<()> {
        self.delay().await;
        if self.inner.lock().unwrap().unavailable {
            bail!("MemoryGraphStore: unavailable");
        }
        Ok(())
    }

    async fn find_tower_ids_for_suspect(&self, id: &SuspectId) -> Result<Vec<TowerId>> {
        self.delay().await;
        let inner = self.inner.lock().unwrap();
        let mut towers = BTreeSet::new();
        for edge in inner.calls.values() {
            if &edge.caller == id {
                towers.extend(edge.caller_tower.clone());
            }
            if matches!(&edge.receiver, PartyRef::Suspect(r) if r == id) {
                towers.extend(edge.receiver_tower.clone());
            }
        }
        for (ping, _) in inner.pings.values() {
            if &ping.suspect_id == id {
                towers.extend(ping.tower_id.clone());
            }
        }
        Ok(towers.into_iter().collect())
    }

    async fn find_call_edges(&self, scope: &InvestigationScope) -> Result<Vec<CallEdge>> {
        self.delay().await;
        let inner = self.inner.lock().unwrap();
        let mut edges: Vec<CallEdge> = inner
            .calls
            .values()
            .filter(|e| in_investigation(&inner, scope, &e.caller) && scope.contains(e.timestamp))
            .cloned()
            .collect();
        edges.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.caller.cmp(&b.caller))
                .then_with(|| a.receiver.cmp(&b.receiver))
        });
        Ok(edges)
    }

    async fn find_movement_pings(&self, id: &SuspectId) -> Result<Vec<MovementPing>> {
        self.delay().await;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pings
            .iter()
            .filter(|((suspect, _), _)| suspect == id)
            .map(|(_, (ping, _))| ping.clone())
            .collect())
    }

    async fn find_location_history(&self, id: &SuspectId) -> Result<Vec<String>> {
        self.delay().await;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .history
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_suspect(&self, id: &SuspectId) -> Result<Option<SuspectNode>> {
        self.delay().await;
        Ok(self.inner.lock().unwrap().suspects.get(id).cloned())
    }

    async fn list_suspects(&self, investigation: &InvestigationId) -> Result<Vec<SuspectNode>> {
        self.delay().await;
        let mut inner = self.inner.lock().unwrap();
        let listed: Vec<SuspectNode> = inner
            .members
            .iter()
            .filter(|(i, _)| i == investigation)
            .filter_map(|(_, member)| match member {
                PartyRef::Suspect(id) => inner.suspects.get(id).cloned(),
                PartyRef::Victim(_) => None,
            })
            .collect();
        if let Some(id) = inner.escalate_after_list.take() {
            if let Some(stored) = inner.suspects.get_mut(&id) {
                stored.risk = RiskLevel::Critical;
            }
        }
        Ok(listed)
    }

    async fn merge_node(&self, node: &NodeUpsert) -> Result<()> {
        self.delay().await;
        let mut inner = self.inner.lock().unwrap();
        match node {
            NodeUpsert::Investigation(n) => {
                let entry = inner
                    .investigations
                    .entry(n.id.clone())
                    .or_insert_with(|| n.clone());
                if !n.title.is_empty() {
                    entry.title = n.title.clone();
                }
            }
            NodeUpsert::Suspect { node, investigation } => {
                let id = match inner.suspect_phones.get(&node.phone).cloned() {
                    Some(existing) => {
                        if let Some(stored) = inner.suspects.get_mut(&existing) {
                            if !node.name.is_empty() {
                                stored.name = node.name.clone();
                            }
                            if node.role != NetworkRole::Unknown {
                                stored.role = node.role;
                            }
                        }
                        existing
                    }
                    None => {
                        if inner.suspects.contains_key(&node.id) {
                            bail!(
                                "MemoryGraphStore: suspect {} already exists under another phone",
                                node.id
                            );
                        }
                        inner.suspect_phones.insert(node.phone.clone(), node.id.clone());
                        inner.suspects.insert(node.id.clone(), node.clone());
                        node.id.clone()
                    }
                };
                if let Some(investigation) = investigation {
                    inner.investigations.entry(investigation.clone()).or_insert_with(|| {
                        InvestigationNode {
                            id: investigation.clone(),
                            title: String::new(),
                        }
                    });
                    inner
                        .members
                        .insert((investigation.clone(), PartyRef::Suspect(id)));
                }
            }
            NodeUpsert::Victim { node, investigation } => {
                let id = match inner.victim_phones.get(&node.phone).cloned() {
                    Some(existing) => {
                        if let Some(stored) = inner.victims.get_mut(&existing) {
                            if !node.name.is_empty() {
                                stored.name = node.name.clone();
                            }
                        }
                        existing
                    }
                    None => {
                        if inner.victims.contains_key(&node.id) {
                            bail!(
                                "MemoryGraphStore: victim {} already exists under another phone",
                                node.id
                            );
                        }
                        inner.victim_phones.insert(node.phone.clone(), node.id.clone());
                        inner.victims.insert(node.id.clone(), node.clone());
                        node.id.clone()
                    }
                };
                if let Some(investigation) = investigation {
                    inner
                        .members
                        .insert((investigation.clone(), PartyRef::Victim(id)));
                }
            }
            NodeUpsert::SuspectLocation {
                suspect,
                coordinates,
            } => {
                if !inner.suspects.contains_key(suspect) {
                    bail!("MemoryGraphStore: suspect {suspect} not found");
                }
                let history = inner.history.entry(suspect.clone()).or_default();
                if !history.contains(coordinates) {
                    history.push(coordinates.clone());
                }
            }
        }
        Ok(())
    }

    async fn merge_edge(&self, edge: &EdgeUpsert) -> Result<()> {
        self.delay().await;
        let mut inner = self.inner.lock().unwrap();
        match edge {
            EdgeUpsert::Call(call) => {
                if !inner.suspects.contains_key(&call.caller) {
                    bail!("MemoryGraphStore: caller {} not found", call.caller);
                }
                if !party_exists(&inner, &call.receiver) {
                    bail!("MemoryGraphStore: receiver {} not found", call.receiver);
                }
                let key = (call.caller.clone(), call.receiver.clone(), call.timestamp);
                inner.calls.entry(key).or_insert_with(|| call.clone());
            }
            EdgeUpsert::Membership {
                investigation,
                member,
            } => {
                if !party_exists(&inner, member) {
                    bail!("MemoryGraphStore: {member} not found");
                }
                inner.members.insert((investigation.clone(), member.clone()));
            }
        }
        Ok(())
    }

    async fn record_ping(&self, ping: &MovementPing, breach: bool) -> Result<()> {
        self.delay().await;
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_suspects.contains(&ping.suspect_id) {
            bail!("MemoryGraphStore: injected failure for {}", ping.suspect_id);
        }
        if !inner.suspects.contains_key(&ping.suspect_id) {
            bail!("MemoryGraphStore: suspect {} not found", ping.suspect_id);
        }
        inner
            .pings
            .entry((ping.suspect_id.clone(), ping.timestamp))
            .or_insert_with(|| (ping.clone(), breach));
        Ok(())
    }

    async fn record_breach(
        &self,
        ping: &MovementPing,
        alert: &GeofenceAlert,
    ) -> Result<Option<RiskLevel>> {
        self.delay().await;
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_suspects.contains(&ping.suspect_id) {
            bail!("MemoryGraphStore: injected failure for {}", ping.suspect_id);
        }
        if inner.failing_breaches {
            bail!("MemoryGraphStore: injected breach write failure");
        }
        let Some(previous) = inner.suspects.get(&ping.suspect_id).map(|s| s.risk) else {
            bail!("MemoryGraphStore: suspect {} not found", ping.suspect_id);
        };

        let key = (ping.suspect_id.clone(), ping.timestamp);
        if let Some((_, breach)) = inner.pings.get_mut(&key) {
            *breach = true;
            return Ok(None);
        }
        inner.pings.insert(key, (ping.clone(), true));
        if let Some(stored) = inner.suspects.get_mut(&ping.suspect_id) {
            stored.risk = alert.new_risk;
        }
        inner.breach_meta.insert(
            ping.suspect_id.clone(),
            BreachMeta {
                zones: alert.zones.clone(),
                lat: ping.lat,
                lng: ping.lng,
                at: ping.timestamp,
            },
        );
        inner.risk_writes.push((ping.suspect_id.clone(), alert.new_risk));
        let mut stored = alert.clone();
        stored.previous_risk = previous;
        inner.alerts.push(stored);
        Ok(Some(previous))
    }

    async fn set_risk_unless_critical(&self, id: &SuspectId, risk: RiskLevel) -> Result<bool> {
        self.delay().await;
        let mut inner = self.inner.lock().unwrap();
        let Some(stored) = inner.suspects.get_mut(id) else {
            bail!("MemoryGraphStore: suspect {id} not found");
        };
        if stored.risk == RiskLevel::Critical {
            return Ok(false);
        }
        stored.risk = risk;
        inner.risk_writes.push((id.clone(), risk));
        Ok(true)
    }

    async fn find_alerts(&self, id: &SuspectId) -> Result<Vec<GeofenceAlert>> {
        self.delay().await;
        let mut alerts: Vec<GeofenceAlert> = self
            .inner
            .lock()
            .unwrap()
            .alerts
            .iter()
            .filter(|a| &a.suspect_id == id)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.timestamp);
        Ok(alerts)
    }

    async fn find_breach_counts(&self, scope: &InvestigationScope) -> Result<Vec<(SuspectId, u64)>> {
        self.delay().await;
        let inner = self.inner.lock().unwrap();
        let mut counts: BTreeMap<SuspectId, u64> = BTreeMap::new();
        for ((suspect, at), (_, breach)) in &inner.pings {
            if *breach && in_investigation(&inner, scope, suspect) && scope.contains(*at) {
                *counts.entry(suspect.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// SlowGeoStore
// ---------------------------------------------------------------------------

/// Wraps a GeoStore. Tower lookups and triangulation can be delayed, and the
/// whole store can be marked unreachable.
pub struct SlowGeoStore<G> {
    inner: G,
    lookup_delay: Option<Duration>,
    triangulate_delay: Option<Duration>,
    geofence_delay: Option<Duration>,
    unavailable: bool,
}

impl<G: GeoStore> SlowGeoStore<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            lookup_delay: None,
            triangulate_delay: None,
            geofence_delay: None,
            unavailable: false,
        }
    }

    pub fn slow_lookups(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn slow_triangulation(mut self, delay: Duration) -> Self {
        self.triangulate_delay = Some(delay);
        self
    }

    pub fn slow_geofence(mut self, delay: Duration) -> Self {
        self.geofence_delay = Some(delay);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

async fn sleep_for(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl<G: GeoStore> GeoStore for SlowGeoStore<G> {
    async fn ping(&self) -> Result<()> {
        if self.unavailable {
            bail!("SlowGeoStore: unavailable");
        }
        self.inner.ping().await
    }

    async fn get_towers_by_ids(&self, ids: &[TowerId]) -> Result<HashMap<TowerId, CellTower>> {
        sleep_for(self.lookup_delay).await;
        self.inner.get_towers_by_ids(ids).await
    }

    async fn check_geofence(&self, lat: f64, lng: f64) -> Result<Vec<String>> {
        sleep_for(self.geofence_delay).await;
        self.inner.check_geofence(lat, lng).await
    }

    async fn triangulate(&self, valid: &[TowerId]) -> Result<Option<TriangulationFix>> {
        sleep_for(self.triangulate_delay).await;
        self.inner.triangulate(valid).await
    }
}
