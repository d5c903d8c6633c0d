use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use tracewire_common::{
    CallEdge, Config, ConvergencePoint, HarassmentPattern, InvestigationScope, PartyRef,
    PatternKind, ScoringThresholds, SuspectId, TowerId, TracewireError,
};

use crate::bounded::{bounded, GRAPH};
use crate::traits::GraphStore;

/// Rule-based convergence and harassment detection over ingested calls and
/// breaches. Every output is reproducible from the thresholds alone.
pub struct ConvergenceDetector {
    graph: Arc<dyn GraphStore>,
    config: Config,
}

impl ConvergenceDetector {
    pub fn new(graph: Arc<dyn GraphStore>, config: Config) -> Self {
        Self { graph, config }
    }

    async fn call_edges(&self, scope: &InvestigationScope) -> Result<Vec<CallEdge>, TracewireError> {
        bounded(
            GRAPH,
            "find_call_edges",
            self.config.store_timeout,
            self.graph.find_call_edges(scope),
        )
        .await
    }

    pub async fn find_convergence_points(
        &self,
        scope: &InvestigationScope,
    ) -> Result<Vec<ConvergencePoint>, TracewireError> {
        let edges = self.call_edges(scope).await?;
        let points = convergence_points(&edges, &self.config.thresholds);
        info!(
            investigation = scope.investigation_id.as_str(),
            calls = edges.len(),
            points = points.len(),
            "Convergence analysis complete"
        );
        Ok(points)
    }

    pub async fn find_convergence_for_victim(
        &self,
        scope: &InvestigationScope,
        victim: &PartyRef,
    ) -> Result<Vec<ConvergencePoint>, TracewireError> {
        let edges: Vec<CallEdge> = self
            .call_edges(scope)
            .await?
            .into_iter()
            .filter(|e| &e.receiver == victim)
            .collect();
        Ok(convergence_points(&edges, &self.config.thresholds))
    }

    /// Call-volume and trespass patterns, ranked by evidence.
    pub async fn detect_harassment_patterns(
        &self,
        scope: &InvestigationScope,
    ) -> Result<Vec<HarassmentPattern>, TracewireError> {
        let limit = self.config.store_timeout;
        let (edges, breaches) = tokio::try_join!(
            self.call_edges(scope),
            bounded(GRAPH, "find_breach_counts", limit, self.graph.find_breach_counts(scope)),
        )?;

        let thresholds = &self.config.thresholds;
        let mut patterns = call_volume_patterns(&edges, thresholds);
        patterns.extend(trespass_patterns(&breaches, thresholds));
        rank_patterns(&mut patterns);

        info!(
            investigation = scope.investigation_id.as_str(),
            patterns = patterns.len(),
            "Harassment pattern detection complete"
        );
        Ok(patterns)
    }
}

#[derive(Default)]
struct TowerContact {
    callers: BTreeSet<SuspectId>,
    interactions: u64,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

/// Receivers reached by two or more distinct suspects through the same caller
/// tower. Calls without a caller tower carry no location and are skipped.
pub fn convergence_points(edges: &[CallEdge], thresholds: &ScoringThresholds) -> Vec<ConvergencePoint> {
    let mut contacts: BTreeMap<(PartyRef, TowerId), TowerContact> = BTreeMap::new();
    for edge in edges {
        let Some(tower) = &edge.caller_tower else {
            continue;
        };
        if matches!(&edge.receiver, PartyRef::Suspect(r) if r == &edge.caller) {
            continue;
        }
        let contact = contacts
            .entry((edge.receiver.clone(), tower.clone()))
            .or_default();
        contact.callers.insert(edge.caller.clone());
        contact.interactions += 1;
        contact.first = Some(contact.first.map_or(edge.timestamp, |f| f.min(edge.timestamp)));
        contact.last = Some(contact.last.map_or(edge.timestamp, |l| l.max(edge.timestamp)));
    }

    let mut points: Vec<ConvergencePoint> = contacts
        .into_iter()
        .filter(|(_, c)| c.callers.len() >= thresholds.convergence_min_callers.max(2))
        .filter_map(|((victim, tower_id), c)| {
            let n = c.callers.len();
            Some(ConvergencePoint {
                victim,
                tower_id,
                caller_pairs: n * (n - 1) / 2,
                unique_callers: c.callers.into_iter().collect(),
                interaction_count: c.interactions,
                first_contact: c.first?,
                last_contact: c.last?,
                severity: thresholds.convergence_severity(c.interactions),
            })
        })
        .collect();

    points.sort_by(|a, b| {
        b.interaction_count
            .cmp(&a.interaction_count)
            .then_with(|| a.victim.cmp(&b.victim))
            .then_with(|| a.tower_id.cmp(&b.tower_id))
    });
    points
}

/// One pattern per caller and receiver pair with repeated contact.
pub fn call_volume_patterns(
    edges: &[CallEdge],
    thresholds: &ScoringThresholds,
) -> Vec<HarassmentPattern> {
    let mut counts: BTreeMap<(SuspectId, PartyRef), u64> = BTreeMap::new();
    for edge in edges {
        *counts
            .entry((edge.caller.clone(), edge.receiver.clone()))
            .or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, calls)| *calls >= thresholds.min_repeated_contacts)
        .map(|((suspect_id, target), calls)| {
            let (severity, recommended_action) = thresholds.call_volume_tier(calls);
            HarassmentPattern {
                kind: PatternKind::CallVolume,
                suspect_id,
                target: Some(target),
                evidence_count: calls,
                severity,
                recommended_action,
            }
        })
        .collect()
}

/// One pattern per suspect with at least one recorded breach.
pub fn trespass_patterns(
    breaches: &[(SuspectId, u64)],
    thresholds: &ScoringThresholds,
) -> Vec<HarassmentPattern> {
    breaches
        .iter()
        .filter(|(_, count)| *count > 0)
        .map(|(suspect_id, count)| {
            let (severity, recommended_action) = thresholds.trespass_tier(*count);
            HarassmentPattern {
                kind: PatternKind::Trespass,
                suspect_id: suspect_id.clone(),
                target: None,
                evidence_count: *count,
                severity,
                recommended_action,
            }
        })
        .collect()
}

/// Evidence count descending; ties by family, suspect, then target.
pub fn rank_patterns(patterns: &mut [HarassmentPattern]) {
    fn family(kind: PatternKind) -> u8 {
        match kind {
            PatternKind::CallVolume => 0,
            PatternKind::Trespass => 1,
        }
    }
    patterns.sort_by(|a, b| {
        b.evidence_count
            .cmp(&a.evidence_count)
            .then_with(|| family(a.kind).cmp(&family(b.kind)))
            .then_with(|| a.suspect_id.cmp(&b.suspect_id))
            .then_with(|| a.target.cmp(&b.target))
    });
}
