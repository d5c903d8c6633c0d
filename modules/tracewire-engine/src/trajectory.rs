use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tracewire_common::{
    parse_legacy_coordinates, CallEdge, CellTower, Config, GapReason, InvestigationScope,
    MovementPing, PartyRef, SuspectId, TowerId, Trajectory, TrajectoryGap, TrajectoryPoint,
    TrajectorySource, TracewireError, HISTORY_EPOCH,
};

use crate::bounded::{bounded, GEO, GRAPH};
use crate::traits::{GeoStore, GraphStore};

/// Merges pings (EVENT), call detail records (CDR) and legacy coordinates
/// (HISTORY) into one ordered trajectory.
///
/// Pure read: safe to cancel or rerun at any point.
pub struct TrajectoryBuilder {
    graph: Arc<dyn GraphStore>,
    geo: Arc<dyn GeoStore>,
    config: Config,
}

impl TrajectoryBuilder {
    pub fn new(graph: Arc<dyn GraphStore>, geo: Arc<dyn GeoStore>, config: Config) -> Self {
        Self { graph, geo, config }
    }

    pub async fn build(
        &self,
        suspect: &SuspectId,
        scope: &InvestigationScope,
    ) -> Result<Trajectory, TracewireError> {
        let limit = self.config.store_timeout;
        let mut gaps = Vec::new();

        let (pings, calls, history) = tokio::join!(
            bounded(GRAPH, "find_movement_pings", limit, self.graph.find_movement_pings(suspect)),
            bounded(GRAPH, "find_call_edges", limit, self.graph.find_call_edges(scope)),
            bounded(GRAPH, "find_location_history", limit, self.graph.find_location_history(suspect)),
        );
        let pings = degrade(pings, TrajectorySource::Event, &mut gaps)?;
        let calls = degrade(calls, TrajectorySource::Cdr, &mut gaps)?;
        let history = degrade(history, TrajectorySource::History, &mut gaps)?;

        let pings: Vec<MovementPing> = pings
            .into_iter()
            .filter(|p| scope.contains(p.timestamp))
            .collect();
        let cdrs: Vec<(DateTime<Utc>, Option<TowerId>)> = calls
            .iter()
            .filter(|c| scope.contains(c.timestamp))
            .filter_map(|c| own_tower(c, suspect).map(|tower| (c.timestamp, tower)))
            .collect();

        let lookup: Vec<TowerId> = cdrs
            .iter()
            .filter_map(|(_, t)| t.clone())
            .chain(pings.iter().filter_map(|p| p.tower_id.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (towers, lookup_timed_out) = if lookup.is_empty() {
            (HashMap::new(), false)
        } else {
            match bounded(GEO, "get_towers_by_ids", limit, self.geo.get_towers_by_ids(&lookup)).await
            {
                Ok(found) => (found, false),
                Err(e) if e.is_recoverable() => {
                    warn!(suspect = suspect.as_str(), error = %e, "Tower lookup timed out, CDR points dropped");
                    (HashMap::new(), true)
                }
                Err(e) => return Err(e),
            }
        };

        let mut points = Vec::with_capacity(pings.len() + cdrs.len() + history.len());
        points.extend(self.event_points(&pings, &towers));
        let (cdr_points, cdr_gaps) = self.cdr_points(&cdrs, &towers, lookup_timed_out);
        points.extend(cdr_points);
        gaps.extend(cdr_gaps);
        let (history_points, history_gaps) = self.history_points(&history);
        points.extend(history_points);
        gaps.extend(history_gaps);

        order_trajectory(&mut points);

        if !gaps.is_empty() {
            warn!(
                suspect = suspect.as_str(),
                gaps = gaps.len(),
                points = points.len(),
                "Trajectory built with gaps"
            );
        } else {
            debug!(suspect = suspect.as_str(), points = points.len(), "Trajectory built");
        }

        Ok(Trajectory {
            suspect_id: suspect.clone(),
            points,
            gaps,
        })
    }

    fn coverage(&self, tower: Option<&CellTower>) -> f64 {
        tower
            .map(|t| t.coverage_radius_km)
            .unwrap_or(self.config.default_coverage_km)
    }

    fn event_points(
        &self,
        pings: &[MovementPing],
        towers: &HashMap<TowerId, CellTower>,
    ) -> Vec<TrajectoryPoint> {
        pings
            .iter()
            .map(|p| TrajectoryPoint {
                timestamp: p.timestamp,
                lat: p.lat,
                lng: p.lng,
                tower_id: p.tower_id.clone(),
                source: TrajectorySource::Event,
                coverage_radius_km: self.coverage(p.tower_id.as_ref().and_then(|t| towers.get(t))),
            })
            .collect()
    }

    fn cdr_points(
        &self,
        cdrs: &[(DateTime<Utc>, Option<TowerId>)],
        towers: &HashMap<TowerId, CellTower>,
        lookup_timed_out: bool,
    ) -> (Vec<TrajectoryPoint>, Vec<TrajectoryGap>) {
        let mut points = Vec::new();
        let mut gaps = Vec::new();
        for (at, tower_id) in cdrs {
            let Some(tower_id) = tower_id else {
                gaps.push(TrajectoryGap {
                    source: TrajectorySource::Cdr,
                    reason: GapReason::MissingTower,
                    timestamp: Some(*at),
                    tower_id: None,
                    detail: None,
                });
                continue;
            };
            match towers.get(tower_id) {
                Some(tower) => points.push(TrajectoryPoint {
                    timestamp: *at,
                    lat: tower.lat,
                    lng: tower.lng,
                    tower_id: Some(tower_id.clone()),
                    source: TrajectorySource::Cdr,
                    coverage_radius_km: tower.coverage_radius_km,
                }),
                None => gaps.push(TrajectoryGap {
                    source: TrajectorySource::Cdr,
                    reason: if lookup_timed_out {
                        GapReason::LookupTimedOut
                    } else {
                        GapReason::UnresolvedTower
                    },
                    timestamp: Some(*at),
                    tower_id: Some(tower_id.clone()),
                    detail: None,
                }),
            }
        }
        (points, gaps)
    }

    fn history_points(&self, history: &[String]) -> (Vec<TrajectoryPoint>, Vec<TrajectoryGap>) {
        let mut points = Vec::new();
        let mut gaps = Vec::new();
        for raw in history {
            match parse_legacy_coordinates(raw) {
                Some(c) => points.push(TrajectoryPoint {
                    timestamp: HISTORY_EPOCH,
                    lat: c.lat,
                    lng: c.lng,
                    tower_id: None,
                    source: TrajectorySource::History,
                    coverage_radius_km: self.config.default_coverage_km,
                }),
                None => gaps.push(TrajectoryGap {
                    source: TrajectorySource::History,
                    reason: GapReason::UnparseableCoordinates,
                    timestamp: None,
                    tower_id: None,
                    detail: Some(raw.clone()),
                }),
            }
        }
        (points, gaps)
    }
}

/// The suspect's own end of a call, or `None` if the call doesn't involve them.
/// The inner option is the tower id, which the record may lack.
fn own_tower(call: &CallEdge, suspect: &SuspectId) -> Option<Option<TowerId>> {
    if &call.caller == suspect {
        return Some(call.caller_tower.clone());
    }
    match &call.receiver {
        PartyRef::Suspect(receiver) if receiver == suspect => Some(call.receiver_tower.clone()),
        _ => None,
    }
}

/// A timed-out source contributes nothing and leaves a gap; other errors fail the build.
fn degrade<T: Default>(
    result: Result<T, TracewireError>,
    source: TrajectorySource,
    gaps: &mut Vec<TrajectoryGap>,
) -> Result<T, TracewireError> {
    match result {
        Ok(v) => Ok(v),
        Err(e) if e.is_recoverable() => {
            warn!(?source, error = %e, "Trajectory source timed out");
            gaps.push(TrajectoryGap {
                source,
                reason: GapReason::LookupTimedOut,
                timestamp: None,
                tower_id: None,
                detail: Some(e.to_string()),
            });
            Ok(T::default())
        }
        Err(e) => Err(e),
    }
}

/// Timestamp ascending; ties by source priority (EVENT, CDR, HISTORY), then tower
/// id and coordinates so repeated runs give identical output.
pub fn order_trajectory(points: &mut [TrajectoryPoint]) {
    points.sort_by(compare_points);
}

fn compare_points(a: &TrajectoryPoint, b: &TrajectoryPoint) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.source.priority().cmp(&b.source.priority()))
        .then_with(|| a.tower_id.cmp(&b.tower_id))
        .then_with(|| a.lat.total_cmp(&b.lat))
        .then_with(|| a.lng.total_cmp(&b.lng))
}

/// Points bucketed into one geohash cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DwellCell {
    pub geohash: String,
    pub points: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Where the suspect spends time: points per geohash cell, busiest first.
pub fn dwell_cells(trajectory: &Trajectory, precision: usize) -> Vec<DwellCell> {
    let mut cells: HashMap<String, DwellCell> = HashMap::new();
    for p in &trajectory.points {
        let Ok(hash) = geohash::encode(geohash::Coord { x: p.lng, y: p.lat }, precision) else {
            continue;
        };
        cells
            .entry(hash.clone())
            .and_modify(|c| {
                c.points += 1;
                c.first_seen = c.first_seen.min(p.timestamp);
                c.last_seen = c.last_seen.max(p.timestamp);
            })
            .or_insert(DwellCell {
                geohash: hash,
                points: 1,
                first_seen: p.timestamp,
                last_seen: p.timestamp,
            });
    }
    let mut cells: Vec<DwellCell> = cells.into_values().collect();
    cells.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.geohash.cmp(&b.geohash)));
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracewire_common::parse_timestamp;

    fn point(at: DateTime<Utc>, source: TrajectorySource, tower: Option<&str>) -> TrajectoryPoint {
        TrajectoryPoint {
            timestamp: at,
            lat: 28.6,
            lng: 77.2,
            tower_id: tower.map(|t| TowerId::parse(t).unwrap()),
            source,
            coverage_radius_km: 2.0,
        }
    }

    #[test]
    fn ties_break_by_source_priority() {
        let at = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let mut points = vec![
            point(at, TrajectorySource::Cdr, Some("T1")),
            point(HISTORY_EPOCH, TrajectorySource::History, None),
            point(at, TrajectorySource::Event, None),
        ];
        order_trajectory(&mut points);
        let sources: Vec<TrajectorySource> = points.iter().map(|p| p.source).collect();
        assert_eq!(
            sources,
            vec![
                TrajectorySource::History,
                TrajectorySource::Event,
                TrajectorySource::Cdr
            ]
        );
    }

    #[test]
    fn history_precedes_pre_1970_events() {
        let mut points = vec![
            point(parse_timestamp("1969-12-31T23:59:59Z").unwrap(), TrajectorySource::Event, None),
            point(parse_timestamp("0").unwrap(), TrajectorySource::Cdr, Some("T1")),
            point(HISTORY_EPOCH, TrajectorySource::History, None),
        ];
        order_trajectory(&mut points);
        let sources: Vec<TrajectorySource> = points.iter().map(|p| p.source).collect();
        assert_eq!(
            sources,
            vec![
                TrajectorySource::History,
                TrajectorySource::Event,
                TrajectorySource::Cdr
            ]
        );
    }

    #[test]
    fn ordering_is_independent_of_input_order() {
        let at = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let a = vec![
            point(at, TrajectorySource::Cdr, Some("T2")),
            point(at, TrajectorySource::Cdr, Some("T1")),
        ];
        let mut b = a.clone();
        b.reverse();
        let (mut a, mut b) = (a, b);
        order_trajectory(&mut a);
        order_trajectory(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn own_tower_picks_the_suspects_end() {
        let s1 = SuspectId::parse("S1").unwrap();
        let s2 = SuspectId::parse("S2").unwrap();
        let call = CallEdge {
            caller: s2.clone(),
            receiver: PartyRef::Suspect(s1.clone()),
            timestamp: HISTORY_EPOCH,
            duration_secs: 10,
            caller_tower: Some(TowerId::parse("CALLER").unwrap()),
            receiver_tower: Some(TowerId::parse("RECEIVER").unwrap()),
            proximity: tracewire_common::Proximity::Unknown,
        };
        assert_eq!(own_tower(&call, &s1), Some(Some(TowerId::parse("RECEIVER").unwrap())));
        assert_eq!(own_tower(&call, &s2), Some(Some(TowerId::parse("CALLER").unwrap())));
        assert_eq!(own_tower(&call, &SuspectId::parse("S3").unwrap()), None);
    }

    #[test]
    fn dwell_cells_rank_busiest_first() {
        let t1 = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        let t2 = parse_timestamp("2024-03-01T11:00:00Z").unwrap();
        let mut far = point(t1, TrajectorySource::Event, None);
        far.lat = 19.07;
        far.lng = 72.87;
        let trajectory = Trajectory {
            suspect_id: SuspectId::parse("S1").unwrap(),
            points: vec![
                point(t1, TrajectorySource::Event, None),
                far,
                point(t2, TrajectorySource::Event, None),
            ],
            gaps: vec![],
        };
        let cells = dwell_cells(&trajectory, 6);
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].points, 2);
        assert_eq!(cells[0].first_seen, t1);
        assert_eq!(cells[0].last_seen, t2);
    }
}
