use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use tracewire_common::{
    weighted_centroid, CellTower, ConfidenceTier, Config, Coord, PositionEstimate,
    PositionOutcome, SuspectId, TowerId, TracewireError,
};

use crate::bounded::{bounded, GEO, GRAPH};
use crate::traits::{GeoStore, GraphStore};

/// Resolves tower references to a position estimate.
///
/// Every requested id lands in exactly one of `towers_used` (resolvable in the geo
/// store) or `phantom_towers` (not resolvable). Phantom ids never reach geometry.
pub struct PositionResolver {
    graph: Arc<dyn GraphStore>,
    geo: Arc<dyn GeoStore>,
    config: Config,
}

impl PositionResolver {
    pub fn new(graph: Arc<dyn GraphStore>, geo: Arc<dyn GeoStore>, config: Config) -> Self {
        Self { graph, geo, config }
    }

    /// Resolve the towers the graph associates with a suspect.
    pub async fn resolve_suspect_position(
        &self,
        suspect: &SuspectId,
    ) -> Result<PositionOutcome, TracewireError> {
        let towers = bounded(
            GRAPH,
            "find_tower_ids_for_suspect",
            self.config.store_timeout,
            self.graph.find_tower_ids_for_suspect(suspect),
        )
        .await?;
        debug!(suspect = suspect.as_str(), towers = towers.len(), "Resolving suspect position");
        self.resolve_position(&towers).await
    }

    /// Duplicate ids collapse, and both `towers_used` and `phantom_towers` come
    /// back sorted by tower id whatever order they were requested in.
    pub async fn resolve_position(
        &self,
        tower_ids: &[TowerId],
    ) -> Result<PositionOutcome, TracewireError> {
        let requested: Vec<TowerId> = tower_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if requested.is_empty() {
            return Ok(PositionOutcome::NoEstimate {
                phantom_towers: Vec::new(),
            });
        }

        // A slow lookup degrades to "everything phantom" rather than failing.
        let resolved = match bounded(
            GEO,
            "get_towers_by_ids",
            self.config.store_timeout,
            self.geo.get_towers_by_ids(&requested),
        )
        .await
        {
            Ok(found) => found,
            Err(e) if e.is_recoverable() => {
                warn!(towers = requested.len(), error = %e, "Tower lookup timed out, treating ids as phantom");
                HashMap::new()
            }
            Err(e) => return Err(e),
        };

        let (valid, phantom) = partition_towers(&requested, &resolved);
        if !phantom.is_empty() {
            warn!(
                phantom = ?phantom.iter().map(TowerId::as_str).collect::<Vec<_>>(),
                "Phantom tower references"
            );
        }

        let Some(confidence) = ConfidenceTier::from_tower_count(valid.len()) else {
            return Ok(PositionOutcome::NoEstimate {
                phantom_towers: phantom,
            });
        };
        let towers_used: Vec<TowerId> = valid.iter().map(|t| t.id.clone()).collect();

        let fix = match bounded(
            GEO,
            "triangulate",
            self.config.store_timeout,
            self.geo.triangulate(&towers_used),
        )
        .await
        {
            Ok(fix) => fix,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Triangulation timed out, falling back to local centroid");
                None
            }
            Err(e) => return Err(e),
        };

        let (position, reported_accuracy) = match fix {
            Some(f) => (Coord::new(f.lat, f.lng), f.accuracy_meters),
            None => match local_centroid(&valid) {
                Some(c) => (c, None),
                None => {
                    return Ok(PositionOutcome::NoEstimate {
                        phantom_towers: phantom,
                    })
                }
            },
        };
        let accuracy_meters = reported_accuracy
            .filter(|a| a.is_finite() && *a > 0.0)
            .unwrap_or_else(|| approximate_accuracy(&valid, self.config.degraded_accuracy_meters));

        Ok(PositionOutcome::Estimate(PositionEstimate {
            lat: position.lat,
            lng: position.lng,
            accuracy_meters,
            confidence,
            tower_count: towers_used.len(),
            towers_used,
            phantom_towers: phantom,
        }))
    }
}

/// Split requested ids into resolved towers and phantom ids, both in the order given.
/// Entries in `resolved` that were never requested are ignored.
pub fn partition_towers(
    requested: &[TowerId],
    resolved: &HashMap<TowerId, CellTower>,
) -> (Vec<CellTower>, Vec<TowerId>) {
    let mut valid = Vec::new();
    let mut phantom = Vec::new();
    for id in requested {
        match resolved.get(id) {
            Some(tower) => valid.push(tower.clone()),
            None => phantom.push(id.clone()),
        }
    }
    (valid, phantom)
}

/// Accuracy when the primitive reports none: one tower gives its coverage radius,
/// several give the degraded constant.
pub fn approximate_accuracy(valid: &[CellTower], degraded_meters: f64) -> f64 {
    if valid.len() == 1 {
        valid
            .iter()
            .map(|t| t.coverage_radius_km)
            .fold(f64::INFINITY, f64::min)
            * 1000.0
    } else {
        degraded_meters
    }
}

fn local_centroid(valid: &[CellTower]) -> Option<Coord> {
    let weighted: Vec<(Coord, f64)> = valid
        .iter()
        .map(|t| (Coord::new(t.lat, t.lng), 1.0 / t.coverage_radius_km.max(0.1)))
        .collect();
    weighted_centroid(&weighted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower(id: &str, radius: f64) -> CellTower {
        CellTower {
            id: TowerId::parse(id).unwrap(),
            lat: 28.6,
            lng: 77.2,
            coverage_radius_km: radius,
            name: id.to_string(),
        }
    }

    fn ids(raw: &[&str]) -> Vec<TowerId> {
        raw.iter().map(|s| TowerId::parse(*s).unwrap()).collect()
    }

    #[test]
    fn partition_is_exhaustive_and_disjoint() {
        let requested = ids(&["A", "B", "X", "Y"]);
        let resolved: HashMap<TowerId, CellTower> = [tower("A", 1.0), tower("B", 2.0), tower("Z", 1.0)]
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        let (valid, phantom) = partition_towers(&requested, &resolved);
        let valid_ids: Vec<TowerId> = valid.iter().map(|t| t.id.clone()).collect();

        assert_eq!(valid_ids, ids(&["A", "B"]));
        assert_eq!(phantom, ids(&["X", "Y"]));
        assert_eq!(valid.len() + phantom.len(), requested.len());
    }

    #[test]
    fn single_tower_accuracy_uses_its_coverage() {
        assert_eq!(approximate_accuracy(&[tower("A", 1.5)], 5000.0), 1500.0);
    }

    #[test]
    fn multi_tower_accuracy_is_degraded_constant() {
        assert_eq!(
            approximate_accuracy(&[tower("A", 1.5), tower("B", 0.5)], 5000.0),
            5000.0
        );
    }
}
