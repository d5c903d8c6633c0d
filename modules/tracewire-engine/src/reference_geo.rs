use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tracewire_common::{
    haversine_km, point_in_polygon, weighted_centroid, CellTower, Coord, RestrictedZone, TowerId,
    TracewireError, TriangulationFix,
};

use crate::traits::GeoStore;

/// Serialized reference data: every known tower and every restricted zone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    #[serde(default)]
    pub towers: Vec<CellTower>,
    #[serde(default)]
    pub zones: Vec<RestrictedZone>,
}

struct Snapshot {
    towers: HashMap<TowerId, CellTower>,
    zones: Vec<RestrictedZone>,
}

impl Snapshot {
    fn build(reference: GeoReference) -> Self {
        let mut towers = HashMap::with_capacity(reference.towers.len());
        for tower in reference.towers {
            if !Coord::new(tower.lat, tower.lng).is_valid() || tower.coverage_radius_km <= 0.0 {
                warn!(tower = tower.id.as_str(), "Dropping tower with invalid geometry");
                continue;
            }
            towers.insert(tower.id.clone(), tower);
        }
        let zones = reference
            .zones
            .into_iter()
            .filter(|z| {
                let ok = z.polygon.len() >= 3 && z.polygon.iter().all(Coord::is_valid);
                if !ok {
                    warn!(zone = z.name.as_str(), "Dropping zone with invalid polygon");
                }
                ok
            })
            .collect();
        Self { towers, zones }
    }
}

/// In-memory geospatial reference store.
///
/// Readers see an immutable snapshot; `reload` swaps in a new one atomically, so
/// a lookup never observes half-loaded reference data.
pub struct ReferenceGeoStore {
    snapshot: ArcSwap<Snapshot>,
}

impl ReferenceGeoStore {
    pub fn new(reference: GeoReference) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::build(reference)),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, TracewireError> {
        let reference: GeoReference =
            serde_json::from_str(raw).map_err(|e| TracewireError::Decode(e.to_string()))?;
        Ok(Self::new(reference))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TracewireError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TracewireError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let store = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            towers = store.tower_count(),
            zones = store.zone_count(),
            "Geo reference loaded"
        );
        Ok(store)
    }

    pub fn reload(&self, reference: GeoReference) {
        self.snapshot.store(Arc::new(Snapshot::build(reference)));
    }

    pub fn tower_count(&self) -> usize {
        self.snapshot.load().towers.len()
    }

    pub fn zone_count(&self) -> usize {
        self.snapshot.load().zones.len()
    }
}

/// Coverage-weighted multilateration.
///
/// Each tower is weighted by the inverse square of its coverage radius, so tight
/// urban cells pull harder than wide rural ones. Accuracy is the weighted RMS
/// distance from the fix to the towers, floored at the smallest coverage radius
/// shrunk by `sqrt(n)`.
pub fn multilaterate(towers: &[&CellTower]) -> Option<TriangulationFix> {
    let weighted: Vec<(Coord, f64)> = towers
        .iter()
        .map(|t| {
            (
                Coord::new(t.lat, t.lng),
                1.0 / (t.coverage_radius_km * t.coverage_radius_km),
            )
        })
        .collect();
    let fix = weighted_centroid(&weighted)?;

    let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
    let spread_km = (weighted
        .iter()
        .map(|(p, w)| w * haversine_km(fix.lat, fix.lng, p.lat, p.lng).powi(2))
        .sum::<f64>()
        / total_weight)
        .sqrt();
    let min_coverage_km = towers
        .iter()
        .map(|t| t.coverage_radius_km)
        .fold(f64::INFINITY, f64::min);
    let floor_km = min_coverage_km / (towers.len() as f64).sqrt();

    Some(TriangulationFix {
        lat: fix.lat,
        lng: fix.lng,
        accuracy_meters: Some(spread_km.max(floor_km) * 1000.0),
        tower_count: towers.len(),
    })
}

#[async_trait]
impl GeoStore for ReferenceGeoStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get_towers_by_ids(&self, ids: &[TowerId]) -> Result<HashMap<TowerId, CellTower>> {
        let snapshot = self.snapshot.load();
        Ok(ids
            .iter()
            .filter_map(|id| snapshot.towers.get(id).map(|t| (id.clone(), t.clone())))
            .collect())
    }

    async fn check_geofence(&self, lat: f64, lng: f64) -> Result<Vec<String>> {
        let point = Coord::new(lat, lng);
        if !point.is_valid() {
            anyhow::bail!("coordinates ({lat}, {lng}) out of range");
        }
        let snapshot = self.snapshot.load();
        Ok(snapshot
            .zones
            .iter()
            .filter(|z| point_in_polygon(point, &z.polygon))
            .map(|z| z.name.clone())
            .collect())
    }

    async fn triangulate(&self, valid: &[TowerId]) -> Result<Option<TriangulationFix>> {
        let snapshot = self.snapshot.load();
        let towers: Vec<&CellTower> = valid
            .iter()
            .filter_map(|id| snapshot.towers.get(id))
            .collect();
        Ok(multilaterate(&towers))
    }
}
