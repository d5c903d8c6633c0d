use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use tracewire_common::ingest::{decode_record, CallRecord, IngestRecord};
use tracewire_common::{
    haversine_km, CellTower, Config, GeofenceAlert, MovementBatchReport, Proximity, RecordError,
    TowerId, TracewireError,
};

use crate::bounded::{bounded, GEO, GRAPH};
use crate::geofence::GeofenceMonitor;
use crate::traits::{EdgeUpsert, GeoStore, GraphStore, NodeUpsert};

/// Writes decoded records into the graph.
///
/// Records apply in input order, so a batch can create a suspect and then its
/// calls. Every write is an idempotent merge, which makes replaying a batch
/// safe. Pings go through the geofence monitor and may raise alerts.
pub struct Ingestor {
    graph: Arc<dyn GraphStore>,
    geo: Arc<dyn GeoStore>,
    monitor: GeofenceMonitor,
    config: Config,
}

impl Ingestor {
    pub fn new(graph: Arc<dyn GraphStore>, geo: Arc<dyn GeoStore>, config: Config) -> Self {
        let monitor = GeofenceMonitor::new(graph.clone(), geo.clone(), config.clone());
        Self {
            graph,
            geo,
            monitor,
            config,
        }
    }

    /// Decode raw JSON payloads, then ingest. Undecodable payloads are counted
    /// as failures at their index.
    pub async fn ingest_raw(
        &self,
        raw: Vec<serde_json::Value>,
    ) -> Result<MovementBatchReport, TracewireError> {
        let mut decoded = Vec::with_capacity(raw.len());
        let mut rejected = Vec::new();
        for (index, value) in raw.into_iter().enumerate() {
            match decode_record(value) {
                Ok(record) => decoded.push((index, record)),
                Err(e) => rejected.push(RecordError {
                    index,
                    key: "record".to_string(),
                    message: e.to_string(),
                }),
            }
        }

        let mut report = self.ingest_indexed(decoded).await?;
        report.failures += rejected.len();
        report.errors.extend(rejected);
        report.errors.sort_by_key(|e| e.index);
        Ok(report)
    }

    pub async fn ingest(
        &self,
        records: Vec<IngestRecord>,
    ) -> Result<MovementBatchReport, TracewireError> {
        self.ingest_indexed(records.into_iter().enumerate().collect())
            .await
    }

    async fn ingest_indexed(
        &self,
        records: Vec<(usize, IngestRecord)>,
    ) -> Result<MovementBatchReport, TracewireError> {
        let limit = self.config.store_timeout;
        bounded(GRAPH, "ping", limit, self.graph.ping()).await?;
        bounded(GEO, "ping", limit, self.geo.ping()).await?;

        let total = records.len();
        let mut report = MovementBatchReport::default();
        for (index, record) in records {
            let key = record.key();
            match self.apply(record).await {
                Ok(alert) => {
                    report.success += 1;
                    report.alerts.extend(alert);
                }
                Err(e) => {
                    warn!(index, key = key.as_str(), error = %e, "Record rejected");
                    report.failures += 1;
                    report.errors.push(RecordError {
                        index,
                        key,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            total,
            success = report.success,
            failures = report.failures,
            alerts = report.alerts.len(),
            "Ingestion batch complete"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        record: IngestRecord,
    ) -> Result<Option<GeofenceAlert>, TracewireError> {
        let limit = self.config.store_timeout;
        match record {
            IngestRecord::Investigation(r) => {
                let node = NodeUpsert::Investigation(r.into_node());
                self.merge_node(&node).await?;
            }
            IngestRecord::Suspect(r) => {
                let investigation = r.investigation_id.clone();
                let node = NodeUpsert::Suspect {
                    node: r.into_node()?,
                    investigation,
                };
                self.merge_node(&node).await?;
            }
            IngestRecord::Victim(r) => {
                let investigation = r.investigation_id.clone();
                let node = NodeUpsert::Victim {
                    node: r.into_node()?,
                    investigation,
                };
                self.merge_node(&node).await?;
            }
            IngestRecord::Call(r) => {
                let proximity = self.proximity_for(&r).await?;
                let edge = EdgeUpsert::Call(r.into_edge(proximity)?);
                bounded(GRAPH, "merge_edge", limit, self.graph.merge_edge(&edge)).await?;
            }
            IngestRecord::Ping(r) => {
                let outcome = self.monitor.ingest_movement(&r.into_ping()?).await?;
                return Ok(outcome.alert);
            }
            IngestRecord::History(r) => {
                let node = NodeUpsert::SuspectLocation {
                    suspect: r.suspect_id,
                    coordinates: r.coordinates,
                };
                self.merge_node(&node).await?;
            }
        }
        Ok(None)
    }

    async fn merge_node(&self, node: &NodeUpsert) -> Result<(), TracewireError> {
        debug!(key = node.natural_key().as_str(), "Merging node");
        bounded(
            GRAPH,
            "merge_node",
            self.config.store_timeout,
            self.graph.merge_node(node),
        )
        .await
    }

    /// A slow tower lookup leaves the call unclassified instead of rejecting it.
    async fn proximity_for(&self, call: &CallRecord) -> Result<Proximity, TracewireError> {
        let ids: Vec<TowerId> = call
            .caller_tower
            .iter()
            .chain(call.receiver_tower.iter())
            .cloned()
            .collect();
        if ids.len() < 2 || ids[0] == ids[1] {
            return Ok(classify_proximity(
                call.caller_tower.as_ref(),
                call.receiver_tower.as_ref(),
                &HashMap::new(),
            ));
        }
        let towers = match bounded(
            GEO,
            "get_towers_by_ids",
            self.config.store_timeout,
            self.geo.get_towers_by_ids(&ids),
        )
        .await
        {
            Ok(found) => found,
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "Tower lookup timed out, proximity left unknown");
                HashMap::new()
            }
            Err(e) => return Err(e),
        };
        Ok(classify_proximity(
            call.caller_tower.as_ref(),
            call.receiver_tower.as_ref(),
            &towers,
        ))
    }
}

/// Same id is SameTower; two resolvable towers whose coverage overlaps are
/// Nearby, otherwise Distant. Anything missing is Unknown.
pub fn classify_proximity(
    caller: Option<&TowerId>,
    receiver: Option<&TowerId>,
    towers: &HashMap<TowerId, CellTower>,
) -> Proximity {
    let (Some(caller), Some(receiver)) = (caller, receiver) else {
        return Proximity::Unknown;
    };
    if caller == receiver {
        return Proximity::SameTower;
    }
    match (towers.get(caller), towers.get(receiver)) {
        (Some(a), Some(b)) => {
            let distance = haversine_km(a.lat, a.lng, b.lat, b.lng);
            if distance <= a.coverage_radius_km + b.coverage_radius_km {
                Proximity::Nearby
            } else {
                Proximity::Distant
            }
        }
        _ => Proximity::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tower(id: &str, lat: f64, lng: f64, radius: f64) -> (TowerId, CellTower) {
        let id = TowerId::parse(id).unwrap();
        (
            id.clone(),
            CellTower {
                id,
                lat,
                lng,
                coverage_radius_km: radius,
                name: String::new(),
            },
        )
    }

    #[test]
    fn proximity_classification() {
        let towers: HashMap<TowerId, CellTower> = [
            tower("A", 28.60, 77.20, 2.0),
            tower("B", 28.61, 77.21, 2.0),
            tower("M", 19.07, 72.87, 2.0),
        ]
        .into_iter()
        .collect();
        let id = |s: &str| TowerId::parse(s).unwrap();

        assert_eq!(
            classify_proximity(Some(&id("A")), Some(&id("A")), &HashMap::new()),
            Proximity::SameTower
        );
        assert_eq!(
            classify_proximity(Some(&id("A")), Some(&id("B")), &towers),
            Proximity::Nearby
        );
        assert_eq!(
            classify_proximity(Some(&id("A")), Some(&id("M")), &towers),
            Proximity::Distant
        );
        assert_eq!(
            classify_proximity(Some(&id("A")), Some(&id("X")), &towers),
            Proximity::Unknown
        );
        assert_eq!(classify_proximity(None, Some(&id("A")), &towers), Proximity::Unknown);
    }
}
