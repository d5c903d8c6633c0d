use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tracewire_common::{
    Config, Coord, GeofenceAlert, MovementBatchReport, MovementOutcome, MovementPing,
    RecordError, RiskLevel, SuspectId, TracewireError,
};

use crate::bounded::{bounded, GEO, GRAPH};
use crate::traits::{GeoStore, GraphStore};

// ---------------------------------------------------------------------------
// Risk state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionCause {
    Breach { zones: Vec<String> },
    Classification,
    ExternalReset { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTransition {
    pub from: RiskLevel,
    pub to: RiskLevel,
    pub at: DateTime<Utc>,
    pub cause: TransitionCause,
}

/// A suspect's risk plus every transition that produced it.
///
/// CRITICAL is sticky: breaches only ever raise risk, clear pings and
/// classification never lower it, and `reset` is the only way down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    current: RiskLevel,
    history: Vec<RiskTransition>,
}

impl RiskState {
    pub fn new(initial: RiskLevel) -> Self {
        Self {
            current: initial,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> RiskLevel {
        self.current
    }

    pub fn history(&self) -> &[RiskTransition] {
        &self.history
    }

    /// Escalate to CRITICAL. Returns the level held before the breach. Repeat
    /// breaches are recorded too, as CRITICAL to CRITICAL.
    pub fn apply_breach(&mut self, zones: Vec<String>, at: DateTime<Utc>) -> RiskLevel {
        let previous = self.current;
        self.current = RiskLevel::Critical;
        self.history.push(RiskTransition {
            from: previous,
            to: RiskLevel::Critical,
            at,
            cause: TransitionCause::Breach { zones },
        });
        previous
    }

    /// A ping with no zone hits. Risk is left as is.
    pub fn observe_clear(&self) -> RiskLevel {
        self.current
    }

    /// Apply a rule-based level. Ignored once CRITICAL, and never itself
    /// produces CRITICAL. Returns whether the level changed.
    pub fn apply_classification(&mut self, level: RiskLevel, at: DateTime<Utc>) -> bool {
        if self.current == RiskLevel::Critical {
            return false;
        }
        let level = level.min(RiskLevel::High);
        if level == self.current {
            return false;
        }
        self.history.push(RiskTransition {
            from: self.current,
            to: level,
            at,
            cause: TransitionCause::Classification,
        });
        self.current = level;
        true
    }

    /// Explicit operator reset, the only transition that can leave CRITICAL.
    pub fn reset(&mut self, to: RiskLevel, reason: impl Into<String>, at: DateTime<Utc>) {
        self.history.push(RiskTransition {
            from: self.current,
            to,
            at,
            cause: TransitionCause::ExternalReset {
                reason: reason.into(),
            },
        });
        self.current = to;
    }

    /// Rebuild state from the audit log, oldest alert first.
    pub fn replay(initial: RiskLevel, alerts: &[GeofenceAlert]) -> Self {
        let mut ordered: Vec<&GeofenceAlert> = alerts.iter().collect();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let mut state = Self::new(initial);
        for alert in ordered {
            state.apply_breach(alert.zones.clone(), alert.timestamp);
        }
        state
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Checks movement pings against restricted zones and escalates suspects that
/// enter one.
pub struct GeofenceMonitor {
    graph: Arc<dyn GraphStore>,
    geo: Arc<dyn GeoStore>,
    config: Config,
}

impl GeofenceMonitor {
    pub fn new(graph: Arc<dyn GraphStore>, geo: Arc<dyn GeoStore>, config: Config) -> Self {
        Self { graph, geo, config }
    }

    pub async fn ingest_movement(
        &self,
        ping: &MovementPing,
    ) -> Result<MovementOutcome, TracewireError> {
        let limit = self.config.store_timeout;
        if !Coord::new(ping.lat, ping.lng).is_valid() {
            return Err(TracewireError::Validation(format!(
                "coordinates ({}, {}) out of range",
                ping.lat, ping.lng
            )));
        }

        let zones = bounded(GEO, "check_geofence", limit, self.geo.check_geofence(ping.lat, ping.lng))
            .await?;
        let suspect = bounded(GRAPH, "get_suspect", limit, self.graph.get_suspect(&ping.suspect_id))
            .await?
            .ok_or_else(|| TracewireError::UnknownSuspect(ping.suspect_id.to_string()))?;

        let mut recorded = ping.clone();
        recorded.zone_hits = zones.clone();
        if zones.is_empty() {
            bounded(GRAPH, "record_ping", limit, self.graph.record_ping(&recorded, false)).await?;
            debug!(suspect = ping.suspect_id.as_str(), "Ping clear of restricted zones");
            return Ok(MovementOutcome {
                accepted: true,
                alert: None,
            });
        }

        let mut state = RiskState::new(suspect.risk);
        state.apply_breach(zones.clone(), ping.timestamp);
        let mut alert = GeofenceAlert {
            id: Uuid::new_v4(),
            suspect_id: ping.suspect_id.clone(),
            zones,
            previous_risk: suspect.risk,
            new_risk: state.current(),
            timestamp: ping.timestamp,
        };
        let written = bounded(
            GRAPH,
            "record_breach",
            limit,
            self.graph.record_breach(&recorded, &alert),
        )
        .await?;
        let Some(previous) = written else {
            debug!(
                suspect = ping.suspect_id.as_str(),
                "Breach ping already recorded, no new alert"
            );
            return Ok(MovementOutcome {
                accepted: true,
                alert: None,
            });
        };
        alert.previous_risk = previous;

        warn!(
            suspect = ping.suspect_id.as_str(),
            zones = ?alert.zones,
            previous_risk = alert.previous_risk.as_str(),
            "Geofence breach, suspect escalated to CRITICAL"
        );
        Ok(MovementOutcome {
            accepted: true,
            alert: Some(alert),
        })
    }

    /// Process a batch of pings. Pings for one suspect run in order so a later
    /// breach sees the risk an earlier one set; different suspects run
    /// concurrently. A failing ping is counted and never stops the batch.
    ///
    /// Fails as a whole only when a store is unreachable before any ping is
    /// processed.
    pub async fn ingest_batch(
        &self,
        pings: Vec<MovementPing>,
    ) -> Result<MovementBatchReport, TracewireError> {
        let limit = self.config.store_timeout;
        bounded(GRAPH, "ping", limit, self.graph.ping()).await?;
        bounded(GEO, "ping", limit, self.geo.ping()).await?;

        let total = pings.len();
        let groups = group_by_suspect(pings);
        let results = join_all(groups.into_iter().map(|group| self.run_group(group))).await;

        let mut ordered: Vec<(usize, SuspectId, Result<MovementOutcome, TracewireError>)> =
            results.into_iter().flatten().collect();
        ordered.sort_by_key(|(index, _, _)| *index);

        let mut report = MovementBatchReport::default();
        for (index, suspect, result) in ordered {
            match result {
                Ok(outcome) => {
                    report.success += 1;
                    report.alerts.extend(outcome.alert);
                }
                Err(e) => {
                    warn!(index, suspect = suspect.as_str(), error = %e, "Movement event failed");
                    report.failures += 1;
                    report.errors.push(RecordError {
                        index,
                        key: suspect.to_string(),
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
            "Movement batch processed"
        );
        Ok(report)
    }

    async fn run_group(
        &self,
        group: Vec<(usize, MovementPing)>,
    ) -> Vec<(usize, SuspectId, Result<MovementOutcome, TracewireError>)> {
        let mut out = Vec::with_capacity(group.len());
        for (index, ping) in group {
            let result = self.ingest_movement(&ping).await;
            out.push((index, ping.suspect_id, result));
        }
        out
    }
}

/// Group pings per suspect, keeping first-seen suspect order and the original
/// index of each ping.
fn group_by_suspect(pings: Vec<MovementPing>) -> Vec<Vec<(usize, MovementPing)>> {
    let mut slots: HashMap<SuspectId, usize> = HashMap::new();
    let mut groups: Vec<Vec<(usize, MovementPing)>> = Vec::new();
    for (index, ping) in pings.into_iter().enumerate() {
        let slot = *slots.entry(ping.suspect_id.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push((index, ping));
    }
    groups
}
