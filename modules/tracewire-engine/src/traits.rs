// Store seams for the correlation engine.
//
// GraphStore is the relationship graph (suspects, victims, calls, pings, alerts).
// GeoStore is the geospatial reference store (towers, restricted zones,
// multilateration). The engine only talks to these traits; Neo4j and the
// in-memory reference store are the production implementations, and
// `testing::MemoryGraphStore` stands in for Neo4j in tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use tracewire_common::{
    CallEdge, CellTower, GeofenceAlert, InvestigationId, InvestigationNode,
    InvestigationScope, MovementPing, PartyRef, RiskLevel, SuspectId, SuspectNode, TowerId,
    TriangulationFix, VictimNode,
};
use tracewire_graph::InvestigationGraph;

// ---------------------------------------------------------------------------
// Upserts
// ---------------------------------------------------------------------------

/// Idempotent node write. The variant is the node kind; the natural key is
/// derived from it (phone for people, id for investigations).
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpsert {
    Investigation(InvestigationNode),
    Suspect {
        node: SuspectNode,
        investigation: Option<InvestigationId>,
    },
    Victim {
        node: VictimNode,
        investigation: Option<InvestigationId>,
    },
    /// Legacy coordinate string appended to a suspect's location history.
    SuspectLocation {
        suspect: SuspectId,
        coordinates: String,
    },
}

impl NodeUpsert {
    pub fn natural_key(&self) -> String {
        match self {
            NodeUpsert::Investigation(n) => format!("investigation:{}", n.id),
            NodeUpsert::Suspect { node, .. } => format!("suspect:{}", node.phone),
            NodeUpsert::Victim { node, .. } => format!("victim:{}", node.phone),
            NodeUpsert::SuspectLocation {
                suspect,
                coordinates,
            } => format!("location:{suspect}:{coordinates}"),
        }
    }
}

/// Idempotent edge write, merged on the edge's natural key.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeUpsert {
    Call(CallEdge),
    Membership {
        investigation: InvestigationId,
        member: PartyRef,
    },
}

// ---------------------------------------------------------------------------
// GraphStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap reachability check, run before batches start.
    async fn ping(&self) -> Result<()>;

    /// Tower ids referenced by a suspect's calls and pings, phantom or not.
    async fn find_tower_ids_for_suspect(&self, id: &SuspectId) -> Result<Vec<TowerId>>;

    /// Calls placed by suspects in the investigation, inside the scope window.
    async fn find_call_edges(&self, scope: &InvestigationScope) -> Result<Vec<CallEdge>>;

    async fn find_movement_pings(&self, id: &SuspectId) -> Result<Vec<MovementPing>>;

    /// Legacy free-form coordinate strings. They carry no timestamp.
    async fn find_location_history(&self, id: &SuspectId) -> Result<Vec<String>>;

    async fn get_suspect(&self, id: &SuspectId) -> Result<Option<SuspectNode>>;

    async fn list_suspects(&self, investigation: &InvestigationId) -> Result<Vec<SuspectNode>>;

    async fn merge_node(&self, node: &NodeUpsert) -> Result<()>;

    /// Either writes the whole edge or fails; never a partial edge.
    async fn merge_edge(&self, edge: &EdgeUpsert) -> Result<()>;

    /// Persist a ping under its suspect, labelled as a breach or not.
    async fn record_ping(&self, ping: &MovementPing, breach: bool) -> Result<()>;

    /// Persist a breaching ping, escalate the suspect to `alert.new_risk` and
    /// append the alert to the audit log as one write: all of it lands or none.
    ///
    /// Returns the stored risk before escalation. Returns `None` when the ping
    /// was already recorded, in which case nothing new is written.
    async fn record_breach(
        &self,
        ping: &MovementPing,
        alert: &GeofenceAlert,
    ) -> Result<Option<RiskLevel>>;

    /// Write a rule-derived risk unless the stored risk is CRITICAL, checked at
    /// write time. Returns whether the risk was written.
    async fn set_risk_unless_critical(&self, id: &SuspectId, risk: RiskLevel) -> Result<bool>;

    async fn find_alerts(&self, id: &SuspectId) -> Result<Vec<GeofenceAlert>>;

    /// Breaching pings per suspect inside the scope.
    async fn find_breach_counts(&self, scope: &InvestigationScope) -> Result<Vec<(SuspectId, u64)>>;
}

#[async_trait]
impl GraphStore for InvestigationGraph {
    async fn ping(&self) -> Result<()> {
        Ok(self.client().ping().await?)
    }

    async fn find_tower_ids_for_suspect(&self, id: &SuspectId) -> Result<Vec<TowerId>> {
        Ok(InvestigationGraph::find_tower_ids_for_suspect(self, id).await?)
    }

    async fn find_call_edges(&self, scope: &InvestigationScope) -> Result<Vec<CallEdge>> {
        Ok(InvestigationGraph::find_call_edges(self, scope).await?)
    }

    async fn find_movement_pings(&self, id: &SuspectId) -> Result<Vec<MovementPing>> {
        Ok(InvestigationGraph::find_movement_pings(self, id).await?)
    }

    async fn find_location_history(&self, id: &SuspectId) -> Result<Vec<String>> {
        Ok(InvestigationGraph::find_location_history(self, id).await?)
    }

    async fn get_suspect(&self, id: &SuspectId) -> Result<Option<SuspectNode>> {
        Ok(InvestigationGraph::get_suspect(self, id).await?)
    }

    async fn list_suspects(&self, investigation: &InvestigationId) -> Result<Vec<SuspectNode>> {
        Ok(InvestigationGraph::list_suspects(self, investigation).await?)
    }

    async fn merge_node(&self, node: &NodeUpsert) -> Result<()> {
        match node {
            NodeUpsert::Investigation(n) => self.merge_investigation(n).await?,
            NodeUpsert::Suspect { node, investigation } => {
                self.merge_suspect(node, investigation.as_ref()).await?
            }
            NodeUpsert::Victim { node, investigation } => {
                self.merge_victim(node, investigation.as_ref()).await?
            }
            NodeUpsert::SuspectLocation {
                suspect,
                coordinates,
            } => self.append_location_history(suspect, coordinates).await?,
        }
        Ok(())
    }

    async fn merge_edge(&self, edge: &EdgeUpsert) -> Result<()> {
        match edge {
            EdgeUpsert::Call(call) => self.merge_call(call).await?,
            EdgeUpsert::Membership {
                investigation,
                member,
            } => self.link_to_investigation(investigation, member).await?,
        }
        Ok(())
    }

    async fn record_ping(&self, ping: &MovementPing, breach: bool) -> Result<()> {
        Ok(InvestigationGraph::record_ping(self, ping, breach).await?)
    }

    async fn record_breach(
        &self,
        ping: &MovementPing,
        alert: &GeofenceAlert,
    ) -> Result<Option<RiskLevel>> {
        Ok(InvestigationGraph::record_breach(self, ping, alert).await?)
    }

    async fn set_risk_unless_critical(&self, id: &SuspectId, risk: RiskLevel) -> Result<bool> {
        Ok(InvestigationGraph::set_risk_unless_critical(self, id, risk).await?)
    }

    async fn find_alerts(&self, id: &SuspectId) -> Result<Vec<GeofenceAlert>> {
        Ok(InvestigationGraph::find_alerts(self, id).await?)
    }

    async fn find_breach_counts(&self, scope: &InvestigationScope) -> Result<Vec<(SuspectId, u64)>> {
        Ok(InvestigationGraph::find_breach_counts(self, scope).await?)
    }
}

// ---------------------------------------------------------------------------
// GeoStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GeoStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Resolve tower ids. Unknown ids are simply absent from the map; that
    /// absence is what marks an id as phantom.
    async fn get_towers_by_ids(&self, ids: &[TowerId]) -> Result<HashMap<TowerId, CellTower>>;

    /// Names of restricted zones containing the point.
    async fn check_geofence(&self, lat: f64, lng: f64) -> Result<Vec<String>>;

    /// Multilateration over resolvable towers only.
    async fn triangulate(&self, valid: &[TowerId]) -> Result<Option<TriangulationFix>>;
}
