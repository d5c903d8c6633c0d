use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::warn;

use tracewire_common::ingest::BASELINE_RISK;
use tracewire_common::{
    format_timestamp, parse_timestamp, CallEdge, GeofenceAlert, InvestigationId,
    InvestigationNode, InvestigationScope, MovementPing, NetworkRole, PartyRef, Proximity,
    RiskLevel, SuspectId, SuspectNode, TowerId, VictimId, VictimNode,
};

use crate::GraphClient;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Neo4j(#[from] neo4rs::Error),

    /// A MERGE matched nothing: one of the edge endpoints has not been ingested.
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),
}

/// Read/write access to the investigation graph.
///
/// Schema:
/// `(:Investigation)-[:CONTAINS]->(:Suspect|:Victim)`,
/// `(:Suspect)-[:CALLED {at, ...}]->(:Suspect|:Victim)`,
/// `(:Suspect)-[:TRACKED]->(:Ping)` with breaching pings also labelled `:Breach`,
/// `(:Suspect)-[:RAISED]->(:GeofenceAlert)`, written only by `record_breach`.
///
/// Every write is a single MERGE keyed by a natural key, so retries and batch
/// replays converge on the same graph.
#[derive(Clone)]
pub struct InvestigationGraph {
    client: GraphClient,
}

impl InvestigationGraph {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    // --- Nodes ---

    pub async fn merge_investigation(&self, node: &InvestigationNode) -> Result<(), GraphError> {
        let q = query(
            "MERGE (i:Investigation {id: $id})
             ON CREATE SET i.title = $title, i.created_at = datetime()
             ON MATCH SET i.title = CASE WHEN $title = '' THEN i.title ELSE $title END",
        )
        .param("id", node.id.as_str())
        .param("title", node.title.as_str());

        self.client.graph.run(q).await?;
        Ok(())
    }

    /// Upsert a suspect by phone number. Risk is only set on create; after that it
    /// belongs to `record_breach` and `set_risk_unless_critical`.
    pub async fn merge_suspect(
        &self,
        node: &SuspectNode,
        investigation: Option<&InvestigationId>,
    ) -> Result<(), GraphError> {
        let q = query(
            "MERGE (s:Suspect {phone: $phone})
             ON CREATE SET
                s.id = $id,
                s.name = $name,
                s.risk = $risk,
                s.role = $role,
                s.location_history = []
             ON MATCH SET
                s.name = CASE WHEN $name = '' THEN s.name ELSE $name END,
                s.role = CASE WHEN $role = 'unknown' THEN s.role ELSE $role END
             FOREACH (_ IN CASE WHEN $investigation <> '' THEN [1] ELSE [] END |
                MERGE (i:Investigation {id: $investigation})
                MERGE (i)-[:CONTAINS]->(s))",
        )
        .param("phone", node.phone.as_str())
        .param("id", node.id.as_str())
        .param("name", node.name.as_str())
        .param("risk", node.risk.as_str())
        .param("role", node.role.as_str())
        .param("investigation", investigation.map(|i| i.as_str()).unwrap_or(""));

        self.client.graph.run(q).await?;
        Ok(())
    }

    pub async fn merge_victim(
        &self,
        node: &VictimNode,
        investigation: Option<&InvestigationId>,
    ) -> Result<(), GraphError> {
        let q = query(
            "MERGE (v:Victim {phone: $phone})
             ON CREATE SET v.id = $id, v.name = $name
             ON MATCH SET v.name = CASE WHEN $name = '' THEN v.name ELSE $name END
             FOREACH (_ IN CASE WHEN $investigation <> '' THEN [1] ELSE [] END |
                MERGE (i:Investigation {id: $investigation})
                MERGE (i)-[:CONTAINS]->(v))",
        )
        .param("phone", node.phone.as_str())
        .param("id", node.id.as_str())
        .param("name", node.name.as_str())
        .param("investigation", investigation.map(|i| i.as_str()).unwrap_or(""));

        self.client.graph.run(q).await?;
        Ok(())
    }

    pub async fn link_to_investigation(
        &self,
        investigation: &InvestigationId,
        member: &PartyRef,
    ) -> Result<(), GraphError> {
        let cypher = format!(
            "MATCH (m:{label} {{id: $member}})
             MERGE (i:Investigation {{id: $investigation}})
             MERGE (i)-[:CONTAINS]->(m)
             RETURN count(m) AS written",
            label = member.label(),
        );
        let q = query(&cypher)
            .param("member", member.id_str())
            .param("investigation", investigation.as_str());

        self.expect_written(q, || format!("{member} not found")).await
    }

    /// Append a legacy coordinate string to the suspect's location history (set semantics).
    pub async fn append_location_history(
        &self,
        suspect: &SuspectId,
        coordinates: &str,
    ) -> Result<(), GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $id})
             SET s.location_history = CASE
                WHEN $coords IN coalesce(s.location_history, []) THEN s.location_history
                ELSE coalesce(s.location_history, []) + $coords
             END
             RETURN count(s) AS written",
        )
        .param("id", suspect.as_str())
        .param("coords", coordinates);

        self.expect_written(q, || format!("suspect {suspect} not found")).await
    }

    // --- Edges ---

    /// Merge a call edge keyed by `(caller, receiver, at)`. The edge is written in
    /// one statement: it either exists fully afterwards or not at all.
    pub async fn merge_call(&self, edge: &CallEdge) -> Result<(), GraphError> {
        let cypher = format!(
            "MATCH (s:Suspect {{id: $caller}})
             MATCH (r:{label} {{id: $receiver}})
             MERGE (s)-[c:CALLED {{at: datetime($at)}}]->(r)
             ON CREATE SET
                c.duration_secs = $duration_secs,
                c.caller_tower = $caller_tower,
                c.receiver_tower = $receiver_tower,
                c.proximity = $proximity
             RETURN count(c) AS written",
            label = edge.receiver.label(),
        );
        let q = query(&cypher)
            .param("caller", edge.caller.as_str())
            .param("receiver", edge.receiver.id_str())
            .param("at", format_timestamp(&edge.timestamp))
            .param("duration_secs", edge.duration_secs as i64)
            .param("caller_tower", tower_str(edge.caller_tower.as_ref()))
            .param("receiver_tower", tower_str(edge.receiver_tower.as_ref()))
            .param("proximity", edge.proximity.as_str());

        self.expect_written(q, || {
            format!("call {} -> {} has no matching endpoints", edge.caller, edge.receiver)
        })
        .await
    }

    /// Persist a movement ping under its suspect, labelled `:Breach` when it hit a zone.
    pub async fn record_ping(&self, ping: &MovementPing, breach: bool) -> Result<(), GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $suspect})
             MERGE (p:Ping {key: $key})
             ON CREATE SET
                p.lat = $lat,
                p.lng = $lng,
                p.at = datetime($at),
                p.tower_id = $tower_id,
                p.zones = $zones,
                p.breach = $breach
             MERGE (s)-[:TRACKED]->(p)
             FOREACH (_ IN CASE WHEN $breach THEN [1] ELSE [] END | SET p:Breach)
             RETURN count(p) AS written",
        )
        .param("suspect", ping.suspect_id.as_str())
        .param("key", ping_key(ping))
        .param("lat", ping.lat)
        .param("lng", ping.lng)
        .param("at", format_timestamp(&ping.timestamp))
        .param("tower_id", tower_str(ping.tower_id.as_ref()))
        .param("zones", ping.zone_hits.clone())
        .param("breach", breach);

        self.expect_written(q, || format!("suspect {} not found", ping.suspect_id))
            .await
    }

    /// Persist a breaching ping, escalate the suspect and append its alert in one
    /// statement, so either all three land or none do.
    ///
    /// Returns the risk held before escalation, or `None` when the ping was already
    /// recorded: a replay writes no second alert and leaves risk alone.
    pub async fn record_breach(
        &self,
        ping: &MovementPing,
        alert: &GeofenceAlert,
    ) -> Result<Option<RiskLevel>, GraphError> {
        // The first SET takes the suspect's write lock before risk is read.
        let q = query(
            "MATCH (s:Suspect {id: $suspect})
             SET s.risk_checked_at = datetime()
             WITH s
             OPTIONAL MATCH (seen:Ping {key: $key})
             WITH s, seen IS NULL AS fresh, coalesce(s.risk, $baseline) AS previous
             MERGE (p:Ping {key: $key})
             ON CREATE SET
                p.lat = $lat,
                p.lng = $lng,
                p.at = datetime($at),
                p.tower_id = $tower_id,
                p.zones = $zones
             SET p:Breach, p.breach = true
             MERGE (s)-[:TRACKED]->(p)
             FOREACH (_ IN CASE WHEN fresh THEN [1] ELSE [] END |
                SET s.risk = $new_risk,
                    s.risk_updated_at = datetime(),
                    s.last_breach_zones = $zones,
                    s.last_breach_lat = $lat,
                    s.last_breach_lng = $lng,
                    s.last_breach_at = datetime($at)
                CREATE (a:GeofenceAlert {
                    id: $alert_id,
                    suspect_id: $suspect,
                    zones: $zones,
                    previous_risk: previous,
                    new_risk: $new_risk,
                    at: datetime($at)
                })
                CREATE (s)-[:RAISED]->(a))
             RETURN fresh, previous",
        )
        .param("suspect", ping.suspect_id.as_str())
        .param("key", ping_key(ping))
        .param("baseline", BASELINE_RISK.as_str())
        .param("lat", ping.lat)
        .param("lng", ping.lng)
        .param("at", format_timestamp(&ping.timestamp))
        .param("tower_id", tower_str(ping.tower_id.as_ref()))
        .param("zones", alert.zones.clone())
        .param("new_risk", alert.new_risk.as_str())
        .param("alert_id", alert.id.to_string());

        let mut stream = self.client.graph.execute(q).await?;
        let Some(row) = stream.next().await? else {
            return Err(GraphError::MissingEndpoint(format!(
                "suspect {} not found",
                ping.suspect_id
            )));
        };
        let fresh: bool = row.get("fresh").unwrap_or(false);
        if !fresh {
            return Ok(None);
        }
        let previous: String = row.get("previous").unwrap_or_default();
        Ok(Some(RiskLevel::parse(&previous).unwrap_or(BASELINE_RISK)))
    }

    /// Set a rule-derived risk unless the suspect is CRITICAL. The check and the
    /// write are one statement, so a breach landing after the caller read the
    /// suspect is never overwritten. Returns whether the risk was written.
    pub async fn set_risk_unless_critical(
        &self,
        suspect: &SuspectId,
        risk: RiskLevel,
    ) -> Result<bool, GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $id})
             SET s.risk_checked_at = datetime()
             WITH s, coalesce(s.risk, '') <> $critical AS writable
             FOREACH (_ IN CASE WHEN writable THEN [1] ELSE [] END |
                SET s.risk = $risk,
                    s.risk_updated_at = datetime())
             RETURN writable",
        )
        .param("id", suspect.as_str())
        .param("critical", RiskLevel::Critical.as_str())
        .param("risk", risk.as_str());

        let mut stream = self.client.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(row.get("writable").unwrap_or(false)),
            None => Err(GraphError::MissingEndpoint(format!("suspect {suspect} not found"))),
        }
    }

    // --- Reads ---

    pub async fn get_suspect(&self, id: &SuspectId) -> Result<Option<SuspectNode>, GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $id})
             RETURN s.id AS id, s.phone AS phone, coalesce(s.name, '') AS name,
                    s.risk AS risk, coalesce(s.role, 'unknown') AS role",
        )
        .param("id", id.as_str());

        let mut stream = self.client.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(row_to_suspect(&row)),
            None => Ok(None),
        }
    }

    pub async fn list_suspects(
        &self,
        investigation: &InvestigationId,
    ) -> Result<Vec<SuspectNode>, GraphError> {
        let q = query(
            "MATCH (:Investigation {id: $investigation})-[:CONTAINS]->(s:Suspect)
             RETURN s.id AS id, s.phone AS phone, coalesce(s.name, '') AS name,
                    s.risk AS risk, coalesce(s.role, 'unknown') AS role
             ORDER BY s.id",
        )
        .param("investigation", investigation.as_str());

        let mut suspects = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            if let Some(s) = row_to_suspect(&row) {
                suspects.push(s);
            }
        }
        Ok(suspects)
    }

    /// Every tower id the graph associates with a suspect: its own end of each call
    /// plus tower ids on its pings. Phantom ids are returned as-is.
    pub async fn find_tower_ids_for_suspect(
        &self,
        id: &SuspectId,
    ) -> Result<Vec<TowerId>, GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $id})
             OPTIONAL MATCH (s)-[out:CALLED]->()
             WITH s, collect(out.caller_tower) AS outbound
             OPTIONAL MATCH (s)<-[inc:CALLED]-()
             WITH s, outbound, collect(inc.receiver_tower) AS inbound
             OPTIONAL MATCH (s)-[:TRACKED]->(p:Ping)
             WITH outbound + inbound + collect(p.tower_id) AS towers
             UNWIND towers AS tower
             WITH DISTINCT tower WHERE tower IS NOT NULL AND tower <> ''
             RETURN tower ORDER BY tower",
        )
        .param("id", id.as_str());

        let mut towers = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let raw: String = row.get("tower").unwrap_or_default();
            match TowerId::parse(raw) {
                Ok(t) => towers.push(t),
                Err(e) => warn!(suspect = id.as_str(), error = %e, "Skipping malformed tower id"),
            }
        }
        Ok(towers)
    }

    /// Calls placed by suspects inside the investigation, within the scope window.
    pub async fn find_call_edges(
        &self,
        scope: &InvestigationScope,
    ) -> Result<Vec<CallEdge>, GraphError> {
        let q = query(
            "MATCH (:Investigation {id: $investigation})-[:CONTAINS]->(s:Suspect)-[c:CALLED]->(r)
             WHERE ($from = '' OR c.at >= datetime($from))
               AND ($to = '' OR c.at <= datetime($to))
             RETURN s.id AS caller,
                    CASE WHEN r:Victim THEN 'victim' ELSE 'suspect' END AS receiver_kind,
                    r.id AS receiver_id,
                    c.at AS at,
                    coalesce(c.duration_secs, 0) AS duration_secs,
                    coalesce(c.caller_tower, '') AS caller_tower,
                    coalesce(c.receiver_tower, '') AS receiver_tower,
                    coalesce(c.proximity, 'unknown') AS proximity
             ORDER BY c.at, s.id, r.id",
        )
        .param("investigation", scope.investigation_id.as_str())
        .param("from", scope.from.map(|d| format_timestamp(&d)).unwrap_or_default())
        .param("to", scope.to.map(|d| format_timestamp(&d)).unwrap_or_default());

        let mut edges = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            match row_to_call(&row) {
                Some(edge) => edges.push(edge),
                None => warn!("Skipping malformed CALLED edge"),
            }
        }
        Ok(edges)
    }

    pub async fn find_movement_pings(&self, id: &SuspectId) -> Result<Vec<MovementPing>, GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $id})-[:TRACKED]->(p:Ping)
             RETURN p.lat AS lat, p.lng AS lng, p.at AS at,
                    coalesce(p.tower_id, '') AS tower_id,
                    coalesce(p.zones, []) AS zones
             ORDER BY p.at",
        )
        .param("id", id.as_str());

        let mut pings = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let Some(timestamp) = row_datetime_opt(&row, "at") else {
                warn!(suspect = id.as_str(), "Skipping ping without timestamp");
                continue;
            };
            let tower: String = row.get("tower_id").unwrap_or_default();
            pings.push(MovementPing {
                suspect_id: id.clone(),
                lat: row.get("lat").unwrap_or(0.0),
                lng: row.get("lng").unwrap_or(0.0),
                timestamp,
                tower_id: TowerId::parse(tower).ok(),
                zone_hits: row.get("zones").unwrap_or_default(),
            });
        }
        Ok(pings)
    }

    pub async fn find_location_history(&self, id: &SuspectId) -> Result<Vec<String>, GraphError> {
        let q = query(
            "MATCH (s:Suspect {id: $id})
             RETURN coalesce(s.location_history, []) AS history",
        )
        .param("id", id.as_str());

        let mut stream = self.client.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(row.get("history").unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Breaching pings per suspect in the investigation, within the scope window.
    pub async fn find_breach_counts(
        &self,
        scope: &InvestigationScope,
    ) -> Result<Vec<(SuspectId, u64)>, GraphError> {
        let q = query(
            "MATCH (:Investigation {id: $investigation})-[:CONTAINS]->(s:Suspect)-[:TRACKED]->(p:Breach)
             WHERE ($from = '' OR p.at >= datetime($from))
               AND ($to = '' OR p.at <= datetime($to))
             RETURN s.id AS suspect_id, count(p) AS breaches
             ORDER BY s.id",
        )
        .param("investigation", scope.investigation_id.as_str())
        .param("from", scope.from.map(|d| format_timestamp(&d)).unwrap_or_default())
        .param("to", scope.to.map(|d| format_timestamp(&d)).unwrap_or_default());

        let mut counts = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let raw: String = row.get("suspect_id").unwrap_or_default();
            let breaches: i64 = row.get("breaches").unwrap_or(0);
            if let Ok(id) = SuspectId::parse(raw) {
                counts.push((id, breaches.max(0) as u64));
            }
        }
        Ok(counts)
    }

    /// Audit trail for one suspect, oldest first.
    pub async fn find_alerts(&self, id: &SuspectId) -> Result<Vec<GeofenceAlert>, GraphError> {
        let q = query(
            "MATCH (:Suspect {id: $id})-[:RAISED]->(a:GeofenceAlert)
             RETURN a.id AS id, a.zones AS zones, a.previous_risk AS previous_risk,
                    a.new_risk AS new_risk, a.at AS at
             ORDER BY a.at",
        )
        .param("id", id.as_str());

        let mut alerts = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let alert_id: String = row.get("id").unwrap_or_default();
            let previous: String = row.get("previous_risk").unwrap_or_default();
            let new: String = row.get("new_risk").unwrap_or_default();
            let (Ok(alert_id), Some(previous_risk), Some(new_risk), Some(timestamp)) = (
                uuid::Uuid::parse_str(&alert_id),
                RiskLevel::parse(&previous),
                RiskLevel::parse(&new),
                row_datetime_opt(&row, "at"),
            ) else {
                warn!(suspect = id.as_str(), "Skipping malformed alert");
                continue;
            };
            alerts.push(GeofenceAlert {
                id: alert_id,
                suspect_id: id.clone(),
                zones: row.get("zones").unwrap_or_default(),
                previous_risk,
                new_risk,
                timestamp,
            });
        }
        Ok(alerts)
    }

    async fn expect_written(
        &self,
        q: neo4rs::Query,
        missing: impl FnOnce() -> String,
    ) -> Result<(), GraphError> {
        let mut stream = self.client.graph.execute(q).await?;
        let mut written = 0i64;
        while let Some(row) = stream.next().await? {
            written += row.get::<i64>("written").unwrap_or(0);
        }
        if written == 0 {
            return Err(GraphError::MissingEndpoint(missing()));
        }
        Ok(())
    }
}

/// Natural key for a ping: one observation per suspect per instant.
pub fn ping_key(ping: &MovementPing) -> String {
    format!("{}@{}", ping.suspect_id, format_timestamp(&ping.timestamp))
}

fn tower_str(tower: Option<&TowerId>) -> String {
    tower.map(|t| t.as_str().to_string()).unwrap_or_default()
}

fn row_to_suspect(row: &neo4rs::Row) -> Option<SuspectNode> {
    let id: String = row.get("id").ok()?;
    let risk: String = row.get("risk").unwrap_or_default();
    let role: String = row.get("role").unwrap_or_default();
    Some(SuspectNode {
        id: SuspectId::parse(id).ok()?,
        phone: row.get("phone").unwrap_or_default(),
        name: row.get("name").unwrap_or_default(),
        risk: RiskLevel::parse(&risk).unwrap_or(RiskLevel::Medium),
        role: NetworkRole::parse(&role),
    })
}

fn row_to_call(row: &neo4rs::Row) -> Option<CallEdge> {
    let caller: String = row.get("caller").ok()?;
    let receiver_kind: String = row.get("receiver_kind").ok()?;
    let receiver_id: String = row.get("receiver_id").ok()?;
    let caller_tower: String = row.get("caller_tower").unwrap_or_default();
    let receiver_tower: String = row.get("receiver_tower").unwrap_or_default();
    let proximity: String = row.get("proximity").unwrap_or_default();
    let duration: i64 = row.get("duration_secs").unwrap_or(0);

    let receiver = match receiver_kind.as_str() {
        "victim" => PartyRef::Victim(VictimId::parse(receiver_id).ok()?),
        _ => PartyRef::Suspect(SuspectId::parse(receiver_id).ok()?),
    };

    Some(CallEdge {
        caller: SuspectId::parse(caller).ok()?,
        receiver,
        timestamp: row_datetime_opt(row, "at")?,
        duration_secs: duration.clamp(0, u32::MAX as i64) as u32,
        caller_tower: TowerId::parse(caller_tower).ok(),
        receiver_tower: TowerId::parse(receiver_tower).ok(),
        proximity: Proximity::parse(&proximity),
    })
}

/// Read an optional datetime from a neo4rs Row, handling both Neo4j DateTime types
/// (stored via Cypher `datetime()`) and plain string values.
fn row_datetime_opt(row: &neo4rs::Row, key: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = row.get::<chrono::DateTime<chrono::FixedOffset>>(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = row.get::<chrono::NaiveDateTime>(key) {
        return Some(ndt.and_utc());
    }
    row.get::<String>(key).ok().and_then(|s| parse_timestamp(&s))
}
