use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TracewireError;
use crate::geo::Coord;

// --- Identifiers ---

/// Longest identifier accepted at the boundary.
pub const MAX_ID_LEN: usize = 128;

fn validate_id(kind: &str, raw: String) -> Result<String, TracewireError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TracewireError::Validation(format!("{kind} id is empty")));
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(TracewireError::Validation(format!(
            "{kind} id exceeds {MAX_ID_LEN} characters"
        )));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(TracewireError::Validation(format!(
            "{kind} id contains control characters"
        )));
    }
    Ok(trimmed.to_string())
}

macro_rules! string_id {
    ($name:ident, $kind:literal) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier. Surrounding whitespace is trimmed.
            pub fn parse(raw: impl Into<String>) -> Result<Self, TracewireError> {
                validate_id($kind, raw.into()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = TracewireError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(SuspectId, "suspect");
string_id!(VictimId, "victim");
string_id!(TowerId, "tower");
string_id!(InvestigationId, "investigation");

// --- Enums ---

/// Suspect risk. Ordered so that `max` never lowers a level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Case-insensitive parse of a stored risk value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            "CRITICAL" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NetworkRole {
    Leader,
    Coordinator,
    Associate,
    Unknown,
}

impl NetworkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkRole::Leader => "leader",
            NetworkRole::Coordinator => "coordinator",
            NetworkRole::Associate => "associate",
            NetworkRole::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "leader" => NetworkRole::Leader,
            "coordinator" => NetworkRole::Coordinator,
            "associate" | "member" => NetworkRole::Associate,
            _ => NetworkRole::Unknown,
        }
    }
}

/// How close the two ends of a call were, judged from their towers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    SameTower,
    Nearby,
    Distant,
    Unknown,
}

impl Proximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::SameTower => "same_tower",
            Proximity::Nearby => "nearby",
            Proximity::Distant => "distant",
            Proximity::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "same_tower" => Proximity::SameTower,
            "nearby" => Proximity::Nearby,
            "distant" => Proximity::Distant,
            _ => Proximity::Unknown,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    Monitor,
    HeightenedSurveillance,
    UrgentInvestigation,
    ImmediateArrest,
    InterceptImmediately,
}

// --- Graph Nodes & Edges ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvestigationNode {
    pub id: InvestigationId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SuspectNode {
    pub id: SuspectId,
    pub phone: String,
    pub name: String,
    pub risk: RiskLevel,
    pub role: NetworkRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VictimNode {
    pub id: VictimId,
    pub phone: String,
    pub name: String,
}

/// The receiving end of a call. Suspects also call each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PartyRef {
    Suspect(SuspectId),
    Victim(VictimId),
}

impl PartyRef {
    pub fn id_str(&self) -> &str {
        match self {
            PartyRef::Suspect(id) => id.as_str(),
            PartyRef::Victim(id) => id.as_str(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PartyRef::Suspect(_) => "Suspect",
            PartyRef::Victim(_) => "Victim",
        }
    }
}

impl std::fmt::Display for PartyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.label(), self.id_str())
    }
}

/// A call detail record. Immutable once ingested; `(caller, receiver, timestamp)`
/// is its natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallEdge {
    pub caller: SuspectId,
    pub receiver: PartyRef,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: u32,
    pub caller_tower: Option<TowerId>,
    pub receiver_tower: Option<TowerId>,
    pub proximity: Proximity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MovementPing {
    pub suspect_id: SuspectId,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: DateTime<Utc>,
    pub tower_id: Option<TowerId>,
    #[serde(default)]
    pub zone_hits: Vec<String>,
}

// --- Geo Reference Data ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CellTower {
    pub id: TowerId,
    pub lat: f64,
    pub lng: f64,
    pub coverage_radius_km: f64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RestrictedZone {
    pub name: String,
    pub polygon: Vec<Coord>,
}

// --- Position Resolution ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Tier by count of valid towers alone: 3+ HIGH, 2 MEDIUM, 1 LOW, 0 none.
    pub fn from_tower_count(count: usize) -> Option<Self> {
        match count {
            0 => None,
            1 => Some(ConfidenceTier::Low),
            2 => Some(ConfidenceTier::Medium),
            _ => Some(ConfidenceTier::High),
        }
    }
}

/// What the geo store's multilateration primitive returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TriangulationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: Option<f64>,
    pub tower_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PositionEstimate {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_meters: f64,
    pub confidence: ConfidenceTier,
    pub tower_count: usize,
    pub towers_used: Vec<TowerId>,
    pub phantom_towers: Vec<TowerId>,
}

/// Result of position resolution. `NoEstimate` is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PositionOutcome {
    Estimate(PositionEstimate),
    NoEstimate { phantom_towers: Vec<TowerId> },
}

impl PositionOutcome {
    pub fn estimate(&self) -> Option<&PositionEstimate> {
        match self {
            PositionOutcome::Estimate(e) => Some(e),
            PositionOutcome::NoEstimate { .. } => None,
        }
    }

    pub fn phantom_towers(&self) -> &[TowerId] {
        match self {
            PositionOutcome::Estimate(e) => &e.phantom_towers,
            PositionOutcome::NoEstimate { phantom_towers } => phantom_towers,
        }
    }
}

// --- Trajectory ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrajectorySource {
    Event,
    Cdr,
    History,
}

/// Tie-break order for points sharing a timestamp. Earlier entries sort first.
pub const SOURCE_PRIORITY: [TrajectorySource; 3] = [
    TrajectorySource::Event,
    TrajectorySource::Cdr,
    TrajectorySource::History,
];

impl TrajectorySource {
    pub fn priority(&self) -> usize {
        SOURCE_PRIORITY
            .iter()
            .position(|s| s == self)
            .unwrap_or(SOURCE_PRIORITY.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrajectoryPoint {
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub tower_id: Option<TowerId>,
    pub source: TrajectorySource,
    pub coverage_radius_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    UnresolvedTower,
    MissingTower,
    UnparseableCoordinates,
    LookupTimedOut,
}

/// A trajectory input that could not be placed on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrajectoryGap {
    pub source: TrajectorySource,
    pub reason: GapReason,
    pub timestamp: Option<DateTime<Utc>>,
    pub tower_id: Option<TowerId>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Trajectory {
    pub suspect_id: SuspectId,
    pub points: Vec<TrajectoryPoint>,
    pub gaps: Vec<TrajectoryGap>,
}

impl Trajectory {
    /// No usable points: the insufficient-data result.
    pub fn is_insufficient(&self) -> bool {
        self.points.is_empty()
    }
}

// --- Geofence ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BreachMeta {
    pub zones: Vec<String>,
    pub lat: f64,
    pub lng: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeofenceAlert {
    pub id: Uuid,
    pub suspect_id: SuspectId,
    pub zones: Vec<String>,
    pub previous_risk: RiskLevel,
    pub new_risk: RiskLevel,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MovementOutcome {
    pub accepted: bool,
    pub alert: Option<GeofenceAlert>,
}

// --- Convergence & Patterns ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConvergencePoint {
    pub victim: PartyRef,
    pub tower_id: TowerId,
    pub unique_callers: Vec<SuspectId>,
    pub caller_pairs: usize,
    pub interaction_count: u64,
    pub first_contact: DateTime<Utc>,
    pub last_contact: DateTime<Utc>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    CallVolume,
    Trespass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HarassmentPattern {
    pub kind: PatternKind,
    pub suspect_id: SuspectId,
    pub target: Option<PartyRef>,
    pub evidence_count: u64,
    pub severity: Severity,
    pub recommended_action: RecommendedAction,
}

// --- Scope & Batches ---

/// Which investigation a derivation runs over, optionally bounded in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvestigationScope {
    pub investigation_id: InvestigationId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl InvestigationScope {
    pub fn new(investigation_id: InvestigationId) -> Self {
        Self {
            investigation_id,
            from: None,
            to: None,
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Inclusive on both ends.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordError {
    pub index: usize,
    pub key: String,
    pub message: String,
}

/// Counts for a batch where single bad records never abort the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BatchReport {
    pub success: usize,
    pub failures: usize,
    pub errors: Vec<RecordError>,
}

impl BatchReport {
    pub fn record_failure(&mut self, index: usize, key: impl Into<String>, message: impl Into<String>) {
        self.failures += 1;
        self.errors.push(RecordError {
            index,
            key: key.into(),
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MovementBatchReport {
    pub success: usize,
    pub failures: usize,
    pub alerts: Vec<GeofenceAlert>,
    pub errors: Vec<RecordError>,
}
