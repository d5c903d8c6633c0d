//! Ingestion boundary records.
//!
//! Raw payloads decode strictly into one variant per source kind. Unknown fields
//! are rejected and timestamps are normalized here, so nothing downstream ever
//! sees a property bag or a stringly-typed time.

use serde::{Deserialize, Serialize};

use crate::error::TracewireError;
use crate::geo::Coord;
use crate::time::parse_timestamp;
use crate::types::{
    CallEdge, InvestigationId, InvestigationNode, MovementPing, NetworkRole, PartyRef, Proximity,
    RiskLevel, SuspectId, SuspectNode, TowerId, VictimId, VictimNode,
};

/// Risk given to suspects that arrive without one.
pub const BASELINE_RISK: RiskLevel = RiskLevel::Medium;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestRecord {
    Investigation(InvestigationRecord),
    Suspect(SuspectRecord),
    Victim(VictimRecord),
    Call(CallRecord),
    Ping(PingRecord),
    History(HistoryRecord),
}

impl IngestRecord {
    /// Short label for batch error reporting.
    pub fn key(&self) -> String {
        match self {
            IngestRecord::Investigation(r) => format!("investigation:{}", r.id),
            IngestRecord::Suspect(r) => format!("suspect:{}", r.id),
            IngestRecord::Victim(r) => format!("victim:{}", r.id),
            IngestRecord::Call(r) => format!("call:{}->{}", r.caller, r.receiver),
            IngestRecord::Ping(r) => format!("ping:{}", r.suspect_id),
            IngestRecord::History(r) => format!("history:{}", r.suspect_id),
        }
    }
}

/// Timestamps arrive as text (ISO / naive) or integer epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(i64),
    Text(String),
}

impl RawTimestamp {
    pub fn normalize(&self) -> Result<chrono::DateTime<chrono::Utc>, TracewireError> {
        let parsed = match self {
            RawTimestamp::Epoch(secs) => parse_timestamp(&secs.to_string()),
            RawTimestamp::Text(s) => parse_timestamp(s),
        };
        parsed.ok_or_else(|| TracewireError::Decode(format!("unrecognized timestamp {self:?}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvestigationRecord {
    pub id: InvestigationId,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuspectRecord {
    pub id: SuspectId,
    pub phone: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub investigation_id: Option<InvestigationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VictimRecord {
    pub id: VictimId,
    pub phone: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub investigation_id: Option<InvestigationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallRecord {
    pub caller: SuspectId,
    pub receiver: PartyRef,
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub duration_secs: u32,
    #[serde(default)]
    pub caller_tower: Option<TowerId>,
    #[serde(default)]
    pub receiver_tower: Option<TowerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PingRecord {
    pub suspect_id: SuspectId,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub tower_id: Option<TowerId>,
}

/// Legacy location entry: free-form coordinates, no timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryRecord {
    pub suspect_id: SuspectId,
    pub coordinates: String,
}

/// Decode one raw JSON payload into a typed record.
pub fn decode_record(raw: serde_json::Value) -> Result<IngestRecord, TracewireError> {
    serde_json::from_value(raw).map_err(|e| TracewireError::Decode(e.to_string()))
}

/// Natural key for people: digits only, keeping a leading `+`.
pub fn normalize_phone(raw: &str) -> Result<String, TracewireError> {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));

    let digits = out.trim_start_matches('+').len();
    if !(5..=15).contains(&digits) {
        return Err(TracewireError::Validation(format!(
            "phone number {raw:?} must have 5 to 15 digits"
        )));
    }
    Ok(out)
}

impl InvestigationRecord {
    pub fn into_node(self) -> InvestigationNode {
        InvestigationNode {
            id: self.id,
            title: self.title,
        }
    }
}

impl SuspectRecord {
    pub fn into_node(self) -> Result<SuspectNode, TracewireError> {
        let risk = match self.risk.as_deref() {
            None | Some("") => BASELINE_RISK,
            Some(raw) => RiskLevel::parse(raw)
                .ok_or_else(|| TracewireError::Decode(format!("unknown risk level {raw:?}")))?,
        };
        Ok(SuspectNode {
            phone: normalize_phone(&self.phone)?,
            id: self.id,
            name: self.name,
            risk,
            role: self
                .role
                .as_deref()
                .map(NetworkRole::parse)
                .unwrap_or(NetworkRole::Unknown),
        })
    }
}

impl VictimRecord {
    pub fn into_node(self) -> Result<VictimNode, TracewireError> {
        Ok(VictimNode {
            phone: normalize_phone(&self.phone)?,
            id: self.id,
            name: self.name,
        })
    }
}

impl CallRecord {
    pub fn into_edge(self, proximity: Proximity) -> Result<CallEdge, TracewireError> {
        if let PartyRef::Suspect(receiver) = &self.receiver {
            if *receiver == self.caller {
                return Err(TracewireError::Validation(format!(
                    "suspect {receiver} cannot call themselves"
                )));
            }
        }
        Ok(CallEdge {
            timestamp: self.timestamp.normalize()?,
            caller: self.caller,
            receiver: self.receiver,
            duration_secs: self.duration_secs,
            caller_tower: self.caller_tower,
            receiver_tower: self.receiver_tower,
            proximity,
        })
    }
}

impl PingRecord {
    pub fn into_ping(self) -> Result<MovementPing, TracewireError> {
        if !Coord::new(self.lat, self.lng).is_valid() {
            return Err(TracewireError::Validation(format!(
                "ping coordinates ({}, {}) out of range",
                self.lat, self.lng
            )));
        }
        Ok(MovementPing {
            timestamp: self.timestamp.normalize()?,
            suspect_id: self.suspect_id,
            lat: self.lat,
            lng: self.lng,
            tower_id: self.tower_id,
            zone_hits: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_call_record_with_naive_timestamp() {
        let record = decode_record(json!({
            "kind": "call",
            "caller": "S1",
            "receiver": {"kind": "victim", "id": "V1"},
            "timestamp": "2024-03-01 10:15:00",
            "duration_secs": 42,
            "caller_tower": "T1"
        }))
        .unwrap();

        let IngestRecord::Call(call) = record else {
            panic!("expected call record");
        };
        let edge = call.into_edge(Proximity::Unknown).unwrap();
        assert_eq!(edge.caller.as_str(), "S1");
        assert_eq!(edge.duration_secs, 42);
        assert_eq!(edge.caller_tower.as_ref().map(|t| t.as_str()), Some("T1"));
        assert_eq!(edge.timestamp.to_rfc3339(), "2024-03-01T10:15:00+00:00");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = decode_record(json!({
            "kind": "ping",
            "suspect_id": "S1",
            "lat": 1.0,
            "lng": 2.0,
            "timestamp": 1709287200,
            "mood": "nervous"
        }))
        .unwrap_err();
        assert!(matches!(err, TracewireError::Decode(_)));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(decode_record(json!({"kind": "transaction", "amount": 10})).is_err());
    }

    #[test]
    fn blank_ids_fail_at_decode() {
        assert!(decode_record(json!({"kind": "suspect", "id": " ", "phone": "5550100"})).is_err());
    }

    #[test]
    fn epoch_ping_normalizes() {
        let record = decode_record(json!({
            "kind": "ping",
            "suspect_id": "S1",
            "lat": 28.55,
            "lng": 77.10,
            "timestamp": 1709287200
        }))
        .unwrap();
        let IngestRecord::Ping(ping) = record else {
            panic!("expected ping record");
        };
        let ping = ping.into_ping().unwrap();
        assert_eq!(ping.timestamp.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(ping.zone_hits.is_empty());
    }

    #[test]
    fn out_of_range_ping_is_validation_error() {
        let ping = PingRecord {
            suspect_id: SuspectId::parse("S1").unwrap(),
            lat: 120.0,
            lng: 0.0,
            timestamp: RawTimestamp::Epoch(0),
            tower_id: None,
        };
        assert!(matches!(ping.into_ping(), Err(TracewireError::Validation(_))));
    }

    #[test]
    fn suspect_defaults_to_baseline_risk() {
        let record = SuspectRecord {
            id: SuspectId::parse("S1").unwrap(),
            phone: "+91 98765-43210".to_string(),
            name: "Ravi".to_string(),
            risk: None,
            role: Some("member".to_string()),
            investigation_id: None,
        };
        let node = record.into_node().unwrap();
        assert_eq!(node.risk, RiskLevel::Medium);
        assert_eq!(node.phone, "+919876543210");
        assert_eq!(node.role, NetworkRole::Associate);
    }

    #[test]
    fn suspect_with_unknown_risk_is_rejected() {
        let record = SuspectRecord {
            id: SuspectId::parse("S1").unwrap(),
            phone: "5550100".to_string(),
            name: String::new(),
            risk: Some("extreme".to_string()),
            role: None,
            investigation_id: None,
        };
        assert!(record.into_node().is_err());
    }

    #[test]
    fn phone_normalization_requires_enough_digits() {
        assert_eq!(normalize_phone("(555) 010-0199").unwrap(), "5550100199");
        assert!(normalize_phone("12").is_err());
        assert!(normalize_phone("call me").is_err());
    }

    #[test]
    fn self_call_is_rejected() {
        let call = CallRecord {
            caller: SuspectId::parse("S1").unwrap(),
            receiver: PartyRef::Suspect(SuspectId::parse("S1").unwrap()),
            timestamp: RawTimestamp::Epoch(1709287200),
            duration_secs: 0,
            caller_tower: None,
            receiver_tower: None,
        };
        assert!(call.into_edge(Proximity::Unknown).is_err());
    }

    #[test]
    fn record_keys_name_the_kind() {
        let record = IngestRecord::History(HistoryRecord {
            suspect_id: SuspectId::parse("S9").unwrap(),
            coordinates: "1,2".to_string(),
        });
        assert_eq!(record.key(), "history:S9");
    }
}
