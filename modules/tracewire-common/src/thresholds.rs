use serde::{Deserialize, Serialize};

use crate::types::{RecommendedAction, RiskLevel, Severity};

// --- Convergence (total interactions at a shared tower) ---
pub const CONVERGENCE_CRITICAL_INTERACTIONS: u64 = 50;
pub const CONVERGENCE_HIGH_INTERACTIONS: u64 = 20;
pub const CONVERGENCE_MEDIUM_INTERACTIONS: u64 = 10;
/// Distinct callers needed at one tower+victim pair.
pub const CONVERGENCE_MIN_CALLERS: usize = 2;

// --- Call volume (repeated contacts between one caller and one receiver) ---
pub const CALL_VOLUME_CRITICAL: u64 = 30;
pub const CALL_VOLUME_HIGH: u64 = 15;
pub const CALL_VOLUME_MEDIUM: u64 = 8;
pub const MIN_REPEATED_CONTACTS: u64 = 2;

// --- Trespass (geofence breaches by one suspect) ---
pub const TRESPASS_CRITICAL_BREACHES: u64 = 5;

// --- Position & trajectory ---
pub const DEFAULT_COVERAGE_KM: f64 = 2.0;
pub const DEGRADED_ACCURACY_METERS: f64 = 5000.0;

/// Step-function thresholds for every rule-based score in the engine.
/// Each comparison is strictly greater-than.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringThresholds {
    pub convergence_critical: u64,
    pub convergence_high: u64,
    pub convergence_medium: u64,
    pub convergence_min_callers: usize,
    pub call_volume_critical: u64,
    pub call_volume_high: u64,
    pub call_volume_medium: u64,
    pub min_repeated_contacts: u64,
    pub trespass_critical: u64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            convergence_critical: CONVERGENCE_CRITICAL_INTERACTIONS,
            convergence_high: CONVERGENCE_HIGH_INTERACTIONS,
            convergence_medium: CONVERGENCE_MEDIUM_INTERACTIONS,
            convergence_min_callers: CONVERGENCE_MIN_CALLERS,
            call_volume_critical: CALL_VOLUME_CRITICAL,
            call_volume_high: CALL_VOLUME_HIGH,
            call_volume_medium: CALL_VOLUME_MEDIUM,
            min_repeated_contacts: MIN_REPEATED_CONTACTS,
            trespass_critical: TRESPASS_CRITICAL_BREACHES,
        }
    }
}

impl ScoringThresholds {
    pub fn convergence_severity(&self, interactions: u64) -> Severity {
        if interactions > self.convergence_critical {
            Severity::Critical
        } else if interactions > self.convergence_high {
            Severity::High
        } else if interactions > self.convergence_medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn call_volume_tier(&self, calls: u64) -> (Severity, RecommendedAction) {
        if calls > self.call_volume_critical {
            (Severity::Critical, RecommendedAction::ImmediateArrest)
        } else if calls > self.call_volume_high {
            (Severity::High, RecommendedAction::UrgentInvestigation)
        } else if calls > self.call_volume_medium {
            (Severity::Medium, RecommendedAction::HeightenedSurveillance)
        } else {
            (Severity::Low, RecommendedAction::Monitor)
        }
    }

    pub fn trespass_tier(&self, breaches: u64) -> (Severity, RecommendedAction) {
        let severity = if breaches > self.trespass_critical {
            Severity::Critical
        } else {
            Severity::High
        };
        (severity, RecommendedAction::InterceptImmediately)
    }

    /// Risk assigned by bulk classification from a suspect's outbound call volume.
    /// Never CRITICAL: that level belongs to geofence escalation.
    pub fn classification_risk(&self, outbound_calls: u64) -> RiskLevel {
        if outbound_calls > self.call_volume_critical {
            RiskLevel::High
        } else if outbound_calls > self.call_volume_high {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}
