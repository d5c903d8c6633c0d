use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::TracewireError;
use crate::thresholds::{ScoringThresholds, DEFAULT_COVERAGE_KM, DEGRADED_ACCURACY_METERS};

const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    /// Bound applied to every graph or geo store call.
    pub store_timeout: Duration,
    pub default_coverage_km: f64,
    pub degraded_accuracy_meters: f64,

    /// JSON document with towers and restricted zones.
    pub geo_reference_path: Option<String>,

    pub thresholds: ScoringThresholds,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, TracewireError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TracewireError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TracewireError::Config(format!("{key} environment variable is required")))
        };

        Ok(Self {
            neo4j_uri: required("NEO4J_URI")?,
            neo4j_user: required("NEO4J_USER")?,
            neo4j_password: required("NEO4J_PASSWORD")?,
            store_timeout: Duration::from_millis(parsed(
                &lookup,
                "STORE_TIMEOUT_MS",
                DEFAULT_STORE_TIMEOUT_MS,
            )?),
            default_coverage_km: parsed(&lookup, "DEFAULT_COVERAGE_KM", DEFAULT_COVERAGE_KM)?,
            degraded_accuracy_meters: parsed(
                &lookup,
                "DEGRADED_ACCURACY_METERS",
                DEGRADED_ACCURACY_METERS,
            )?,
            geo_reference_path: lookup("GEO_REFERENCE_PATH").filter(|v| !v.is_empty()),
            thresholds: ScoringThresholds::default(),
        })
    }

    /// Config for in-process use without a graph connection (tests, embedding).
    pub fn offline() -> Self {
        Self {
            neo4j_uri: String::new(),
            neo4j_user: String::new(),
            neo4j_password: String::new(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            default_coverage_km: DEFAULT_COVERAGE_KM,
            degraded_accuracy_meters: DEGRADED_ACCURACY_METERS,
            geo_reference_path: None,
            thresholds: ScoringThresholds::default(),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            store_timeout_ms = self.store_timeout.as_millis() as u64,
            default_coverage_km = self.default_coverage_km,
            degraded_accuracy_meters = self.degraded_accuracy_meters,
            geo_reference_path = self.geo_reference_path.as_deref().unwrap_or("-"),
            "Config loaded"
        );
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, TracewireError> {
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| TracewireError::Config(format!("{key} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 3] = [
        ("NEO4J_URI", "bolt://localhost:7687"),
        ("NEO4J_USER", "neo4j"),
        ("NEO4J_PASSWORD", "secret"),
    ];

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = Config::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.store_timeout, Duration::from_millis(2000));
        assert_eq!(config.default_coverage_km, 2.0);
        assert_eq!(config.degraded_accuracy_meters, 5000.0);
        assert!(config.geo_reference_path.is_none());
        assert_eq!(config.thresholds, ScoringThresholds::default());
    }

    #[test]
    fn missing_required_var_is_config_error() {
        let err = Config::from_lookup(lookup(&BASE[..2])).unwrap_err();
        assert!(matches!(err, TracewireError::Config(msg) if msg.contains("NEO4J_PASSWORD")));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut pairs = BASE.to_vec();
        pairs.push(("STORE_TIMEOUT_MS", "250"));
        pairs.push(("DEFAULT_COVERAGE_KM", "3.5"));
        pairs.push(("GEO_REFERENCE_PATH", "/data/geo.json"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.default_coverage_km, 3.5);
        assert_eq!(config.geo_reference_path.as_deref(), Some("/data/geo.json"));
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("STORE_TIMEOUT_MS", "soon"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }
}
