use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use tracewire_common::{
    BatchReport, CallEdge, Config, InvestigationScope, RiskLevel, SuspectId, TracewireError,
};

use crate::bounded::{bounded, GRAPH};
use crate::geofence::RiskState;
use crate::traits::GraphStore;

/// Rule-based risk from outbound call volume, applied to every suspect in an
/// investigation. CRITICAL suspects are left alone.
pub struct BulkClassifier {
    graph: Arc<dyn GraphStore>,
    config: Config,
}

impl BulkClassifier {
    pub fn new(graph: Arc<dyn GraphStore>, config: Config) -> Self {
        Self { graph, config }
    }

    pub async fn classify(&self, scope: &InvestigationScope) -> Result<BatchReport, TracewireError> {
        let limit = self.config.store_timeout;
        let (suspects, edges) = tokio::try_join!(
            bounded(GRAPH, "list_suspects", limit, self.graph.list_suspects(&scope.investigation_id)),
            bounded(GRAPH, "find_call_edges", limit, self.graph.find_call_edges(scope)),
        )?;
        let outbound = outbound_counts(&edges);

        let mut report = BatchReport::default();
        let mut changed = 0usize;
        let mut skipped = 0usize;
        for (index, suspect) in suspects.iter().enumerate() {
            let calls = outbound.get(&suspect.id).copied().unwrap_or(0);
            let level = self.config.thresholds.classification_risk(calls);

            if suspect.risk == RiskLevel::Critical {
                skipped += 1;
                report.success += 1;
                continue;
            }
            let mut state = RiskState::new(suspect.risk);
            if !state.apply_classification(level, Utc::now()) {
                report.success += 1;
                continue;
            }

            // The store re-checks CRITICAL at write time: a breach may have
            // landed since the suspect list was read.
            match bounded(
                GRAPH,
                "set_risk_unless_critical",
                limit,
                self.graph.set_risk_unless_critical(&suspect.id, state.current()),
            )
            .await
            {
                Ok(false) => {
                    debug!(
                        suspect = suspect.id.as_str(),
                        "Escalated to CRITICAL during classification, left as is"
                    );
                    skipped += 1;
                    report.success += 1;
                }
                Ok(true) => {
                    debug!(
                        suspect = suspect.id.as_str(),
                        calls,
                        from = suspect.risk.as_str(),
                        to = state.current().as_str(),
                        "Risk reclassified"
                    );
                    changed += 1;
                    report.success += 1;
                }
                Err(e) => {
                    warn!(suspect = suspect.id.as_str(), error = %e, "Risk update failed");
                    report.record_failure(index, suspect.id.to_string(), e.to_string());
                }
            }
        }

        info!(
            investigation = scope.investigation_id.as_str(),
            suspects = suspects.len(),
            changed,
            skipped_critical = skipped,
            failures = report.failures,
            "Bulk classification complete"
        );
        Ok(report)
    }
}

fn outbound_counts(edges: &[CallEdge]) -> HashMap<SuspectId, u64> {
    let mut counts = HashMap::new();
    for edge in edges {
        *counts.entry(edge.caller.clone()).or_insert(0) += 1;
    }
    counts
}
