use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Run idempotent schema migrations: natural-key constraints and lookup indexes.
/// Constraints back the MERGE-by-natural-key writes, so replays never duplicate nodes.
/// People merge on phone but are read by id, so both are unique: a known id
/// arriving with a new phone is rejected instead of forking the node.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT investigation_id IF NOT EXISTS FOR (n:Investigation) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT suspect_phone IF NOT EXISTS FOR (n:Suspect) REQUIRE n.phone IS UNIQUE",
        "CREATE CONSTRAINT suspect_id IF NOT EXISTS FOR (n:Suspect) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT victim_phone IF NOT EXISTS FOR (n:Victim) REQUIRE n.phone IS UNIQUE",
        "CREATE CONSTRAINT victim_id IF NOT EXISTS FOR (n:Victim) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT ping_key IF NOT EXISTS FOR (n:Ping) REQUIRE n.key IS UNIQUE",
        "CREATE CONSTRAINT alert_id IF NOT EXISTS FOR (n:GeofenceAlert) REQUIRE n.id IS UNIQUE",
    ];

    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Natural-key constraints created");

    let indexes = [
        "CREATE INDEX ping_at IF NOT EXISTS FOR (n:Ping) ON (n.at)",
        "CREATE INDEX alert_suspect IF NOT EXISTS FOR (n:GeofenceAlert) ON (n.suspect_id)",
    ];

    for i in &indexes {
        run_ignoring_exists(g, i).await?;
    }
    info!("Lookup indexes created");

    Ok(())
}

async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
