use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tracewire_common::ingest::BASELINE_RISK;
use tracewire_common::{
    parse_timestamp, Config, InvestigationId, InvestigationScope, MovementPing, PartyRef,
    SuspectId, TracewireError, VictimId,
};
use tracewire_engine::trajectory::dwell_cells;
use tracewire_engine::{
    BulkClassifier, ConvergenceDetector, GeoReference, GeoStore, GeofenceMonitor, GraphStore,
    Ingestor, PositionResolver, ReferenceGeoStore, RiskState, TrajectoryBuilder,
};
use tracewire_graph::{migrate::migrate, GraphClient, InvestigationGraph};

#[derive(Parser)]
#[command(name = "tracewire", about = "Graph and geospatial correlation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create graph constraints and indexes
    Migrate,
    /// Estimate a suspect's position from the towers the graph links to them
    Position {
        #[arg(long)]
        suspect: String,
    },
    /// Ordered movement trajectory for a suspect
    Trajectory {
        #[arg(long)]
        suspect: String,
        #[arg(long)]
        investigation: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        /// Also summarise points per geohash cell at this precision
        #[arg(long)]
        dwell_precision: Option<usize>,
    },
    /// Towers where two or more suspects reach the same receiver
    Convergence {
        #[arg(long)]
        investigation: String,
        /// Restrict to one victim id
        #[arg(long)]
        victim: Option<String>,
    },
    /// Ranked call-volume and trespass patterns
    Patterns {
        #[arg(long)]
        investigation: String,
    },
    /// Feed a JSON array of movement pings through the geofence monitor
    IngestMovement {
        #[arg(long)]
        file: PathBuf,
    },
    /// Ingest a JSON array of tagged records
    Ingest {
        #[arg(long)]
        file: PathBuf,
    },
    /// Reclassify suspect risk from call volume
    Classify {
        #[arg(long)]
        investigation: String,
    },
    /// Geofence audit log and the risk history replayed from it
    Alerts {
        #[arg(long)]
        suspect: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tracewire=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_redacted();

    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;

    if let Command::Migrate = cli.command {
        migrate(&client).await?;
        info!("Migrations complete");
        return Ok(());
    }

    let graph: Arc<dyn GraphStore> = Arc::new(InvestigationGraph::new(client));
    let geo: Arc<dyn GeoStore> = Arc::new(match &config.geo_reference_path {
        Some(path) => ReferenceGeoStore::load(path)?,
        None => {
            warn!("GEO_REFERENCE_PATH not set, every tower will be phantom");
            ReferenceGeoStore::new(GeoReference::default())
        }
    });

    match cli.command {
        Command::Migrate => {}
        Command::Position { suspect } => {
            let resolver = PositionResolver::new(graph, geo, config);
            let outcome = resolver
                .resolve_suspect_position(&SuspectId::parse(suspect)?)
                .await?;
            print_json(&outcome)?;
        }
        Command::Trajectory {
            suspect,
            investigation,
            from,
            to,
            dwell_precision,
        } => {
            let scope = scope_for(&investigation, from.as_deref(), to.as_deref())?;
            let builder = TrajectoryBuilder::new(graph, geo, config);
            let trajectory = builder.build(&SuspectId::parse(suspect)?, &scope).await?;
            match dwell_precision {
                Some(precision) => print_json(&serde_json::json!({
                    "trajectory": trajectory,
                    "dwell_cells": dwell_cells(&trajectory, precision),
                }))?,
                None => print_json(&trajectory)?,
            }
        }
        Command::Convergence {
            investigation,
            victim,
        } => {
            let scope = scope_for(&investigation, None, None)?;
            let detector = ConvergenceDetector::new(graph, config);
            let points = match victim {
                Some(v) => {
                    let victim = PartyRef::Victim(VictimId::parse(v)?);
                    detector.find_convergence_for_victim(&scope, &victim).await?
                }
                None => detector.find_convergence_points(&scope).await?,
            };
            print_json(&points)?;
        }
        Command::Patterns { investigation } => {
            let scope = scope_for(&investigation, None, None)?;
            let detector = ConvergenceDetector::new(graph, config);
            print_json(&detector.detect_harassment_patterns(&scope).await?)?;
        }
        Command::IngestMovement { file } => {
            let pings: Vec<MovementPing> = read_json(&file)?;
            let monitor = GeofenceMonitor::new(graph, geo, config);
            print_json(&monitor.ingest_batch(pings).await?)?;
        }
        Command::Ingest { file } => {
            let raw: Vec<serde_json::Value> = read_json(&file)?;
            let ingestor = Ingestor::new(graph, geo, config);
            print_json(&ingestor.ingest_raw(raw).await?)?;
        }
        Command::Classify { investigation } => {
            let scope = scope_for(&investigation, None, None)?;
            let classifier = BulkClassifier::new(graph, config);
            print_json(&classifier.classify(&scope).await?)?;
        }
        Command::Alerts { suspect } => {
            let suspect = SuspectId::parse(suspect)?;
            let alerts = graph.find_alerts(&suspect).await?;
            let initial = alerts
                .first()
                .map(|a| a.previous_risk)
                .unwrap_or(BASELINE_RISK);
            let state = RiskState::replay(initial, &alerts);
            print_json(&serde_json::json!({
                "alerts": alerts,
                "risk": state,
            }))?;
        }
    }

    Ok(())
}

fn scope_for(investigation: &str, from: Option<&str>, to: Option<&str>) -> Result<InvestigationScope> {
    let mut scope = InvestigationScope::new(InvestigationId::parse(investigation)?);
    scope.from = from.map(parse_bound).transpose()?;
    scope.to = to.map(parse_bound).transpose()?;
    Ok(scope)
}

fn parse_bound(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, TracewireError> {
    parse_timestamp(raw)
        .ok_or_else(|| TracewireError::Validation(format!("unrecognized timestamp {raw:?}")))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("cannot decode {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
