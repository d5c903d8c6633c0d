//! Neo4j test fixtures backed by testcontainers.

use testcontainers::{
    core::{ContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use crate::{migrate::migrate, query, GraphClient, InvestigationGraph};

const BOLT_PORT: u16 = 7687;
const TEST_PASSWORD: &str = "tracewire-test";

/// Start a Neo4j community container and connect to it with the schema applied.
///
/// Hold the returned container for the whole test: dropping it stops Neo4j.
pub async fn neo4j_container() -> (ContainerAsync<GenericImage>, GraphClient) {
    let container = GenericImage::new("neo4j", "5.25.1")
        .with_exposed_port(ContainerPort::Tcp(BOLT_PORT))
        .with_wait_for(WaitFor::message_on_stdout("Started."))
        .with_env_var("NEO4J_AUTH", format!("neo4j/{TEST_PASSWORD}"))
        .start()
        .await
        .expect("Neo4j container should start");

    let port = container
        .get_host_port_ipv4(BOLT_PORT)
        .await
        .expect("bolt port should be mapped");

    let client = GraphClient::connect(&format!("bolt://127.0.0.1:{port}"), "neo4j", TEST_PASSWORD)
        .await
        .expect("Neo4j should accept connections");
    migrate(&client).await.expect("schema migration");

    (container, client)
}

/// Same as [`neo4j_container`], wrapped in the investigation store.
pub async fn investigation_graph() -> (ContainerAsync<GenericImage>, InvestigationGraph) {
    let (container, client) = neo4j_container().await;
    (container, InvestigationGraph::new(client))
}

/// Remove every node and relationship, keeping constraints.
pub async fn clear(client: &GraphClient) {
    client
        .inner()
        .run(query("MATCH (n) DETACH DELETE n"))
        .await
        .expect("graph cleared");
}
