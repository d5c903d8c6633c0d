pub mod client;
pub mod migrate;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use neo4rs::query;
pub use store::InvestigationGraph;
