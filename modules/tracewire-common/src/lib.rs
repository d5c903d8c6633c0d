pub mod config;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod thresholds;
pub mod time;
pub mod types;

pub use config::Config;
pub use error::TracewireError;
pub use geo::*;
pub use thresholds::*;
pub use time::*;
pub use types::*;
