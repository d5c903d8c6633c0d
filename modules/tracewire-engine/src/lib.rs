pub mod bounded;
pub mod classification;
pub mod convergence;
pub mod geofence;
pub mod ingestion;
pub mod position;
pub mod reference_geo;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod trajectory;

pub use classification::BulkClassifier;
pub use convergence::ConvergenceDetector;
pub use geofence::{GeofenceMonitor, RiskState};
pub use ingestion::Ingestor;
pub use position::PositionResolver;
pub use reference_geo::{GeoReference, ReferenceGeoStore};
pub use traits::{EdgeUpsert, GeoStore, GraphStore, NodeUpsert};
pub use trajectory::TrajectoryBuilder;
