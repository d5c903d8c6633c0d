use std::future::Future;
use std::time::Duration;

use tracewire_common::TracewireError;

pub const GRAPH: &str = "graph";
pub const GEO: &str = "geo";

/// Run one store call under a deadline. Elapsed deadlines become `StoreTimeout`
/// (recoverable); store errors become `StoreUnavailable`.
pub async fn bounded<T>(
    store: &'static str,
    operation: &'static str,
    limit: Duration,
    call: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, TracewireError> {
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TracewireError::store(store, err)),
        Err(_) => Err(TracewireError::StoreTimeout { store, operation }),
    }
}
