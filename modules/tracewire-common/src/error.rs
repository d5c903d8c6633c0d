use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracewireError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store timeout: {store} did not answer {operation} in time")]
    StoreTimeout {
        store: &'static str,
        operation: &'static str,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown suspect: {0}")]
    UnknownSuspect(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TracewireError {
    /// Timeouts degrade to partial results; everything else fails the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TracewireError::StoreTimeout { .. })
    }

    pub fn store(store: &'static str, err: anyhow::Error) -> Self {
        TracewireError::StoreUnavailable(format!("{store}: {err:#}"))
    }
}
