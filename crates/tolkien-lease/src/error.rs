use thiserror::Error;

/// Failures reported by [`PoolStore`](crate::PoolStore) and
/// [`TombstoneStore`](crate::TombstoneStore) backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("KV read failed: {0}")]
    Read(String),

    #[error("KV write failed: {0}")]
    Write(String),

    /// The record changed (or vanished) since the revision the caller observed.
    #[error("revision conflict on token '{token}'")]
    Conflict { token: String },

    #[error("corrupt record: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Errors returned by [`LeaseCoordinator`](crate::LeaseCoordinator) operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("serviceID is required")]
    MissingServiceId,

    #[error("no token available")]
    NoTokenAvailable,

    #[error("no active lease for service '{service_id}'")]
    LeaseNotFound { service_id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaseError {
    /// `true` for errors caused by the request itself rather than the store.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}

/// Invalid lease or token configuration, detected before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("token alphabet must not be empty")]
    EmptyAlphabet,

    #[error("token length must be at least 1")]
    ZeroTokenLength,

    #[error("pool size must be at least 1")]
    ZeroPoolSize,

    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}
