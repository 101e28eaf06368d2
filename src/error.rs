//! Error types for the snapshotter operator

use std::time::Duration;

use thiserror::Error;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug, Error)]
pub enum Error {
    /// Cluster access configuration could not be resolved
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A typed client could not be built from a valid configuration
    #[error("Client construction error: {0}")]
    ClientConstructionError(String),

    /// Client construction produced no handle and no error
    #[error("Kubernetes API account is not configured")]
    AccountNotConfiguredError,

    /// Capability probe against the API server failed
    #[error("Capability probe error: {0}")]
    ProbeError(String),

    /// Custom resource definition could not be registered
    #[error("Schema registration error: {0}")]
    SchemaRegistrationError(String),

    /// The registered resource type did not become queryable in time
    #[error("Timed out after {timeout:?} waiting for {resource} to become available")]
    ReadinessTimeoutError { resource: String, timeout: Duration },

    /// Another bootstrap attempt holds the lifecycle guard
    #[error("Snapshotter bootstrap is already in progress")]
    AlreadyAttemptingError,

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    /// Snapshot plugin error
    #[error("Driver error: {0}")]
    DriverError(String),

    /// Reconciliation loop error
    #[error("Controller error: {0}")]
    ControllerError(String),

    /// Finalizer error
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}
