//! Error types for the Tideway operator

use thiserror::Error;

use crate::controller::managed::ManagedKind;
use crate::controller::store::StoreError;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure reported by a single generator family
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Object store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Resource family {family} has no generator registered for {kind}")]
    UnsupportedKind { family: String, kind: ManagedKind },

    #[error("Generator family {family} failed: {source}")]
    Generation {
        family: String,
        #[source]
        source: GenerationError,
    },

    #[error("Discovery of owned resources failed: {0}")]
    DiscoveryError(String),

    #[error("{count} resource(s) failed to sync, first error: {first}")]
    SyncError { count: usize, first: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}

impl Error {
    /// Whether the error is likely to clear up on its own after a short wait
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::DiscoveryError(_) | Error::SyncError { .. } => true,
            Error::StoreError(e) => e.is_retriable(),
            Error::FinalizerError(inner) => match inner.as_ref() {
                kube::runtime::finalizer::Error::ApplyFailed(e)
                | kube::runtime::finalizer::Error::CleanupFailed(e) => e.is_retriable(),
                _ => true,
            },
            _ => false,
        }
    }

    /// Short error category used as a metric label
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::StoreError(_) => "store",
            Error::UnsupportedKind { .. } => "unsupported_kind",
            Error::Generation { .. } => "generation",
            Error::DiscoveryError(_) => "discovery",
            Error::SyncError { .. } => "sync",
            Error::SerializationError(_) => "serialization",
            Error::ConfigError(_) => "config",
            Error::ValidationError(_) => "validation",
            Error::MissingObjectKey(_) => "missing_key",
            Error::FinalizerError(_) => "finalizer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_names_family() {
        let err = Error::Generation {
            family: "certificate".to_string(),
            source: GenerationError::new("hostname is empty"),
        };
        assert_eq!(
            err.to_string(),
            "Generator family certificate failed: hostname is empty"
        );
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_unsupported_kind_is_not_retriable() {
        let err = Error::UnsupportedKind {
            family: "deployment".to_string(),
            kind: ManagedKind::Routing,
        };
        assert!(err.to_string().contains("deployment"));
        assert!(err.to_string().contains("Routing"));
        assert!(!err.is_retriable());
        assert_eq!(err.metric_label(), "unsupported_kind");
    }

    #[test]
    fn test_sync_error_is_retriable() {
        let err = Error::SyncError {
            count: 2,
            first: "Deployment default/api: conflict".to_string(),
        };
        assert!(err.is_retriable());
        assert!(err.to_string().starts_with("2 resource(s)"));
    }
}
