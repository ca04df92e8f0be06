//! Error types for the load balancer controller

use thiserror::Error;

use crate::cloud::CloudError;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Naver Cloud API error
    #[error("Cloud API error: {0}")]
    Cloud(#[from] CloudError),

    /// Credentials could not be obtained from any configured source
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// Invalid controller configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Load balancer exists but is not serving yet
    #[error("Load balancer not ready: {0}")]
    NotReady(String),

    /// Load balancer reported a terminal error status
    #[error("Load balancer failed: {0}")]
    LoadBalancerFailed(String),

    /// No target of a registration batch could be confirmed
    #[error("Target registration failed for target group {target_group}: {unconfirmed} of {attempted} target(s) unconfirmed")]
    RegistrationFailed {
        target_group: String,
        attempted: usize,
        unconfirmed: usize,
    },

    /// Teardown aborted before every cloud resource was released
    #[error("Teardown failed: {0}")]
    Teardown(#[source] Box<Error>),

    /// Some target groups survived teardown and must be retried
    #[error("Teardown incomplete, target group(s) not deleted: {}", remaining.join(","))]
    PartialTeardown { remaining: Vec<String> },

    /// Every candidate name is held by a resource serving something else
    #[error("Name conflict: {0}")]
    NameConflict(String),

    /// Persisted annotation state could not be decoded
    #[error("Invalid persisted state: {0}")]
    InvalidState(String),

    /// The reconcile was cancelled or ran past its deadline
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP error outside the cloud gateway (credential backends)
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error is expected to clear up on its own
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 409 || resp.code >= 500,
            Error::KubeError(_) => true,
            Error::Cloud(e) => e.is_transient(),
            Error::Teardown(inner) => inner.is_retriable(),
            Error::NotReady(_)
            | Error::PartialTeardown { .. }
            | Error::HttpError(_)
            | Error::Cancelled => true,
            Error::CredentialError(_)
            | Error::ConfigError(_)
            | Error::LoadBalancerFailed(_)
            | Error::RegistrationFailed { .. }
            | Error::NameConflict(_)
            | Error::InvalidState(_)
            | Error::SerializationError(_) => false,
        }
    }

    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::Cloud(_) => "cloud",
            Error::CredentialError(_) => "credentials",
            Error::ConfigError(_) => "config",
            Error::NotReady(_) => "not_ready",
            Error::LoadBalancerFailed(_) => "lb_failed",
            Error::RegistrationFailed { .. } => "registration",
            Error::Teardown(_) | Error::PartialTeardown { .. } => "teardown",
            Error::NameConflict(_) => "name_conflict",
            Error::InvalidState(_) => "state",
            Error::Cancelled => "cancelled",
            Error::SerializationError(_) => "serialization",
            Error::HttpError(_) => "http",
        }
    }

    /// Raised while releasing cloud resources rather than provisioning them
    pub fn is_teardown(&self) -> bool {
        matches!(self, Error::Teardown(_) | Error::PartialTeardown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_teardown_lists_remaining() {
        let err = Error::PartialTeardown {
            remaining: vec!["tg-1".to_string(), "tg-2".to_string()],
        };
        assert!(err.to_string().contains("tg-1,tg-2"));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_config_errors_are_not_retriable() {
        assert!(!Error::ConfigError("missing subnet".into()).is_retriable());
        assert_eq!(Error::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_teardown_wrapper_keeps_inner_classification() {
        let err = Error::Teardown(Box::new(Error::NotReady("lb busy".into())));
        assert!(err.is_teardown());
        assert!(err.is_retriable());
        assert!(err.to_string().contains("lb busy"));
        assert!(!Error::InvalidState("x".into()).is_teardown());
    }
}
