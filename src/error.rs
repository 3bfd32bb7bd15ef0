//! Custom error types for kete.

use thiserror::Error;

/// Errors that can occur while driving a cluster through its test lifecycle.
#[derive(Error, Debug)]
pub enum KeteError {
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("[{0}] {1}")]
    TransientApi(String, String),

    #[error("Cluster entered a terminal state: {0}")]
    TerminalCluster(String),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Timeout waiting for {operation}: {details}")]
    Timeout { operation: String, details: String },

    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("Result retrieval failed: {0}")]
    ResultRetrieval(String),

    #[error("Workload failed: {0}")]
    Workload(String),

    #[error("Upgrade already in progress: {0}")]
    UpgradeInProgress(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Report error: {0}")]
    Report(String),
}

/// Coarse classification used by the orchestrator and retry helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Quota,
    Transient,
    Api,
    Terminal,
    Provider,
    Timeout,
    Cancelled,
    ResultRetrieval,
    Workload,
    Upgrade,
    Config,
    Report,
}

pub type Result<T> = std::result::Result<T, KeteError>;

impl KeteError {
    /// Classify a `kube::Error` raised by `component`.
    ///
    /// Conflicts, throttling, server errors and transport failures are
    /// transient. A 404 maps to `NotFound`.
    pub fn kube(component: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(format!("[{component}] {err}")),
            kube::Error::Api(ae) if ae.code == 409 || ae.code == 429 || ae.code >= 500 => {
                Self::TransientApi(component.to_string(), err.to_string())
            }
            kube::Error::Api(_) => Self::KubernetesApi(format!("[{component}] {err}")),
            _ => Self::TransientApi(component.to_string(), err.to_string()),
        }
    }

    pub fn timeout(operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::QuotaExhausted(_) => ErrorKind::Quota,
            Self::TransientApi(_, _) => ErrorKind::Transient,
            Self::KubernetesApi(_) => ErrorKind::Api,
            Self::TerminalCluster(_) => ErrorKind::Terminal,
            Self::ClusterNotFound(_) | Self::Provider(_) | Self::NotFound(_) => ErrorKind::Provider,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ResultRetrieval(_) => ErrorKind::ResultRetrieval,
            Self::Workload(_) => ErrorKind::Workload,
            Self::UpgradeInProgress(_) => ErrorKind::Upgrade,
            Self::InvalidVersion(_) | Self::Config(_) => ErrorKind::Config,
            Self::Report(_) => ErrorKind::Report,
        }
    }

    /// Returns true if this error is transient and should be retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Returns true for caller-initiated cancellation, which is not a failure.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ClusterNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_quota() {
        let err = KeteError::QuotaExhausted("no capacity for aws".to_string());
        assert_eq!(err.to_string(), "Quota exhausted: no capacity for aws");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = KeteError::timeout("cluster readiness", "2 pods pending");
        assert_eq!(
            err.to_string(),
            "Timeout waiting for cluster readiness: 2 pods pending"
        );
    }

    #[test]
    fn test_error_display_transient() {
        let err = KeteError::TransientApi("provider::mock".into(), "throttled".into());
        assert_eq!(err.to_string(), "[provider::mock] throttled");
    }

    #[test]
    fn test_is_transient() {
        assert!(KeteError::TransientApi("x".into(), "y".into()).is_transient());
        assert!(!KeteError::KubernetesApi("z".into()).is_transient());
        assert!(!KeteError::TerminalCluster("x".into()).is_transient());
        assert!(!KeteError::QuotaExhausted("x".into()).is_transient());
        assert!(!KeteError::timeout("a", "b").is_transient());
    }

    #[test]
    fn test_cancelled_is_distinct_from_timeout() {
        let cancelled = KeteError::Cancelled("pod running".into());
        let timed_out = KeteError::timeout("pod running", "pending");
        assert!(cancelled.is_cancelled());
        assert!(!timed_out.is_cancelled());
        assert_ne!(cancelled.kind(), timed_out.kind());
    }

    #[test]
    fn test_kube_transport_error_is_transient() {
        let err = KeteError::kube("k8s::pods", kube::Error::Service("connection reset".into()));
        assert!(err.is_transient());
    }
}
