//! Access to a cluster's own API server.
//!
//! [`ClusterApi`] is the narrow surface the readiness gate, upgrade
//! coordinator and workload runner need. [`ClusterConnector`] turns the
//! kubeconfig handed out by a provider into a connected [`ClusterApi`].

pub mod client;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Node, Pod, Service};

use crate::crd::{ClusterOperator, ClusterVersion, Update};
use crate::error::Result;

pub use client::{KubeClusterApi, KubeConnector};

#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_cluster_version(&self) -> Result<ClusterVersion>;

    /// Merge-patch `spec.desiredUpdate` (and `spec.channel` when given) and
    /// return the updated object with its new generation.
    async fn patch_desired_update(
        &self,
        update: &Update,
        channel: Option<&str>,
    ) -> Result<ClusterVersion>;

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Pods across all namespaces.
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    async fn ensure_namespace(&self, namespace: &str) -> Result<()>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    /// `None` when the Endpoints object does not exist yet.
    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>>;

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String>;

    /// GET `path` on a service port through the API server proxy.
    async fn proxy_get(
        &self,
        namespace: &str,
        service: &str,
        port: u16,
        path: &str,
    ) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>>;
}

/// Build the API server proxy path for a service port.
pub fn service_proxy_path(namespace: &str, service: &str, port: u16, path: &str) -> String {
    format!(
        "/api/v1/namespaces/{}/services/http:{}:{}/proxy/{}",
        namespace,
        service,
        port,
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_proxy_path_root() {
        assert_eq!(
            service_proxy_path("kete", "runner-abcde", 8000, "/"),
            "/api/v1/namespaces/kete/services/http:runner-abcde:8000/proxy/"
        );
    }

    #[test]
    fn test_service_proxy_path_nested() {
        assert_eq!(
            service_proxy_path("kete", "runner", 8000, "reports/junit.xml"),
            "/api/v1/namespaces/kete/services/http:runner:8000/proxy/reports/junit.xml"
        );
    }
}
