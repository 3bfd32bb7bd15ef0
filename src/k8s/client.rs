//! `kube`-backed [`ClusterApi`] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::AsyncReadExt;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Service};
use kube::Api;
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use serde_json::json;
use tracing::{debug, info};

use super::{ClusterApi, ClusterConnector, service_proxy_path};
use crate::crd::cluster_version::CLUSTER_VERSION_NAME;
use crate::crd::{ClusterOperator, ClusterVersion, Update};
use crate::error::{KeteError, Result};

/// Field manager recorded on patches.
const FIELD_MANAGER: &str = "kete";

#[derive(Clone)]
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Build a client from raw kubeconfig bytes.
    pub async fn from_kubeconfig(kubeconfig: &[u8]) -> Result<Self> {
        let kubeconfig: kube::config::Kubeconfig = serde_yaml::from_slice(kubeconfig)
            .map_err(|e| KeteError::Config(format!("invalid kubeconfig YAML: {e}")))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| KeteError::Config(format!("failed to build kube config: {e}")))?;
        let client = kube::Client::try_from(config)
            .map_err(|e| KeteError::Config(format!("failed to create kube client: {e}")))?;
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        let api: Api<ClusterVersion> = Api::all(self.client.clone());
        api.get(CLUSTER_VERSION_NAME)
            .await
            .map_err(|e| KeteError::kube("k8s::clusterversion", e))
    }

    async fn patch_desired_update(
        &self,
        update: &Update,
        channel: Option<&str>,
    ) -> Result<ClusterVersion> {
        let api: Api<ClusterVersion> = Api::all(self.client.clone());
        let mut spec = json!({ "desiredUpdate": update });
        if let Some(channel) = channel {
            spec["channel"] = json!(channel);
        }
        let patch = json!({ "spec": spec });
        debug!("Patching ClusterVersion: {}", patch);

        api.patch(
            CLUSTER_VERSION_NAME,
            &PatchParams {
                field_manager: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            },
            &Patch::Merge(&patch),
        )
        .await
        .map_err(|e| KeteError::kube("k8s::clusterversion", e))
    }

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>> {
        let api: Api<ClusterOperator> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|l| l.items)
            .map_err(|e| KeteError::kube("k8s::clusteroperators", e))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|l| l.items)
            .map_err(|e| KeteError::kube("k8s::nodes", e))
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|l| l.items)
            .map_err(|e| KeteError::kube("k8s::pods", e))
    }

    async fn ensure_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api
            .get_opt(namespace)
            .await
            .map_err(|e| KeteError::kube("k8s::namespaces", e))?
            .is_some()
        {
            return Ok(());
        }

        let ns: Namespace = serde_json::from_value(json!({
            "metadata": { "name": namespace, "labels": { "app.kubernetes.io/managed-by": "kete" } }
        }))
        .map_err(|e| KeteError::KubernetesApi(format!("invalid namespace object: {e}")))?;

        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!("Created namespace {}", namespace);
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(KeteError::kube("k8s::namespaces", e)),
        }
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| KeteError::kube("k8s::pods", e))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| KeteError::kube("k8s::pods", e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self.pods(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(KeteError::kube("k8s::pods", e)),
        }
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service> {
        self.services(namespace)
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| KeteError::kube("k8s::services", e))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .services(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(KeteError::kube("k8s::services", e)),
        }
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| KeteError::kube("k8s::endpoints", e))
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let params = LogParams {
            container: Some(container.to_string()),
            ..Default::default()
        };
        self.pods(namespace)
            .logs(pod, &params)
            .await
            .map_err(|e| KeteError::kube("k8s::logs", e))
    }

    async fn proxy_get(
        &self,
        namespace: &str,
        service: &str,
        port: u16,
        path: &str,
    ) -> Result<Vec<u8>> {
        let uri = service_proxy_path(namespace, service, port, path);
        let request = http::Request::get(&uri)
            .body(Vec::new())
            .map_err(|e| KeteError::KubernetesApi(format!("invalid proxy request {uri}: {e}")))?;

        let stream = self
            .client
            .request_stream(request)
            .await
            .map_err(|e| KeteError::kube("k8s::proxy", e))?;
        let mut reader = std::pin::pin!(stream);
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .await
            .map_err(|e| KeteError::TransientApi("k8s::proxy".into(), e.to_string()))?;
        Ok(body)
    }
}

/// Connects to clusters with kubeconfig bytes handed out by a provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        let api = KubeClusterApi::from_kubeconfig(kubeconfig).await?;
        debug!("Connected to cluster API server");
        Ok(Arc::new(api))
    }
}
