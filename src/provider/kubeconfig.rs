//! Provider that attaches to an existing cluster through a kubeconfig file.
//!
//! The cluster ID is the kubeconfig context name. Clusters are never created
//! or deleted; the control plane state is always reported as `ready` and the
//! readiness gate's in-cluster checks decide health.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{info, warn};

use super::Provider;
use crate::cluster::{Cluster, ClusterState};
use crate::error::{KeteError, Result};
use crate::version::VersionList;

pub struct KubeconfigProvider {
    path: PathBuf,
    environment: String,
}

impl KubeconfigProvider {
    pub fn new(path: PathBuf, environment: &str) -> Self {
        Self {
            path,
            environment: environment.to_string(),
        }
    }

    async fn read(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            KeteError::Provider(format!(
                "Failed to read kubeconfig {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    async fn contexts(&self) -> Result<(Vec<String>, Option<String>)> {
        let raw = self.read().await?;
        let kubeconfig: kube::config::Kubeconfig = serde_yaml::from_slice(&raw)
            .map_err(|e| KeteError::Provider(format!("invalid kubeconfig YAML: {e}")))?;
        let names = kubeconfig.contexts.into_iter().map(|c| c.name).collect();
        Ok((names, kubeconfig.current_context))
    }
}

#[async_trait]
impl Provider for KubeconfigProvider {
    async fn launch_cluster(&self, name: &str, _version: &str) -> Result<String> {
        Err(KeteError::Provider(format!(
            "kubeconfig provider cannot create cluster {name}; pass --cluster-id with a context name"
        )))
    }

    async fn get_cluster(&self, id: &str) -> Result<Cluster> {
        let (contexts, current) = self.contexts().await?;
        let name = if id == "current" {
            current.ok_or_else(|| KeteError::ClusterNotFound("no current-context".into()))?
        } else if contexts.iter().any(|c| c == id) {
            id.to_string()
        } else {
            return Err(KeteError::ClusterNotFound(id.to_string()));
        };

        Ok(Cluster {
            id: id.to_string(),
            name,
            version: "unknown".into(),
            state: ClusterState::Ready,
            cloud_provider: "external".into(),
            region: String::new(),
            addons: vec![],
        })
    }

    async fn cluster_kubeconfig(&self, id: &str) -> Result<Vec<u8>> {
        if id == "current" {
            return self.read().await;
        }

        // Re-serialize with the requested context selected.
        let raw = self.read().await?;
        let mut kubeconfig: kube::config::Kubeconfig = serde_yaml::from_slice(&raw)
            .map_err(|e| KeteError::Provider(format!("invalid kubeconfig YAML: {e}")))?;
        if !kubeconfig.contexts.iter().any(|c| c.name == id) {
            return Err(KeteError::ClusterNotFound(id.to_string()));
        }
        kubeconfig.current_context = Some(id.to_string());
        serde_yaml::to_string(&kubeconfig)
            .map(String::into_bytes)
            .map_err(|e| KeteError::Provider(format!("failed to encode kubeconfig: {e}")))
    }

    async fn delete_cluster(&self, id: &str) -> Result<()> {
        warn!(
            "Not deleting externally managed cluster {} (kubeconfig provider)",
            id
        );
        Ok(())
    }

    async fn check_quota(&self) -> Result<bool> {
        Ok(true)
    }

    async fn logs(&self, _id: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(BTreeMap::new())
    }

    async fn versions(&self) -> Result<VersionList> {
        Ok(VersionList::default())
    }

    async fn is_valid_cluster_name(&self, _name: &str) -> Result<bool> {
        Ok(false)
    }

    async fn install_addons(&self, id: &str, addon_ids: &[String]) -> Result<usize> {
        if !addon_ids.is_empty() {
            info!(
                "Skipping {} add-on(s) for {}: kubeconfig provider does not manage add-ons",
                addon_ids.len(),
                id
            );
        }
        Ok(0)
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn name(&self) -> &str {
        "kubeconfig"
    }
}
