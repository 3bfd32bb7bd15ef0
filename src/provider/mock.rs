//! In-memory provider used for dry runs and tests.
//!
//! Clusters are created directly in the `ready` state. The `fail`
//! environment makes every control plane call fail.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::Provider;
use crate::cluster::{Cluster, ClusterState};
use crate::error::{KeteError, Result};
use crate::version::VersionList;

const FAIL_ENVIRONMENT: &str = "fail";

pub struct MockProvider {
    environment: String,
    clusters: Mutex<HashMap<String, Cluster>>,
    versions: VersionList,
    quota_available: bool,
    kubeconfig: Vec<u8>,
    fail_deletes: bool,
    launch_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            clusters: Mutex::new(HashMap::new()),
            versions: VersionList {
                available: vec!["1.2.3".into(), "2.3.4".into(), "4.5.6".into()],
                default: Some("4.5.6".into()),
            },
            quota_available: true,
            kubeconfig: b"mock-kubeconfig".to_vec(),
            fail_deletes: false,
            launch_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_versions(mut self, versions: VersionList) -> Self {
        self.versions = versions;
        self
    }

    #[must_use]
    pub const fn with_quota(mut self, available: bool) -> Self {
        self.quota_available = available;
        self
    }

    #[must_use]
    pub fn with_kubeconfig(mut self, kubeconfig: Vec<u8>) -> Self {
        self.kubeconfig = kubeconfig;
        self
    }

    /// Make `delete_cluster` fail, for exercising teardown error handling.
    #[must_use]
    pub const fn with_failing_delete(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Register an existing cluster.
    #[must_use]
    pub fn with_cluster(mut self, cluster: Cluster) -> Self {
        if let Ok(clusters) = self.clusters.get_mut() {
            clusters.insert(cluster.id.clone(), cluster);
        }
        self
    }

    pub fn set_state(&self, id: &str, state: ClusterState) {
        if let Ok(mut clusters) = self.clusters.lock()
            && let Some(cluster) = clusters.get_mut(id)
        {
            cluster.state = state;
        }
    }

    pub fn launch_calls(&self) -> usize {
        self.launch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_environment(&self) -> Result<()> {
        if self.environment == FAIL_ENVIRONMENT {
            return Err(KeteError::Provider(
                "mock provider configured to fail".into(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Cluster>>> {
        self.clusters
            .lock()
            .map_err(|_| KeteError::Provider("mock cluster store lock poisoned".into()))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn launch_cluster(&self, name: &str, version: &str) -> Result<String> {
        self.check_environment()?;
        let n = self.launch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("mock-{n}");

        let cluster = Cluster {
            id: id.clone(),
            name: name.to_string(),
            version: version.to_string(),
            state: ClusterState::Ready,
            cloud_provider: "mock".into(),
            region: "mock-region".into(),
            addons: vec![],
        };
        self.lock()?.insert(id.clone(), cluster);
        info!("Mock cluster {} launched as {}", name, id);
        Ok(id)
    }

    async fn get_cluster(&self, id: &str) -> Result<Cluster> {
        self.check_environment()?;
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| KeteError::ClusterNotFound(id.to_string()))
    }

    async fn cluster_kubeconfig(&self, id: &str) -> Result<Vec<u8>> {
        self.check_environment()?;
        if !self.lock()?.contains_key(id) {
            return Err(KeteError::ClusterNotFound(id.to_string()));
        }
        Ok(self.kubeconfig.clone())
    }

    async fn delete_cluster(&self, id: &str) -> Result<()> {
        self.check_environment()?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(KeteError::Provider(format!("failed to delete cluster {id}")));
        }
        self.lock()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| KeteError::ClusterNotFound(id.to_string()))
    }

    async fn check_quota(&self) -> Result<bool> {
        self.check_environment()?;
        Ok(self.quota_available)
    }

    async fn logs(&self, id: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.check_environment()?;
        let mut logs = BTreeMap::new();
        logs.insert("logs.txt".to_string(), format!("mock logs for {id}").into_bytes());
        logs.insert("build.log".to_string(), b"mock build log".to_vec());
        Ok(logs)
    }

    async fn versions(&self) -> Result<VersionList> {
        self.check_environment()?;
        Ok(self.versions.clone())
    }

    async fn is_valid_cluster_name(&self, name: &str) -> Result<bool> {
        self.check_environment()?;
        Ok(!self.lock()?.values().any(|c| c.name == name))
    }

    async fn install_addons(&self, id: &str, addon_ids: &[String]) -> Result<usize> {
        self.check_environment()?;
        let mut clusters = self.lock()?;
        let cluster = clusters
            .get_mut(id)
            .ok_or_else(|| KeteError::ClusterNotFound(id.to_string()))?;

        let mut installed = 0;
        for addon in addon_ids {
            if !cluster.addons.contains(addon) {
                cluster.addons.push(addon.clone());
                installed += 1;
            }
        }
        Ok(installed)
    }

    fn environment(&self) -> &str {
        &self.environment
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_creates_ready_cluster() {
        let provider = MockProvider::new("prod");
        let id = provider.launch_cluster("kete-test", "4.5.6").await.unwrap();
        let cluster = provider.get_cluster(&id).await.unwrap();
        assert_eq!(cluster.name, "kete-test");
        assert_eq!(cluster.version, "4.5.6");
        assert!(cluster.is_ready());
        assert_eq!(provider.launch_calls(), 1);
    }

    #[tokio::test]
    async fn test_fail_environment() {
        let provider = MockProvider::new("fail");
        assert!(provider.check_quota().await.is_err());
        assert!(provider.launch_cluster("x", "1.2.3").await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_cluster() {
        let provider = MockProvider::new("prod");
        let err = provider.get_cluster("nope").await.unwrap_err();
        assert!(matches!(err, KeteError::ClusterNotFound(_)));
    }

    #[tokio::test]
    async fn test_install_addons_counts_new_only() {
        let provider = MockProvider::new("prod");
        let id = provider.launch_cluster("c", "4.5.6").await.unwrap();
        let addons = vec!["a".to_string(), "b".to_string()];
        assert_eq!(provider.install_addons(&id, &addons).await.unwrap(), 2);
        assert_eq!(provider.install_addons(&id, &addons).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cluster_name_validity() {
        let provider = MockProvider::new("prod");
        provider.launch_cluster("taken", "4.5.6").await.unwrap();
        assert!(!provider.is_valid_cluster_name("taken").await.unwrap());
        assert!(provider.is_valid_cluster_name("free").await.unwrap());
    }

    #[tokio::test]
    async fn test_logs() {
        let provider = MockProvider::new("prod");
        let logs = provider.logs("mock-1").await.unwrap();
        assert!(logs.contains_key("logs.txt"));
        assert!(logs.contains_key("build.log"));
    }
}
