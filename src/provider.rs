//! Provider SPI for manipulating clusters through a control plane.

pub mod kubeconfig;
pub mod mock;

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::cluster::Cluster;
use crate::error::{KeteError, Result};
use crate::version::VersionList;

/// Control plane operations consumed by the provisioner, readiness gate and
/// orchestrator. Implementations must be safe for concurrent reuse.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a cluster at `version` and return its ID.
    async fn launch_cluster(&self, name: &str, version: &str) -> Result<String>;

    async fn get_cluster(&self, id: &str) -> Result<Cluster>;

    async fn cluster_kubeconfig(&self, id: &str) -> Result<Vec<u8>>;

    async fn delete_cluster(&self, id: &str) -> Result<()>;

    async fn check_quota(&self) -> Result<bool>;

    /// Collect control plane logs for a cluster, keyed by file name.
    async fn logs(&self, id: &str) -> Result<BTreeMap<String, Vec<u8>>>;

    async fn versions(&self) -> Result<VersionList>;

    async fn is_valid_cluster_name(&self, name: &str) -> Result<bool>;

    /// Install add-ons on a cluster. Returns how many were newly installed.
    async fn install_addons(&self, id: &str, addon_ids: &[String]) -> Result<usize>;

    fn environment(&self) -> &str;

    fn name(&self) -> &str;
}

/// Settings identifying one provider connection.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: String,
    pub environment: String,
    pub credential: Option<SecretString>,
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: String,
    environment: String,
    credential_fingerprint: u64,
}

impl CacheKey {
    fn from_settings(settings: &ProviderSettings) -> Self {
        let mut hasher = DefaultHasher::new();
        if let Some(credential) = &settings.credential {
            credential.expose_secret().hash(&mut hasher);
        }
        settings.kubeconfig.hash(&mut hasher);

        Self {
            kind: settings.kind.clone(),
            environment: settings.environment.clone(),
            credential_fingerprint: hasher.finish(),
        }
    }
}

/// Caller-owned memo of provider connections keyed by credential and environment.
#[derive(Default)]
pub struct ProviderCache {
    providers: Mutex<HashMap<CacheKey, Arc<dyn Provider>>>,
}

impl ProviderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached provider for `settings`, creating it on first use.
    pub fn get_or_create(&self, settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
        let key = CacheKey::from_settings(settings);
        let mut providers = self
            .providers
            .lock()
            .map_err(|_| KeteError::Provider("provider cache lock poisoned".into()))?;

        if let Some(provider) = providers.get(&key) {
            debug!(
                "Reusing cached {} provider for environment {}",
                settings.kind, settings.environment
            );
            return Ok(provider.clone());
        }

        let provider = create_provider(settings)?;
        info!(
            provider = %settings.kind,
            environment = %settings.environment,
            "Created provider connection"
        );
        providers.insert(key, provider.clone());
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.providers.lock().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    match settings.kind.as_str() {
        "mock" => Ok(Arc::new(mock::MockProvider::new(&settings.environment))),
        "kubeconfig" => {
            let path = settings.kubeconfig.clone().ok_or_else(|| {
                KeteError::Config("kubeconfig provider requires --kubeconfig".into())
            })?;
            Ok(Arc::new(kubeconfig::KubeconfigProvider::new(
                path,
                &settings.environment,
            )))
        }
        other => Err(KeteError::Config(format!(
            "Unknown provider: {other}. Supported providers: mock, kubeconfig"
        ))),
    }
}
