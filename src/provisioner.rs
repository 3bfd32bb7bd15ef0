//! Obtain a cluster to test against: reuse an existing one or launch a new
//! one at a resolved version.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cluster::Cluster;
use crate::error::{KeteError, Result};
use crate::provider::Provider;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::version::resolve_install_version;
use crate::workload::pod::random_suffix;

/// Attempts at generating an unused cluster name.
pub const NAME_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Default)]
pub struct ProvisionConfig {
    /// Explicit name for a new cluster; generated when unset.
    pub cluster_name: Option<String>,
    /// Explicit install version, used verbatim.
    pub version: Option<String>,
    /// Upgrade target; the install version is chosen below it.
    pub upgrade_target: Option<String>,
    pub addons: Vec<String>,
    pub retry: RetryConfig,
}

pub struct Provisioner {
    provider: Arc<dyn Provider>,
    config: ProvisionConfig,
    cluster_id: Option<String>,
}

impl Provisioner {
    pub fn new(provider: Arc<dyn Provider>, config: ProvisionConfig) -> Self {
        Self {
            provider,
            config,
            cluster_id: None,
        }
    }

    /// ID of the cluster this provisioner attached to or created, if any.
    /// Set as soon as the provider returns it, so teardown can find clusters
    /// whose provisioning failed afterwards.
    pub fn cluster_id(&self) -> Option<&str> {
        self.cluster_id.as_deref()
    }

    pub async fn launch_or_reuse(&mut self, existing_id: Option<&str>) -> Result<Cluster> {
        let retry = self.config.retry.clone();
        let provider = self.provider.clone();

        if let Some(id) = existing_id {
            info!("Reusing existing cluster {}", id);
            let cluster =
                retry_with_backoff(&retry, "get cluster", || provider.get_cluster(id)).await?;
            self.cluster_id = Some(cluster.id.clone());
            return Ok(cluster);
        }

        let has_quota = retry_with_backoff(&retry, "check quota", || provider.check_quota()).await?;
        if !has_quota {
            return Err(KeteError::QuotaExhausted(format!(
                "{} provider ({}) has no quota for a new cluster",
                provider.name(),
                provider.environment()
            )));
        }

        let versions = retry_with_backoff(&retry, "list versions", || provider.versions()).await?;
        let version = resolve_install_version(
            self.config.version.as_deref(),
            self.config.upgrade_target.as_deref(),
            &versions,
        )?;
        let name = self.cluster_name().await?;

        info!(
            cluster = %name,
            version = %version,
            provider = %provider.name(),
            "Launching cluster"
        );
        let id = retry_with_backoff(&retry, "launch cluster", || {
            provider.launch_cluster(&name, &version)
        })
        .await?;
        self.cluster_id = Some(id.clone());

        retry_with_backoff(&retry, "get cluster", || provider.get_cluster(&id)).await
    }

    async fn cluster_name(&self) -> Result<String> {
        if let Some(name) = &self.config.cluster_name {
            return Ok(name.clone());
        }

        for attempt in 1..=NAME_ATTEMPTS {
            let candidate = format!("kete-{}-{}", Utc::now().format("%m%d"), random_suffix());
            if self.provider.is_valid_cluster_name(&candidate).await? {
                return Ok(candidate);
            }
            warn!(
                attempt = attempt,
                "Cluster name {} is not available, generating another", candidate
            );
        }
        Err(KeteError::Provider(format!(
            "no valid cluster name after {NAME_ATTEMPTS} attempts"
        )))
    }

    /// Install configured add-ons. Returns how many were newly installed.
    pub async fn install_addons(&self, cluster: &Cluster) -> Result<usize> {
        if self.config.addons.is_empty() {
            return Ok(0);
        }
        let provider = self.provider.clone();
        let addons = self.config.addons.clone();
        let installed = retry_with_backoff(&self.config.retry, "install add-ons", || {
            provider.install_addons(&cluster.id, &addons)
        })
        .await?;
        info!(cluster = %cluster.id, "Installed {} add-on(s)", installed);
        Ok(installed)
    }
}
