//! Cluster version upgrade coordination.
//!
//! An upgrade is a two-step protocol against the `ClusterVersion` resource:
//! submit a new `desiredUpdate` and wait until the cluster version operator
//! has observed the resulting generation, then poll until the desired
//! release is reported, no active condition is set and the newest history
//! entry is `Completed` for that release.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::crd::{ClusterVersion, Update};
use crate::error::{KeteError, Result};
use crate::k8s::ClusterApi;
use crate::poll::Poller;
use crate::version::{channel_for, strip_release_prefix};

/// Conditions that mean an upgrade is still in flight or stuck.
pub const ACTIVE_CONDITIONS: [&str; 3] = ["Progressing", "Degraded", "Failing"];

/// Interval between acknowledgement checks.
pub const ACK_INTERVAL: Duration = Duration::from_secs(15);

/// Time allowed for the operator to observe a submitted update.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval between completion checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Overall bound on an upgrade.
pub const UPGRADE_TIMEOUT: Duration = Duration::from_secs(90 * 60);

#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    pub ack_interval: Duration,
    pub ack_timeout: Duration,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            ack_interval: ACK_INTERVAL,
            ack_timeout: ACK_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            timeout: UPGRADE_TIMEOUT,
        }
    }
}

/// Requested target release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub version: String,
    pub image: Option<String>,
    /// Channel to switch to before upgrading by version.
    pub channel: Option<String>,
    pub force: bool,
}

impl UpgradeRequest {
    /// Build a request. Without an image the cluster must find the release in
    /// its channel, so the channel is derived from the version.
    pub fn new(version: &str, image: Option<String>, channel_prefix: &str) -> Result<Self> {
        let version = strip_release_prefix(version).to_string();
        let channel = if image.is_none() {
            Some(channel_for(&version, channel_prefix)?)
        } else {
            None
        };
        Ok(Self {
            version,
            image,
            channel,
            force: true,
        })
    }

    fn to_update(&self) -> Update {
        Update {
            version: self.version.clone(),
            image: self.image.clone().unwrap_or_default(),
            force: self.force,
        }
    }

    fn matches(&self, version: &str, image: &str) -> bool {
        strip_release_prefix(version) == self.version
            && self.image.as_deref().is_none_or(|wanted| wanted == image)
    }
}

/// Proof that the operator observed a submitted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub generation: i64,
    pub observed_generation: i64,
}

#[derive(Debug, Clone)]
pub struct UpgradeSummary {
    pub from_version: String,
    pub to_version: String,
    pub elapsed: Duration,
}

/// Decide whether `cv` reports `request` as fully applied.
pub fn evaluate_upgrade(cv: &ClusterVersion, request: &UpgradeRequest) -> (bool, String) {
    let Some(status) = cv.status.as_ref() else {
        return (false, "ClusterVersion has no status yet".to_string());
    };

    if !request.matches(&status.desired.version, &status.desired.image) {
        return (
            false,
            format!(
                "desired release is {} ({}), waiting for {}",
                status.desired.version, status.desired.image, request.version
            ),
        );
    }

    for type_ in ACTIVE_CONDITIONS {
        if let Some(c) = status
            .conditions
            .iter()
            .find(|c| c.type_ == type_ && c.is_true())
        {
            let message = c.message_or_reason();
            let message = if message.is_empty() {
                format!("{type_} is True")
            } else {
                message
            };
            return (false, message);
        }
    }

    match status.history.first() {
        Some(latest) if latest.state == "Completed" && request.matches(&latest.version, &latest.image) => {
            (true, format!("upgrade to {} completed", latest.version))
        }
        Some(latest) => (
            false,
            format!(
                "latest history entry is {} for {}",
                latest.state, latest.version
            ),
        ),
        None => (false, "ClusterVersion history is empty".to_string()),
    }
}

pub struct UpgradeCoordinator {
    api: Arc<dyn ClusterApi>,
    config: UpgradeConfig,
    outstanding: Option<UpgradeRequest>,
}

impl UpgradeCoordinator {
    pub fn new(api: Arc<dyn ClusterApi>, config: UpgradeConfig) -> Self {
        Self {
            api,
            config,
            outstanding: None,
        }
    }

    pub const fn outstanding(&self) -> Option<&UpgradeRequest> {
        self.outstanding.as_ref()
    }

    /// Submit `request` and wait until its generation is observed.
    pub async fn trigger_upgrade(
        &mut self,
        request: &UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<Acknowledgement> {
        if let Some(pending) = &self.outstanding {
            return Err(KeteError::UpgradeInProgress(format!(
                "upgrade to {} has not completed",
                pending.version
            )));
        }

        let current = self.api.get_cluster_version().await?;
        let from = current
            .status
            .as_ref()
            .map(|s| s.desired.version.clone())
            .unwrap_or_default();
        info!(
            "Triggering upgrade from {} to {} (channel: {})",
            from,
            request.version,
            request.channel.as_deref().unwrap_or("unchanged")
        );

        let updated = self
            .api
            .patch_desired_update(&request.to_update(), request.channel.as_deref())
            .await?;
        let generation = updated.metadata.generation.unwrap_or_default();
        self.outstanding = Some(request.clone());

        let mut poller = Poller::new(
            "upgrade acknowledgement",
            self.config.ack_interval,
            self.config.ack_timeout,
            cancel.clone(),
        );
        loop {
            poller.tick().await?;
            let cv = match self.api.get_cluster_version().await {
                Ok(cv) => cv,
                Err(e) if e.is_transient() => {
                    warn!("Failed to read ClusterVersion, will retry: {}", e);
                    poller.note(e.to_string());
                    continue;
                }
                Err(e) => return Err(e),
            };
            let observed = cv
                .status
                .as_ref()
                .map_or(0, |s| s.observed_generation);
            if observed >= generation {
                info!(
                    "Upgrade request acknowledged (generation {}, observed {})",
                    generation, observed
                );
                return Ok(Acknowledgement {
                    generation,
                    observed_generation: observed,
                });
            }
            poller.note(format!(
                "observed generation {observed} is behind submitted generation {generation}"
            ));
        }
    }

    /// Check whether `request` has been fully applied.
    pub async fn is_upgrade_done(&self, request: &UpgradeRequest) -> Result<(bool, String)> {
        let cv = self.api.get_cluster_version().await?;
        Ok(evaluate_upgrade(&cv, request))
    }

    /// Trigger the upgrade and wait for completion.
    pub async fn run(
        &mut self,
        request: &UpgradeRequest,
        cancel: &CancellationToken,
    ) -> Result<UpgradeSummary> {
        let started = Instant::now();
        let from_version = self
            .api
            .get_cluster_version()
            .await?
            .status
            .map(|s| s.desired.version)
            .unwrap_or_default();

        self.trigger_upgrade(request, cancel).await?;

        let mut poller = Poller::new(
            format!("upgrade to {}", request.version),
            self.config.poll_interval,
            self.config.timeout,
            cancel.clone(),
        );
        loop {
            poller.tick().await?;
            let (done, message) = match self.is_upgrade_done(request).await {
                Ok(result) => result,
                Err(e) if e.is_transient() => {
                    warn!("Failed to read upgrade status, will retry: {}", e);
                    (false, e.to_string())
                }
                Err(e) => return Err(e),
            };

            if done {
                self.outstanding = None;
                let elapsed = started.elapsed();
                info!(
                    "Upgrade from {} to {} finished in {}s",
                    from_version,
                    request.version,
                    elapsed.as_secs()
                );
                return Ok(UpgradeSummary {
                    from_version,
                    to_version: request.version.clone(),
                    elapsed,
                });
            }

            info!("Upgrade to {} in progress: {}", request.version, message);
            poller.note(message);
        }
    }
}
