//! Readiness gate.
//!
//! Polls the control plane and the cluster's own API until the cluster has
//! passed every health check on `clean_check_runs` consecutive ticks. Any
//! failing tick resets the counter, so rollouts that flap between healthy
//! and unhealthy never pass the gate.

pub mod checks;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{KeteError, Result};
use crate::k8s::{ClusterApi, ClusterConnector};
use crate::poll::Poller;
use crate::provider::Provider;

pub use checks::{HealthCheckResult, HealthReport, run_health_checks};

/// Default interval between readiness ticks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default consecutive clean ticks required before the gate opens.
pub const CLEAN_CHECK_RUNS: u32 = 5;

/// Default time allowed for a cluster to install and settle.
pub const READY_TIMEOUT: Duration = Duration::from_secs(135 * 60);

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub clean_check_runs: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: READY_TIMEOUT,
            clean_check_runs: CLEAN_CHECK_RUNS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Checking,
    Ready,
    Error,
    TimedOut,
}

pub struct ReadinessGate {
    provider: Arc<dyn Provider>,
    connector: Arc<dyn ClusterConnector>,
    cluster_id: String,
    config: ReadinessConfig,
    state: GateState,
    clean_runs: u32,
    api: Option<Arc<dyn ClusterApi>>,
    last_diagnostic: String,
}

impl ReadinessGate {
    pub fn new(
        provider: Arc<dyn Provider>,
        connector: Arc<dyn ClusterConnector>,
        cluster_id: &str,
        config: ReadinessConfig,
    ) -> Self {
        Self {
            provider,
            connector,
            cluster_id: cluster_id.to_string(),
            config,
            state: GateState::Checking,
            clean_runs: 0,
            api: None,
            last_diagnostic: String::new(),
        }
    }

    /// Reuse an already connected cluster API.
    #[must_use]
    pub fn with_api(mut self, api: Option<Arc<dyn ClusterApi>>) -> Self {
        self.api = api;
        self
    }

    pub const fn state(&self) -> GateState {
        self.state
    }

    pub const fn clean_runs(&self) -> u32 {
        self.clean_runs
    }

    pub fn last_diagnostic(&self) -> &str {
        &self.last_diagnostic
    }

    /// The cluster API connection established while checking, if any.
    pub fn cluster_api(&self) -> Option<Arc<dyn ClusterApi>> {
        self.api.clone()
    }

    /// Evaluate one poll.
    ///
    /// Non-transient provider errors are returned; everything else is folded
    /// into the gate state and diagnostic.
    pub async fn tick(&mut self) -> Result<GateState> {
        if self.state != GateState::Checking {
            return Ok(self.state);
        }

        let cluster = match self.provider.get_cluster(&self.cluster_id).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_transient() => {
                self.fail_tick(format!("control plane query failed: {e}"));
                return Ok(self.state);
            }
            Err(e) => {
                self.state = GateState::Error;
                self.last_diagnostic = e.to_string();
                return Err(e);
            }
        };

        if cluster.state.is_terminal() {
            self.state = GateState::Error;
            self.last_diagnostic = format!("cluster {} is in state {}", cluster.id, cluster.state);
            return Ok(self.state);
        }

        if !cluster.is_ready() {
            self.fail_tick(format!("cluster state is {}", cluster.state));
            return Ok(self.state);
        }

        let api = match self.connect().await {
            Ok(api) => api,
            Err(e) => {
                self.fail_tick(format!("cluster API unavailable: {e}"));
                return Ok(self.state);
            }
        };

        let report = run_health_checks(api.as_ref()).await;
        if report.is_healthy() {
            self.clean_runs += 1;
            self.last_diagnostic = report.diagnostic();
            info!(
                cluster = %self.cluster_id,
                "Health check passed ({}/{} clean runs)",
                self.clean_runs, self.config.clean_check_runs
            );
            if self.clean_runs >= self.config.clean_check_runs {
                self.state = GateState::Ready;
            }
        } else {
            self.fail_tick(report.diagnostic());
        }

        Ok(self.state)
    }

    fn fail_tick(&mut self, diagnostic: String) {
        if self.clean_runs > 0 {
            warn!(
                cluster = %self.cluster_id,
                "Clean run counter reset after {} run(s): {}", self.clean_runs, diagnostic
            );
        } else {
            debug!(cluster = %self.cluster_id, "Cluster not ready: {}", diagnostic);
        }
        self.clean_runs = 0;
        self.last_diagnostic = diagnostic;
    }

    async fn connect(&mut self) -> Result<Arc<dyn ClusterApi>> {
        if let Some(api) = &self.api {
            return Ok(api.clone());
        }
        let kubeconfig = self.provider.cluster_kubeconfig(&self.cluster_id).await?;
        let api = self.connector.connect(&kubeconfig).await?;
        self.api = Some(api.clone());
        Ok(api)
    }

    /// Tick until the gate opens, the cluster errors, the deadline passes or
    /// `cancel` fires.
    pub async fn wait_until_ready(&mut self, cancel: &CancellationToken) -> Result<()> {
        info!(
            cluster = %self.cluster_id,
            "Waiting for cluster to pass {} consecutive health checks",
            self.config.clean_check_runs
        );
        let mut poller = Poller::new(
            "cluster readiness",
            self.config.interval,
            self.config.timeout,
            cancel.clone(),
        );

        loop {
            if let Err(e) = poller.tick().await {
                if matches!(e, KeteError::Timeout { .. }) {
                    self.state = GateState::TimedOut;
                }
                return Err(e);
            }

            match self.tick().await? {
                GateState::Ready => {
                    info!(
                        cluster = %self.cluster_id,
                        "Cluster is ready after {} poll(s)",
                        poller.attempts()
                    );
                    return Ok(());
                }
                GateState::Error => {
                    return Err(KeteError::TerminalCluster(self.last_diagnostic.clone()));
                }
                GateState::Checking | GateState::TimedOut => {
                    poller.note(self.last_diagnostic.clone());
                }
            }
        }
    }
}
