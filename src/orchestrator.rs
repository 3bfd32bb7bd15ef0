//! End-to-end run: provision, gate on readiness, optionally upgrade, run the
//! test workloads, hand off results and tear the cluster down.
//!
//! Provisioning, the readiness gates and add-on installation are fatal. An
//! upgrade that fails before its request reaches the cluster only skips the
//! post-upgrade workload phase. Once the request has been submitted, a failure
//! skips every workload phase since the cluster may be mid-rollout. A failed
//! workload is recorded and the next one still runs. Teardown is always
//! attempted and its failures are reported as warnings.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::error::{ErrorKind, KeteError, Result};
use crate::k8s::{ClusterApi, ClusterConnector};
use crate::provider::Provider;
use crate::provisioner::{ProvisionConfig, Provisioner};
use crate::readiness::{ReadinessConfig, ReadinessGate};
use crate::report::ResultSink;
use crate::retry::retry_with_backoff;
use crate::upgrade::{UpgradeConfig, UpgradeCoordinator, UpgradeRequest};
use crate::workload::{RunnerConfig, WorkloadRunner, WorkloadSpec};

/// Workload phase run on the cluster before any upgrade.
pub const INSTALL_PHASE: &str = "install";

/// Workload phase run after a successful upgrade.
pub const UPGRADE_PHASE: &str = "upgrade";

/// Sink phase name for control plane logs.
pub const CLUSTER_LOGS_PHASE: &str = "cluster-logs";

/// Release to upgrade to after the install phase.
#[derive(Debug, Clone)]
pub struct UpgradeTarget {
    pub version: String,
    pub image: Option<String>,
    pub channel_prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub existing_cluster_id: Option<String>,
    pub provision: ProvisionConfig,
    pub readiness: ReadinessConfig,
    pub upgrade: Option<UpgradeTarget>,
    pub upgrade_timing: UpgradeConfig,
    pub runner: RunnerConfig,
    pub workloads: Vec<WorkloadSpec>,
    pub retain_cluster: bool,
}

/// Outcome of one orchestrator step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub step: String,
    #[serde(skip)]
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cluster_id: Option<String>,
    pub cluster_version: Option<String>,
    pub steps: Vec<StepOutcome>,
    /// Workload phases that were started, in order.
    pub workload_phases: Vec<String>,
    pub errors: Vec<PhaseError>,
    pub warnings: Vec<String>,
    pub upgraded: bool,
    /// An upgrade request was written to the cluster.
    pub upgrade_submitted: bool,
    pub cancelled: bool,
    pub torn_down: bool,
}

impl RunReport {
    /// True when no step failed. Cancellation is not a failure.
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        let status = if self.cancelled {
            "CANCELLED"
        } else if self.passed() {
            "PASSED"
        } else {
            "FAILED"
        };
        format!(
            "{} ({} step(s), {} error(s), {} warning(s))",
            status,
            self.steps.len(),
            self.errors.len(),
            self.warnings.len()
        )
    }
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    connector: Arc<dyn ClusterConnector>,
    sink: Arc<dyn ResultSink>,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        connector: Arc<dyn ClusterConnector>,
        sink: Arc<dyn ResultSink>,
        config: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            connector,
            sink,
            config,
            cancel,
        }
    }

    pub async fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        let mut provisioner = Provisioner::new(self.provider.clone(), self.config.provision.clone());

        if let Err(e) = self.execute(&mut provisioner, &mut report).await {
            if e.is_cancelled() {
                warn!("Run cancelled: {}", e);
            } else {
                error!("Run aborted: {}", e);
            }
        }

        report.cluster_id = provisioner.cluster_id().map(String::from);
        if let Some(id) = report.cluster_id.clone() {
            self.collect_cluster_logs(&id, &mut report).await;
            self.teardown(&id, &mut report).await;
        }

        info!("Run finished: {}", report.summary());
        report
    }

    /// Phases up to teardown. Returns an error only when the remaining
    /// phases must be skipped.
    async fn execute(&self, provisioner: &mut Provisioner, report: &mut RunReport) -> Result<()> {
        let existing = self.config.existing_cluster_id.as_deref();
        let mut cluster: Cluster =
            timed(report, "provision", provisioner.launch_or_reuse(existing)).await?;
        info!(
            cluster = %cluster.id,
            version = %cluster.version,
            "Cluster provisioned ({})", cluster.state
        );
        report.cluster_version = Some(cluster.version.clone());

        let mut api = self.wait_ready(report, "readiness", &cluster, None).await?;

        let installed = timed(report, "addons", provisioner.install_addons(&cluster)).await?;
        if installed > 0 {
            api = self
                .wait_ready(report, "readiness:addons", &cluster, Some(api))
                .await?;
        }

        if let Some(target) = &self.config.upgrade {
            match self.upgrade(report, &cluster, target, api.clone()).await {
                Ok(version) => {
                    cluster.version = version;
                    report.cluster_version = Some(cluster.version.clone());
                    report.upgraded = true;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if report.upgrade_submitted => {
                    warn!("Upgrade failed after submission, skipping all workload phases: {}", e);
                    report.warnings.push(format!(
                        "skipping workload phases: cluster not confirmed ready after upgrade submission: {e}"
                    ));
                    return Ok(());
                }
                Err(e) => {
                    warn!("Upgrade failed, skipping {} phase workloads: {}", UPGRADE_PHASE, e);
                }
            }
        }

        self.run_phase(report, INSTALL_PHASE, &api).await?;
        if report.upgraded {
            self.run_phase(report, UPGRADE_PHASE, &api).await?;
        }
        Ok(())
    }

    async fn wait_ready(
        &self,
        report: &mut RunReport,
        step: &str,
        cluster: &Cluster,
        api: Option<Arc<dyn ClusterApi>>,
    ) -> Result<Arc<dyn ClusterApi>> {
        let mut gate = ReadinessGate::new(
            self.provider.clone(),
            self.connector.clone(),
            &cluster.id,
            self.config.readiness.clone(),
        )
        .with_api(api);
        timed(report, step, gate.wait_until_ready(&self.cancel)).await?;
        gate.cluster_api()
            .ok_or_else(|| KeteError::KubernetesApi("readiness gate opened without a cluster connection".into()))
    }

    async fn upgrade(
        &self,
        report: &mut RunReport,
        cluster: &Cluster,
        target: &UpgradeTarget,
        api: Arc<dyn ClusterApi>,
    ) -> Result<String> {
        let request = match UpgradeRequest::new(&target.version, target.image.clone(), &target.channel_prefix) {
            Ok(request) => request,
            Err(e) => {
                record(report, "upgrade", Err(&e), Instant::now());
                return Err(e);
            }
        };

        let mut coordinator = UpgradeCoordinator::new(api.clone(), self.config.upgrade_timing.clone());
        let result = timed(report, "upgrade", coordinator.run(&request, &self.cancel)).await;
        report.upgrade_submitted = result.is_ok() || coordinator.outstanding().is_some();
        let summary = result?;
        self.wait_ready(report, "readiness:upgrade", cluster, Some(api))
            .await?;
        Ok(summary.to_version)
    }

    async fn run_phase(
        &self,
        report: &mut RunReport,
        phase: &str,
        api: &Arc<dyn ClusterApi>,
    ) -> Result<()> {
        info!("Starting {} phase with {} workload(s)", phase, self.config.workloads.len());
        report.workload_phases.push(phase.to_string());
        if self.config.workloads.is_empty() {
            report
                .warnings
                .push(format!("no workloads configured for {phase} phase"));
        }

        for spec in &self.config.workloads {
            let mut runner =
                WorkloadRunner::new(api.clone(), self.config.runner.clone(), self.cancel.clone());
            let step = format!("workload:{phase}/{}", spec.name);
            match timed(report, &step, runner.run(spec)).await {
                Ok(results) => {
                    if let Err(e) = self.sink.accept(phase, &results).await {
                        warn!("Result sink {} rejected {} results: {}", self.sink.name(), phase, e);
                        report.warnings.push(format!("{step}: result hand-off failed: {e}"));
                    }
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(_) => {}
            }
        }
        Ok(())
    }

    async fn collect_cluster_logs(&self, id: &str, report: &mut RunReport) {
        match self.provider.logs(id).await {
            Ok(logs) if logs.is_empty() => {}
            Ok(logs) => {
                if let Err(e) = self.sink.accept(CLUSTER_LOGS_PHASE, &logs).await {
                    report.warnings.push(format!("cluster logs: {e}"));
                }
            }
            Err(e) => {
                warn!(cluster = %id, "Failed to collect cluster logs: {}", e);
                report.warnings.push(format!("cluster logs: {e}"));
            }
        }
    }

    async fn teardown(&self, id: &str, report: &mut RunReport) {
        if self.config.retain_cluster {
            info!(cluster = %id, "Retaining cluster, skipping destruction");
            return;
        }

        info!(cluster = %id, "Destroying cluster");
        let provider = self.provider.clone();
        match retry_with_backoff(&self.config.provision.retry, "delete cluster", || {
            provider.delete_cluster(id)
        })
        .await
        {
            Ok(()) => report.torn_down = true,
            Err(e) => {
                warn!(cluster = %id, "Teardown failed: {}", e);
                report.warnings.push(format!("teardown: {e}"));
            }
        }
    }
}

/// Await `fut`, recording its outcome as `step`.
async fn timed<T, F>(report: &mut RunReport, step: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    record(report, step, result.as_ref().map(|_| ()), started);
    result
}

fn record(report: &mut RunReport, step: &str, result: std::result::Result<(), &KeteError>, started: Instant) {
    let elapsed_secs = started.elapsed().as_secs_f64();
    match result {
        Ok(()) => report.steps.push(StepOutcome {
            step: step.to_string(),
            passed: true,
            error: None,
            elapsed_secs,
        }),
        Err(e) => {
            report.steps.push(StepOutcome {
                step: step.to_string(),
                passed: false,
                error: Some(e.to_string()),
                elapsed_secs,
            });
            if e.is_cancelled() {
                report.cancelled = true;
            } else {
                error!(step = %step, "Step failed: {}", e);
                report.errors.push(PhaseError {
                    step: step.to_string(),
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }
}
