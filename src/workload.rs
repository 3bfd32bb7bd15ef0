//! Ephemeral in-cluster test workloads.
//!
//! A workload is a single pod running a test image plus a service exposing
//! its results port. The pod runs the test command, writes its artifacts to
//! an `emptyDir`, and serves them over HTTP. Results are pulled through the
//! API server's service proxy, so the runner needs no network path into the
//! cluster beyond the API endpoint.
//!
//! Retrieval is all-or-nothing: a single failed download aborts with
//! `ResultRetrieval` and no partial results are returned.

pub mod pod;
pub mod results;
pub mod service;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Service};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{KeteError, Result};
use crate::k8s::ClusterApi;
use crate::poll::Poller;
use crate::retry::{RetryConfig, retry_with_backoff};

/// Result artifacts keyed by relative file name.
pub type ResultSet = BTreeMap<String, Vec<u8>>;

/// File listing every result artifact, served next to them.
pub const MANIFEST_FILE: &str = "_manifest.json";

pub const RESULTS_PORT: u16 = 8000;
pub const OUTPUT_DIR: &str = "/test-run-results";
pub const GIT_IMAGE: &str = "alpine/git:latest";

pub const POD_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const POD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const ENDPOINTS_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const ENDPOINTS_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);
pub const LISTING_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const LISTING_TIMEOUT: Duration = Duration::from_secs(60);

/// Auxiliary repository cloned into the pod before the test starts.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Defaults to `/repos/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

impl Repo {
    pub fn mount_path(&self) -> String {
        self.mount_path
            .clone()
            .unwrap_or_else(|| format!("/repos/{}", self.name))
    }
}

/// Description of one test workload.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    /// Shell command run inside the test container.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub repos: Vec<Repo>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_results_port")]
    pub results_port: u16,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

const fn default_results_port() -> u16 {
    RESULTS_PORT
}

fn default_output_dir() -> String {
    OUTPUT_DIR.to_string()
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            name: "e2e".to_string(),
            image: String::new(),
            command: String::new(),
            repos: vec![],
            env: BTreeMap::new(),
            results_port: RESULTS_PORT,
            output_dir: OUTPUT_DIR.to_string(),
            service_account: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub namespace: String,
    pub git_image: String,
    pub pod_poll_interval: Duration,
    pub pod_timeout: Duration,
    pub endpoints_poll_interval: Duration,
    pub endpoints_timeout: Duration,
    pub listing_retry_interval: Duration,
    pub listing_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: "kete".to_string(),
            git_image: GIT_IMAGE.to_string(),
            pod_poll_interval: POD_POLL_INTERVAL,
            pod_timeout: POD_TIMEOUT,
            endpoints_poll_interval: ENDPOINTS_POLL_INTERVAL,
            endpoints_timeout: ENDPOINTS_TIMEOUT,
            listing_retry_interval: LISTING_RETRY_INTERVAL,
            listing_timeout: LISTING_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerStatus {
    Setup,
    Running,
    Done,
    Failed,
}

pub struct WorkloadRunner {
    api: Arc<dyn ClusterApi>,
    config: RunnerConfig,
    cancel: CancellationToken,
    status: RunnerStatus,
    pod_name: Option<String>,
    service_name: Option<String>,
}

impl WorkloadRunner {
    pub fn new(api: Arc<dyn ClusterApi>, config: RunnerConfig, cancel: CancellationToken) -> Self {
        Self {
            api,
            config,
            cancel,
            status: RunnerStatus::Setup,
            pod_name: None,
            service_name: None,
        }
    }

    pub const fn status(&self) -> RunnerStatus {
        self.status
    }

    /// Deploy, expose and drain one workload, then remove its resources.
    pub async fn run(&mut self, spec: &WorkloadSpec) -> Result<ResultSet> {
        let outcome = self.execute(spec).await;
        self.status = if outcome.is_ok() {
            RunnerStatus::Done
        } else {
            RunnerStatus::Failed
        };
        self.cleanup().await;
        outcome
    }

    async fn execute(&mut self, spec: &WorkloadSpec) -> Result<ResultSet> {
        let pod = self.deploy(spec).await?;
        self.status = RunnerStatus::Running;
        let service = self.expose(&pod).await?;
        let service_name = service
            .metadata
            .name
            .clone()
            .ok_or_else(|| KeteError::Workload("service has no name".into()))?;

        let mut results = self.retrieve_results(&service_name, spec.results_port).await?;
        results.extend(self.collect_logs(&pod).await);
        Ok(results)
    }

    /// Create the workload pod and wait until it is Running.
    pub async fn deploy(&mut self, spec: &WorkloadSpec) -> Result<Pod> {
        if spec.image.is_empty() {
            return Err(KeteError::Config(format!(
                "workload {} has no image",
                spec.name
            )));
        }

        let ns = self.config.namespace.clone();
        self.api.ensure_namespace(&ns).await?;

        let name = pod::resource_name(&spec.name, &pod::random_suffix());
        let manifest = pod::build_pod(spec, &name, &self.config.git_image);
        let api = self.api.clone();
        retry_with_backoff(&self.config.retry, "create workload pod", || {
            api.create_pod(&ns, &manifest)
        })
        .await?;
        self.pod_name = Some(name.clone());
        info!(namespace = %ns, pod = %name, image = %spec.image, "Created workload pod");

        let mut poller = Poller::new(
            format!("pod {name} to run"),
            self.config.pod_poll_interval,
            self.config.pod_timeout,
            self.cancel.clone(),
        );
        loop {
            poller.tick().await?;
            let current = match self.api.get_pod(&ns, &name).await {
                Ok(p) => p,
                Err(e) if e.is_transient() => {
                    poller.note(format!("failed to get pod: {e}"));
                    continue;
                }
                Err(e) => return Err(e),
            };

            match pod::pod_phase(&current) {
                "Running" => {
                    info!(pod = %name, "Workload pod is running");
                    return Ok(current);
                }
                phase @ ("Failed" | "Succeeded" | "Unknown") => {
                    return Err(KeteError::Workload(format!(
                        "pod {name} entered phase {phase} before serving results"
                    )));
                }
                phase => {
                    debug!(pod = %name, "Workload pod is {}", phase);
                    poller.note(format!("pod {name} is {phase}"));
                }
            }
        }
    }

    /// Create a service for `pod` and wait until its endpoints have an address.
    pub async fn expose(&mut self, pod: &Pod) -> Result<Service> {
        let ns = self.config.namespace.clone();
        let manifest = service::build_service(pod);
        let name = manifest
            .metadata
            .name
            .clone()
            .ok_or_else(|| KeteError::Workload("pod has no name".into()))?;

        let api = self.api.clone();
        let created = retry_with_backoff(&self.config.retry, "create workload service", || {
            api.create_service(&ns, &manifest)
        })
        .await?;
        self.service_name = Some(name.clone());
        info!(namespace = %ns, service = %name, "Created workload service");

        let mut poller = Poller::new(
            format!("service {name} endpoints"),
            self.config.endpoints_poll_interval,
            self.config.endpoints_timeout,
            self.cancel.clone(),
        );
        loop {
            poller.tick().await?;

            match self.api.get_pod(&ns, &name).await {
                Ok(current) if pod::pod_phase(&current) == "Failed" => {
                    return Err(KeteError::Workload(format!(
                        "pod {name} failed while waiting for results"
                    )));
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => debug!("Failed to get pod {}: {}", name, e),
                Err(e) => return Err(e),
            }

            match self.api.get_endpoints(&ns, &name).await {
                Ok(Some(endpoints)) if service::endpoints_ready(&endpoints) => {
                    info!(service = %name, "Workload results are being served");
                    return Ok(created);
                }
                Ok(_) => poller.note(format!("service {name} has no ready endpoints")),
                Err(e) if e.is_transient() => poller.note(format!("failed to get endpoints: {e}")),
                Err(e) => return Err(e),
            }
        }
    }

    /// Download every result file served behind `service`.
    pub async fn retrieve_results(&self, service: &str, port: u16) -> Result<ResultSet> {
        let files = match self.fetch(service, port, MANIFEST_FILE).await {
            Ok(body) => results::parse_manifest(&body)?,
            Err(e) => {
                debug!("No results manifest ({}), reading directory listing", e);
                self.list_directory(service, port).await?
            }
        };
        info!(service = %service, "Downloading {} result file(s)", files.len());

        let mut collected = ResultSet::new();
        for file in &files {
            let body = self.fetch(service, port, file).await.map_err(|e| {
                retrieval_error(e, || format!("failed to download {file}"))
            })?;
            results::insert_result(&mut collected, file, body);
        }
        Ok(collected)
    }

    async fn list_directory(&self, service: &str, port: u16) -> Result<Vec<String>> {
        let mut poller = Poller::new(
            "results listing",
            self.config.listing_retry_interval,
            self.config.listing_timeout,
            self.cancel.clone(),
        );
        let root = loop {
            poller.tick().await.map_err(|e| match e {
                KeteError::Timeout { details, .. } => {
                    KeteError::ResultRetrieval(format!("results listing unavailable: {details}"))
                }
                other => other,
            })?;
            match self.fetch(service, port, "").await {
                Ok(body) => break String::from_utf8_lossy(&body).into_owned(),
                Err(e) => poller.note(e.to_string()),
            }
        };

        let mut files = Vec::new();
        let mut pending: Vec<(String, Vec<String>, usize)> =
            vec![(String::new(), results::parse_listing(&root), 0)];

        while let Some((prefix, links, depth)) = pending.pop() {
            for link in links {
                let path = format!("{prefix}{link}");
                if link.ends_with('/') {
                    if depth + 1 > results::MAX_LISTING_DEPTH {
                        warn!("Skipping results directory {} beyond max depth", path);
                        continue;
                    }
                    let body = self.fetch(service, port, &path).await.map_err(|e| {
                        retrieval_error(e, || format!("failed to list {path}"))
                    })?;
                    let nested = results::parse_listing(&String::from_utf8_lossy(&body));
                    pending.push((path, nested, depth + 1));
                } else {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    async fn fetch(&self, service: &str, port: u16, path: &str) -> Result<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(KeteError::Cancelled("result retrieval".into()));
        }
        self.api
            .proxy_get(&self.config.namespace, service, port, path)
            .await
    }

    /// Container logs keyed `container-logs/<pod>-<container>.log`.
    pub async fn collect_logs(&self, pod: &Pod) -> ResultSet {
        let mut logs = ResultSet::new();
        let Some(pod_name) = pod.metadata.name.as_deref() else {
            return logs;
        };

        for container in pod::container_names(pod) {
            match self
                .api
                .pod_logs(&self.config.namespace, pod_name, &container)
                .await
            {
                Ok(text) => {
                    logs.insert(
                        format!("container-logs/{pod_name}-{container}.log"),
                        text.into_bytes(),
                    );
                }
                Err(e) => warn!(
                    pod = %pod_name,
                    container = %container,
                    "Failed to collect container logs: {}", e
                ),
            }
        }
        logs
    }

    /// Delete the service and pod created by this runner.
    pub async fn cleanup(&mut self) {
        let ns = self.config.namespace.clone();
        if let Some(name) = self.service_name.take()
            && let Err(e) = self.api.delete_service(&ns, &name).await
        {
            warn!(service = %name, "Failed to delete workload service: {}", e);
        }
        if let Some(name) = self.pod_name.take()
            && let Err(e) = self.api.delete_pod(&ns, &name).await
        {
            warn!(pod = %name, "Failed to delete workload pod: {}", e);
        }
    }
}

/// Wrap a fetch failure as `ResultRetrieval`, leaving cancellation intact.
fn retrieval_error(err: KeteError, context: impl FnOnce() -> String) -> KeteError {
    if err.is_cancelled() {
        err
    } else {
        KeteError::ResultRetrieval(format!("{}: {}", context(), err))
    }
}
