//! In-memory cluster API used by unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Node, NodeCondition, NodeStatus, Pod, PodStatus,
    Service,
};
use kube::api::ObjectMeta;
use tokio_util::sync::CancellationToken;

use crate::crd::{
    ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, ClusterVersion,
    ClusterVersionSpec, ClusterVersionStatus, Condition, Update,
};
use crate::error::{KeteError, Result};
use crate::k8s::{ClusterApi, ClusterConnector};

pub fn condition(type_: &str, status: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        message: Some(format!("{type_} is {status}")),
        ..Default::default()
    }
}

pub fn healthy_cluster_version() -> ClusterVersion {
    let mut cv = ClusterVersion::new("version", ClusterVersionSpec::default());
    cv.metadata.generation = Some(1);
    cv.status = Some(ClusterVersionStatus {
        observed_generation: 1,
        conditions: vec![
            condition("Available", "True"),
            condition("Progressing", "False"),
            condition("Failing", "False"),
        ],
        ..Default::default()
    });
    cv
}

fn pod_in_phase(name: &str, phase: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("openshift-console".to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeState {
    pub cluster_version: Option<ClusterVersion>,
    /// `get_cluster_version` calls after a patch that fail with a transient error.
    pub cluster_version_failures: u32,
    /// Per-tick pod health, popped by `list_pods`. Healthy once empty.
    pub pod_health: VecDeque<bool>,
    /// `get_cluster_version` calls after a patch before the generation is observed.
    pub ack_delay: u32,
    pub gets_since_patch: u32,
    pub patches: Vec<(Update, Option<String>)>,
    /// Phases returned by successive `get_pod` calls; the last one repeats.
    pub pod_phases: VecDeque<String>,
    /// `get_endpoints` calls before an address appears.
    pub endpoints_delay: u32,
    pub endpoints_calls: u32,
    pub created_pods: Vec<Pod>,
    pub created_services: Vec<Service>,
    pub deleted_pods: Vec<String>,
    pub deleted_services: Vec<String>,
    /// Proxy responses keyed by path; `None` simulates a failed request.
    pub proxy: BTreeMap<String, Option<Vec<u8>>>,
    pub proxy_calls: Vec<String>,
    /// Token cancelled when the given proxy path is requested.
    pub cancel_on: Option<(String, CancellationToken)>,
}

#[derive(Clone, Default)]
pub struct FakeClusterApi {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.state.lock().unwrap().cluster_version = Some(healthy_cluster_version());
        api
    }

    pub fn with<F: FnOnce(&mut FakeState)>(self, f: F) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        let mut state = self.state();
        if !state.patches.is_empty() && state.cluster_version_failures > 0 {
            state.cluster_version_failures -= 1;
            return Err(KeteError::TransientApi(
                "k8s::clusterversion".into(),
                "503 service unavailable".into(),
            ));
        }
        state.gets_since_patch += 1;
        let ready = state.gets_since_patch > state.ack_delay;
        let cv = state
            .cluster_version
            .as_mut()
            .ok_or_else(|| KeteError::NotFound("clusterversion".into()))?;
        if ready {
            let generation = cv.metadata.generation.unwrap_or_default();
            if let Some(status) = cv.status.as_mut() {
                status.observed_generation = generation;
            }
        }
        Ok(cv.clone())
    }

    async fn patch_desired_update(
        &self,
        update: &Update,
        channel: Option<&str>,
    ) -> Result<ClusterVersion> {
        let mut state = self.state();
        state
            .patches
            .push((update.clone(), channel.map(String::from)));
        state.gets_since_patch = 0;
        let cv = state
            .cluster_version
            .as_mut()
            .ok_or_else(|| KeteError::NotFound("clusterversion".into()))?;
        cv.spec.desired_update = Some(update.clone());
        if let Some(channel) = channel {
            cv.spec.channel = Some(channel.to_string());
        }
        cv.metadata.generation = Some(cv.metadata.generation.unwrap_or_default() + 1);
        Ok(cv.clone())
    }

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>> {
        let mut op = ClusterOperator::new("dns", ClusterOperatorSpec {});
        op.status = Some(ClusterOperatorStatus {
            conditions: vec![condition("Available", "True")],
            ..Default::default()
        });
        Ok(vec![op])
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(vec![Node {
            metadata: ObjectMeta {
                name: Some("worker-0".to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }])
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let healthy = self.state().pod_health.pop_front().unwrap_or(true);
        let phase = if healthy { "Running" } else { "Pending" };
        Ok(vec![
            pod_in_phase("console-0", "Running"),
            pod_in_phase("console-1", phase),
        ])
    }

    async fn ensure_namespace(&self, _namespace: &str) -> Result<()> {
        Ok(())
    }

    async fn create_pod(&self, _namespace: &str, pod: &Pod) -> Result<Pod> {
        self.state().created_pods.push(pod.clone());
        Ok(pod.clone())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Pod> {
        let mut state = self.state();
        let phase = if state.pod_phases.len() > 1 {
            state.pod_phases.pop_front().unwrap_or_default()
        } else {
            state
                .pod_phases
                .front()
                .cloned()
                .unwrap_or_else(|| "Running".to_string())
        };
        let mut pod = state
            .created_pods
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| KeteError::NotFound(format!("pod {name}")))?;
        pod.status = Some(PodStatus {
            phase: Some(phase),
            ..Default::default()
        });
        Ok(pod)
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<()> {
        self.state().deleted_pods.push(name.to_string());
        Ok(())
    }

    async fn create_service(&self, _namespace: &str, service: &Service) -> Result<Service> {
        self.state().created_services.push(service.clone());
        Ok(service.clone())
    }

    async fn delete_service(&self, _namespace: &str, name: &str) -> Result<()> {
        self.state().deleted_services.push(name.to_string());
        Ok(())
    }

    async fn get_endpoints(&self, _namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        let mut state = self.state();
        state.endpoints_calls += 1;
        let addresses = if state.endpoints_calls > state.endpoints_delay {
            Some(vec![EndpointAddress {
                ip: "10.128.0.12".to_string(),
                ..Default::default()
            }])
        } else {
            None
        };
        Ok(Some(Endpoints {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses,
                ..Default::default()
            }]),
        }))
    }

    async fn pod_logs(&self, _namespace: &str, pod: &str, container: &str) -> Result<String> {
        Ok(format!("logs of {pod}/{container}"))
    }

    async fn proxy_get(
        &self,
        _namespace: &str,
        _service: &str,
        _port: u16,
        path: &str,
    ) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.proxy_calls.push(path.to_string());
        if let Some((trigger, token)) = &state.cancel_on
            && trigger == path
        {
            token.cancel();
        }
        match state.proxy.get(path) {
            Some(Some(body)) => Ok(body.clone()),
            Some(None) => Err(KeteError::TransientApi(
                "k8s::proxy".into(),
                format!("503 fetching {path}"),
            )),
            None => Err(KeteError::NotFound(format!("404 {path}"))),
        }
    }
}

/// Connector that always hands out the same fake API.
pub struct FakeConnector {
    pub api: FakeClusterApi,
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, _kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        Ok(Arc::new(self.api.clone()))
    }
}
