//! End-to-end orchestrator runs against the mock provider and an in-memory
//! cluster API.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Node, NodeCondition, NodeStatus, Pod, PodStatus,
    Service,
};
use kube::api::ObjectMeta;
use tokio_util::sync::CancellationToken;

use kete::crd::{
    ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus, ClusterVersion,
    ClusterVersionSpec, ClusterVersionStatus, Condition, Update,
};
use kete::k8s::{ClusterApi, ClusterConnector};
use kete::orchestrator::{INSTALL_PHASE, Orchestrator, OrchestratorConfig};
use kete::provider::mock::MockProvider;
use kete::report::DirectorySink;
use kete::workload::WorkloadSpec;
use kete::{KeteError, Result};

const LISTING: &str = r#"<html><body>
<a href="../">../</a>
<a href="junit.xml">junit.xml</a>
<a href="logs/">logs/</a>
</body></html>"#;

fn available() -> Condition {
    Condition {
        type_: "Available".to_string(),
        status: "True".to_string(),
        ..Default::default()
    }
}

#[derive(Default)]
struct Calls {
    patches: usize,
    pods: Vec<Pod>,
    deleted_pods: usize,
    deleted_services: usize,
}

#[derive(Clone, Default)]
struct HealthyCluster {
    calls: Arc<Mutex<Calls>>,
    pod_phase: Option<&'static str>,
}

#[async_trait]
impl ClusterApi for HealthyCluster {
    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        let mut cv = ClusterVersion::new("version", ClusterVersionSpec::default());
        cv.metadata.generation = Some(1);
        cv.status = Some(ClusterVersionStatus {
            observed_generation: 1,
            conditions: vec![available()],
            ..Default::default()
        });
        Ok(cv)
    }

    async fn patch_desired_update(
        &self,
        _update: &Update,
        _channel: Option<&str>,
    ) -> Result<ClusterVersion> {
        self.calls.lock().unwrap().patches += 1;
        self.get_cluster_version().await
    }

    async fn list_cluster_operators(&self) -> Result<Vec<ClusterOperator>> {
        let mut op = ClusterOperator::new("ingress", ClusterOperatorSpec {});
        op.status = Some(ClusterOperatorStatus {
            conditions: vec![available()],
            ..Default::default()
        });
        Ok(vec![op])
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(vec![Node {
            metadata: ObjectMeta {
                name: Some("master-0".to_string()),
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
        Ok(vec![Pod {
            metadata: ObjectMeta {
                name: Some("etcd-0".to_string()),
                namespace: Some("openshift-etcd".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }])
    }

    async fn ensure_namespace(&self, _namespace: &str) -> Result<()> {
        Ok(())
    }

    async fn create_pod(&self, _namespace: &str, pod: &Pod) -> Result<Pod> {
        self.calls.lock().unwrap().pods.push(pod.clone());
        Ok(pod.clone())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Pod> {
        let calls = self.calls.lock().unwrap();
        let mut pod = calls
            .pods
            .iter()
            .find(|p| p.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| KeteError::NotFound(name.to_string()))?;
        pod.status = Some(PodStatus {
            phase: Some(self.pod_phase.unwrap_or("Running").to_string()),
            ..Default::default()
        });
        Ok(pod)
    }

    async fn delete_pod(&self, _namespace: &str, _name: &str) -> Result<()> {
        self.calls.lock().unwrap().deleted_pods += 1;
        Ok(())
    }

    async fn create_service(&self, _namespace: &str, service: &Service) -> Result<Service> {
        Ok(service.clone())
    }

    async fn delete_service(&self, _namespace: &str, _name: &str) -> Result<()> {
        self.calls.lock().unwrap().deleted_services += 1;
        Ok(())
    }

    async fn get_endpoints(&self, _namespace: &str, _name: &str) -> Result<Option<Endpoints>> {
        Ok(Some(Endpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.128.2.7".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        }))
    }

    async fn pod_logs(&self, _namespace: &str, pod: &str, container: &str) -> Result<String> {
        Ok(format!("{pod}/{container} finished"))
    }

    async fn proxy_get(
        &self,
        _namespace: &str,
        _service: &str,
        _port: u16,
        path: &str,
    ) -> Result<Vec<u8>> {
        match path {
            "" => Ok(LISTING.as_bytes().to_vec()),
            "junit.xml" => Ok(b"<testsuite tests=\"1\"/>".to_vec()),
            "logs/" => Ok(br#"<a href="run.log">run.log</a>"#.to_vec()),
            "logs/run.log" => Ok(b"ok".to_vec()),
            other => Err(KeteError::NotFound(format!("404 {other}"))),
        }
    }
}

struct Connector(HealthyCluster);

#[async_trait]
impl ClusterConnector for Connector {
    async fn connect(&self, _kubeconfig: &[u8]) -> Result<Arc<dyn ClusterApi>> {
        Ok(Arc::new(self.0.clone()))
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        workloads: vec![WorkloadSpec {
            name: "conformance".into(),
            image: "quay.io/kete/e2e:latest".into(),
            command: "make conformance".into(),
            ..WorkloadSpec::default()
        }],
        ..OrchestratorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn ready_cluster_runs_install_phase_and_writes_results() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new("int"));
    let cluster = HealthyCluster::default();

    let report = Orchestrator::new(
        provider.clone(),
        Arc::new(Connector(cluster.clone())),
        Arc::new(DirectorySink::new(dir.path())),
        config(),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert!(report.passed(), "{:?}", report.errors);
    assert_eq!(report.workload_phases, vec![INSTALL_PHASE]);
    assert_eq!(provider.delete_calls(), 1);

    let calls = cluster.calls.lock().unwrap();
    assert_eq!(calls.patches, 0);
    assert_eq!(calls.pods.len(), 1);
    assert_eq!(calls.deleted_pods, 1);
    assert_eq!(calls.deleted_services, 1);

    let install = dir.path().join(INSTALL_PHASE);
    assert_eq!(
        std::fs::read(install.join("junit.xml")).unwrap(),
        b"<testsuite tests=\"1\"/>"
    );
    assert_eq!(std::fs::read(install.join("logs/run.log")).unwrap(), b"ok");
    assert!(install.join("container-logs").is_dir());
    assert!(dir.path().join("cluster-logs/logs.txt").is_file());
}

#[tokio::test(start_paused = true)]
async fn failed_workload_still_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new("int"));
    let cluster = HealthyCluster {
        pod_phase: Some("Failed"),
        ..Default::default()
    };

    let report = Orchestrator::new(
        provider.clone(),
        Arc::new(Connector(cluster.clone())),
        Arc::new(DirectorySink::new(dir.path())),
        config(),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert!(!report.passed());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(provider.delete_calls(), 1);
    assert_eq!(cluster.calls.lock().unwrap().deleted_pods, 1);
    assert!(!dir.path().join(INSTALL_PHASE).exists());
}

#[tokio::test(start_paused = true)]
async fn teardown_failure_is_reported_as_warning() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::new("int").with_failing_delete());

    let report = Orchestrator::new(
        provider.clone(),
        Arc::new(Connector(HealthyCluster::default())),
        Arc::new(DirectorySink::new(dir.path())),
        config(),
        CancellationToken::new(),
    )
    .run()
    .await;

    assert!(report.passed());
    assert_eq!(provider.delete_calls(), 1);
    assert!(report.warnings.iter().any(|w| w.contains("teardown")));
}
