//! In-cluster health checks evaluated on every readiness tick.

use k8s_openapi::api::core::v1::{Node, Pod};

use crate::crd::{ClusterOperator, ClusterVersion, condition_is};
use crate::k8s::ClusterApi;

/// Conditions that must not be `True` on the cluster version operator.
const CVO_BLOCKING_CONDITIONS: [&str; 3] = ["Progressing", "Failing", "Degraded"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// A single health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub summary: String,
}

/// Outcome of one deep health check.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub checks: Vec<HealthCheckResult>,
}

// ============================================================================
// Builder functions
// ============================================================================

impl HealthCheckResult {
    fn new(name: &'static str, failures: &[String], pass_summary: String) -> Self {
        if failures.is_empty() {
            Self {
                name,
                status: CheckStatus::Pass,
                summary: pass_summary,
            }
        } else {
            Self {
                name,
                status: CheckStatus::Fail,
                summary: failures.join("; "),
            }
        }
    }

    /// Cluster version operator: Available and not Progressing, Failing or Degraded.
    pub fn cluster_version(cv: &ClusterVersion) -> Self {
        let conditions = cv
            .status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default();

        let mut failures = Vec::new();
        if condition_is(conditions, "Available") != Some(true) {
            failures.push("ClusterVersion is not Available".to_string());
        }
        for type_ in CVO_BLOCKING_CONDITIONS {
            if let Some(c) = conditions.iter().find(|c| c.type_ == type_ && c.is_true()) {
                failures.push(format!("ClusterVersion is {}: {}", type_, c.message_or_reason()));
            }
        }

        Self::new("cvo", &failures, "ClusterVersion is Available".into())
    }

    /// Every node reports Ready=True.
    pub fn nodes(nodes: &[Node]) -> Self {
        if nodes.is_empty() {
            return Self::new("node", &["no nodes found".to_string()], String::new());
        }

        let not_ready: Vec<String> = nodes
            .iter()
            .filter(|node| !node_is_ready(node))
            .map(|node| node.metadata.name.clone().unwrap_or_default())
            .collect();

        let failures = if not_ready.is_empty() {
            vec![]
        } else {
            vec![format!(
                "{}/{} node(s) not Ready: {}",
                not_ready.len(),
                nodes.len(),
                not_ready.join(", ")
            )]
        };
        Self::new("node", &failures, format!("{} node(s) Ready", nodes.len()))
    }

    /// Every cluster operator is Available and neither Progressing nor Degraded.
    pub fn operators(operators: &[ClusterOperator]) -> Self {
        if operators.is_empty() {
            return Self::new(
                "operator",
                &["no cluster operators found".to_string()],
                String::new(),
            );
        }

        let mut failures = Vec::new();
        for op in operators {
            let name = op.metadata.name.as_deref().unwrap_or("unknown");
            let conditions = op
                .status
                .as_ref()
                .map(|s| s.conditions.as_slice())
                .unwrap_or_default();

            if condition_is(conditions, "Available") != Some(true) {
                failures.push(format!("{name} not Available"));
            }
            if condition_is(conditions, "Progressing") == Some(true) {
                failures.push(format!("{name} Progressing"));
            }
            if condition_is(conditions, "Degraded") == Some(true) {
                failures.push(format!("{name} Degraded"));
            }
        }

        Self::new(
            "operator",
            &failures,
            format!("{} cluster operator(s) healthy", operators.len()),
        )
    }

    /// All pods are Running or Succeeded.
    pub fn pods(pods: &[Pod]) -> Self {
        if pods.is_empty() {
            return Self::new("pod", &["no pods found".to_string()], String::new());
        }

        let unhealthy: Vec<String> = pods
            .iter()
            .filter_map(|pod| {
                let phase = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .unwrap_or("Unknown");
                if matches!(phase, "Running" | "Succeeded") {
                    None
                } else {
                    Some(format!(
                        "{}/{} ({})",
                        pod.metadata.namespace.as_deref().unwrap_or("default"),
                        pod.metadata.name.as_deref().unwrap_or("unknown"),
                        phase
                    ))
                }
            })
            .collect();

        let failures = if unhealthy.is_empty() {
            vec![]
        } else {
            vec![format!(
                "{}/{} pod(s) not Running or Succeeded: {}",
                unhealthy.len(),
                pods.len(),
                unhealthy.join(", ")
            )]
        };
        Self::new(
            "pod",
            &failures,
            format!("{} pod(s) Running or Succeeded", pods.len()),
        )
    }

    /// A check that could not be evaluated because the API call failed.
    pub fn unavailable(name: &'static str, error: &crate::error::KeteError) -> Self {
        Self::new(name, &[format!("check failed: {error}")], String::new())
    }

    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        !self.checks.is_empty() && self.checks.iter().all(HealthCheckResult::passed)
    }

    pub fn failures(&self) -> Vec<&HealthCheckResult> {
        self.checks.iter().filter(|c| !c.passed()).collect()
    }

    /// Free-text diagnostic listing failing checks.
    pub fn diagnostic(&self) -> String {
        let failures = self.failures();
        if failures.is_empty() {
            return "all health checks passed".to_string();
        }
        failures
            .iter()
            .map(|c| format!("{}: {}", c.name, c.summary))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Run every in-cluster check. API errors become failing checks.
pub async fn run_health_checks(api: &dyn ClusterApi) -> HealthReport {
    let mut checks = Vec::with_capacity(4);

    checks.push(match api.get_cluster_version().await {
        Ok(cv) => HealthCheckResult::cluster_version(&cv),
        Err(e) => HealthCheckResult::unavailable("cvo", &e),
    });
    checks.push(match api.list_nodes().await {
        Ok(nodes) => HealthCheckResult::nodes(&nodes),
        Err(e) => HealthCheckResult::unavailable("node", &e),
    });
    checks.push(match api.list_cluster_operators().await {
        Ok(operators) => HealthCheckResult::operators(&operators),
        Err(e) => HealthCheckResult::unavailable("operator", &e),
    });
    checks.push(match api.list_pods().await {
        Ok(pods) => HealthCheckResult::pods(&pods),
        Err(e) => HealthCheckResult::unavailable("pod", &e),
    });

    HealthReport { checks }
}
