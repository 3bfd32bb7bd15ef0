//! OpenShift `config.openshift.io/v1` resource types read by the readiness
//! gate and upgrade coordinator.

pub mod cluster_operator;
pub mod cluster_version;
pub mod types;

pub use cluster_operator::{ClusterOperator, ClusterOperatorSpec, ClusterOperatorStatus};
pub use cluster_version::{
    ClusterVersion, ClusterVersionSpec, ClusterVersionStatus, Release, Update, UpdateHistory,
};
pub use types::{Condition, condition_is};
