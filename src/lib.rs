//! kete - cluster lifecycle and end-to-end test orchestrator.
//!
//! Launches or reuses a cluster through a [`provider::Provider`], waits for it
//! to pass consecutive health checks, optionally upgrades it, runs test
//! workloads on it and retrieves their results, then tears it down.

pub mod cluster;
pub mod config;
pub mod crd;
pub mod error;
pub mod k8s;
pub mod orchestrator;
pub mod poll;
pub mod provider;
pub mod provisioner;
pub mod readiness;
pub mod report;
pub mod retry;
pub mod upgrade;
pub mod version;
pub mod workload;

#[cfg(test)]
mod test_support;

pub use error::{KeteError, Result};
