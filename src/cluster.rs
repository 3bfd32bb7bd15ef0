//! Cluster model shared by providers and the orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    Pending,
    Installing,
    Ready,
    Error,
    Uninstalling,
    Unknown,
}

impl ClusterState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Installing => "installing",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Uninstalling => "uninstalling",
            Self::Unknown => "unknown",
        }
    }

    /// States from which a cluster never becomes usable again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Uninstalling)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "pending" | "pending_account" | "waiting" => Self::Pending,
            "installing" | "validating" => Self::Installing,
            "ready" | "installed" => Self::Ready,
            "error" => Self::Error,
            "uninstalling" => Self::Uninstalling,
            _ => Self::Unknown,
        })
    }
}

/// A managed cluster owned by one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: ClusterState,
    #[serde(default)]
    pub cloud_provider: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub addons: Vec<String>,
}

impl Cluster {
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, ClusterState::Ready)
    }
}
