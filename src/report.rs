//! Hand-off of result artifacts to reporting collaborators.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{KeteError, Result};
use crate::workload::ResultSet;

/// Receives the artifacts produced by each phase.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn accept(&self, phase: &str, results: &ResultSet) -> Result<()>;
    fn name(&self) -> &str;
}

/// Writes each phase's artifacts under `<root>/<phase>/`.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target(&self, phase: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(KeteError::Report(format!(
                "refusing to write result outside report directory: {key}"
            )));
        }
        Ok(self.root.join(phase).join(relative))
    }
}

#[async_trait]
impl ResultSink for DirectorySink {
    async fn accept(&self, phase: &str, results: &ResultSet) -> Result<()> {
        for (key, body) in results {
            let path = self.target(phase, key)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    KeteError::Report(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
            tokio::fs::write(&path, body).await.map_err(|e| {
                KeteError::Report(format!("failed to write {}: {}", path.display(), e))
            })?;
            debug!("Wrote {} ({} bytes)", path.display(), body.len());
        }
        info!(
            phase = %phase,
            "Stored {} artifact(s) in {}",
            results.len(),
            self.root.join(phase).display()
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "directory"
    }
}
